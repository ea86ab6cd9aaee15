use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::{COCO_ANIMAL_CLASSES, COCO_PERSON_CLASS};

/// What kind of subject an identity or detection refers to.
///
/// Animals and people live in separate matching banks: an animal crop is
/// never compared against registered people and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Animal,
    Person,
}

impl Category {
    pub const ALL: &[Category] = &[Category::Animal, Category::Person];

    /// Maps a COCO class id to a category, or `None` for classes we ignore.
    pub fn from_coco_class(class_id: usize) -> Option<Self> {
        if class_id == COCO_PERSON_CLASS {
            Some(Category::Person)
        } else if COCO_ANIMAL_CLASSES.contains(&class_id) {
            Some(Category::Animal)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Animal => "animal",
            Category::Person => "person",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "animal" | "cattle" => Ok(Category::Animal),
            "person" | "people" => Ok(Category::Person),
            other => Err(format!("unknown category '{other}', expected 'animal' or 'person'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Some(Category::Person))]
    #[case(19, Some(Category::Animal))]
    #[case(14, Some(Category::Animal))]
    #[case(23, Some(Category::Animal))]
    #[case(2, None)]
    #[case(24, None)]
    fn test_from_coco_class(#[case] class_id: usize, #[case] expected: Option<Category>) {
        assert_eq!(Category::from_coco_class(class_id), expected);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Category::Animal).unwrap(), "\"animal\"");
        assert_eq!(serde_json::to_string(&Category::Person).unwrap(), "\"person\"");
    }

    #[test]
    fn test_parse() {
        assert_eq!("Cattle".parse::<Category>(), Ok(Category::Animal));
        assert_eq!("person".parse::<Category>(), Ok(Category::Person));
        assert!("tractor".parse::<Category>().is_err());
    }
}
