use crate::shared::category::Category;
use crate::shared::frame::Frame;
use crate::shared::BoxError;

/// Free-text description of a registered subject, with the structured
/// fields a vision model can estimate for animals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Description {
    pub text: String,
    pub breed: Option<String>,
    pub estimated_weight_kg: Option<f64>,
}

impl Description {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.breed.is_none() && self.estimated_weight_kg.is_none()
    }
}

/// Describes a crop. Slow and fallible; callers bound it with a timeout
/// and register without a description on failure.
pub trait DescriptionService: Send + Sync {
    fn describe(&self, crop: &Frame, category: Category) -> Result<Description, BoxError>;
}

/// Breeds recognized in free text, longest names first so that e.g.
/// "Girolando" is not reported as "Gir".
const KNOWN_BREEDS: &[&str] = &[
    "Girolando",
    "Simmental",
    "Charolais",
    "Hereford",
    "Holstein",
    "Limousin",
    "Brahman",
    "Nelore",
    "Guzerá",
    "Angus",
    "Zebu",
    "Gir",
];

/// Parses a reply of the form
///
/// ```text
/// BREED: Nelore
/// WEIGHT: 420 kg
/// DESCRIPTION: White coat with a grey sheen, prominent hump.
/// ```
///
/// Missing keys leave the field empty; a reply with no `DESCRIPTION:` key
/// is used verbatim as the text.
pub fn parse_structured_reply(raw: &str) -> Description {
    let mut description = Description {
        text: raw.trim().to_string(),
        ..Description::default()
    };

    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "BREED" if !is_placeholder(value) => description.breed = Some(value.to_string()),
            "WEIGHT" => description.estimated_weight_kg = parse_weight(value),
            "DESCRIPTION" => description.text = value.to_string(),
            _ => {}
        }
    }
    description
}

/// Finds the first known breed mentioned in `text`, case-insensitively.
pub fn extract_known_breed(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    KNOWN_BREEDS
        .iter()
        .find(|breed| lower.contains(&breed.to_lowercase()))
        .map(|breed| breed.to_string())
}

fn parse_weight(value: &str) -> Option<f64> {
    let number = value.to_ascii_lowercase().replace("kg", "");
    number
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite() && *w > 0.0)
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty()
        || ["n/a", "unknown", "none", "-"]
            .iter()
            .any(|p| value.eq_ignore_ascii_case(p))
}
