use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::domain::embedding::EmbeddingVector;
use crate::shared::category::Category;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum IdentityError {
    #[error("identity {0} has an empty name")]
    EmptyName(IdentityId),
    #[error("identity {0} has no embeddings")]
    NoEmbeddings(IdentityId),
    #[error("identity {id} mixes embedding sizes ({expected} and {got})")]
    DimensionMismatch {
        id: IdentityId,
        expected: usize,
        got: usize,
    },
}

/// A registered animal or person.
///
/// Always holds at least one embedding; the field is private so the only
/// ways to change it are [`Identity::new`] and [`Identity::push_embedding`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub category: Category,
    embeddings: Vec<EmbeddingVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<PathBuf>,
    pub created_at_ms: u64,
}

impl Identity {
    pub fn new(
        id: IdentityId,
        name: impl Into<String>,
        category: Category,
        embedding: EmbeddingVector,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            embeddings: vec![embedding],
            description: None,
            breed: None,
            estimated_weight_kg: None,
            photo_path: None,
            created_at_ms,
        }
    }

    pub fn embeddings(&self) -> &[EmbeddingVector] {
        &self.embeddings
    }

    pub fn push_embedding(&mut self, embedding: EmbeddingVector) -> Result<(), IdentityError> {
        let Some(first) = self.embeddings.first() else {
            return Err(IdentityError::NoEmbeddings(self.id));
        };
        let expected = first.dim();
        if embedding.dim() != expected {
            return Err(IdentityError::DimensionMismatch {
                id: self.id,
                expected,
                got: embedding.dim(),
            });
        }
        self.embeddings.push(embedding);
        Ok(())
    }

    /// Checks invariants on records that did not come through [`Identity::new`],
    /// e.g. ones read back from storage.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.name.trim().is_empty() {
            return Err(IdentityError::EmptyName(self.id));
        }
        let Some(first) = self.embeddings.first() else {
            return Err(IdentityError::NoEmbeddings(self.id));
        };
        if let Some(other) = self.embeddings.iter().find(|e| e.dim() != first.dim()) {
            return Err(IdentityError::DimensionMismatch {
                id: self.id,
                expected: first.dim(),
                got: other.dim(),
            });
        }
        Ok(())
    }

    /// Normalizes stored vectors, dropping any that are degenerate.
    pub(crate) fn renormalize_embeddings(&mut self) {
        self.embeddings = std::mem::take(&mut self.embeddings)
            .into_iter()
            .filter_map(EmbeddingVector::renormalized)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::from_raw(values.to_vec()).unwrap()
    }

    #[test]
    fn test_new_identity_has_one_embedding() {
        let identity = Identity::new(IdentityId(1), "Mimosa", Category::Animal, unit(&[1.0, 0.0]), 0);
        assert_eq!(identity.embeddings().len(), 1);
        assert!(identity.validate().is_ok());
    }

    #[test]
    fn test_push_embedding_rejects_other_dimension() {
        let mut identity =
            Identity::new(IdentityId(1), "Mimosa", Category::Animal, unit(&[1.0, 0.0]), 0);
        assert!(identity.push_embedding(unit(&[0.0, 1.0])).is_ok());
        assert_eq!(
            identity.push_embedding(unit(&[1.0, 0.0, 0.0])),
            Err(IdentityError::DimensionMismatch {
                id: IdentityId(1),
                expected: 2,
                got: 3
            })
        );
        assert_eq!(identity.embeddings().len(), 2);
    }

    #[test]
    fn test_validate_rejects_records_without_embeddings() {
        let json = r#"{"id": 7, "name": "Estrela", "category": "animal", "embeddings": [], "created_at_ms": 0}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.validate(), Err(IdentityError::NoEmbeddings(IdentityId(7))));
    }

    #[test]
    fn test_push_embedding_on_empty_record_is_an_error() {
        let json = r#"{"id": 7, "name": "Estrela", "category": "animal", "embeddings": [], "created_at_ms": 0}"#;
        let mut identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(
            identity.push_embedding(unit(&[1.0, 0.0])),
            Err(IdentityError::NoEmbeddings(IdentityId(7)))
        );
        assert!(identity.embeddings().is_empty());
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let identity = Identity::new(IdentityId(2), " ", Category::Person, unit(&[1.0]), 0);
        assert_eq!(identity.validate(), Err(IdentityError::EmptyName(IdentityId(2))));
    }

    #[test]
    fn test_renormalize_drops_zero_vectors() {
        let json = r#"{"id": 3, "name": "Bo", "category": "animal",
            "embeddings": [[0.0, 0.0], [0.0, 5.0]], "created_at_ms": 0}"#;
        let mut identity: Identity = serde_json::from_str(json).unwrap();
        identity.renormalize_embeddings();
        assert_eq!(identity.embeddings().len(), 1);
        assert_eq!(identity.embeddings()[0].as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn test_optional_fields_are_omitted_when_empty() {
        let identity = Identity::new(IdentityId(4), "Visitor_004", Category::Person, unit(&[1.0]), 10);
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("description"));
        assert!(!json.contains("photo_path"));
    }
}
