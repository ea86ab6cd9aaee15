use std::collections::BTreeMap;
use std::sync::Arc;

use crate::embedding::domain::embedding::EmbeddingVector;
use crate::shared::category::Category;

use super::identity::{Identity, IdentityId};

/// Similarities closer than this are treated as equal for tie-breaking.
pub const TIE_EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchResult {
    pub identity_id: IdentityId,
    pub similarity: f64,
}

impl MatchResult {
    pub fn meets(&self, threshold: f64) -> bool {
        self.similarity >= threshold
    }
}

/// Immutable, versioned view of the registry used for one matching pass.
///
/// Cloning is cheap; holders keep seeing the same identities even while
/// the store publishes newer versions.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    identities: Arc<BTreeMap<IdentityId, Identity>>,
    version: u64,
}

impl RegistrySnapshot {
    pub fn new(identities: BTreeMap<IdentityId, Identity>, version: u64) -> Self {
        Self {
            identities: Arc::new(identities),
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(&id)
    }

    pub fn contains(&self, id: IdentityId) -> bool {
        self.identities.contains_key(&id)
    }

    /// Identities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn best_match(
        &self,
        query: &EmbeddingVector,
        category: Option<Category>,
    ) -> Option<MatchResult> {
        best_match(query, self.iter(), category)
    }

    /// Whether another identity already uses `name`, compared
    /// case-insensitively. Names are unique across the registry.
    pub fn name_in_use(&self, name: &str, except: Option<IdentityId>) -> bool {
        let name = name.trim();
        self.iter()
            .any(|i| Some(i.id) != except && i.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn to_map(&self) -> BTreeMap<IdentityId, Identity> {
        (*self.identities).clone()
    }
}

/// Linear scan for the identity most similar to `query`.
///
/// An identity's score is the best similarity over all of its vectors.
/// Vectors of a different dimension are skipped. Scores within
/// [`TIE_EPSILON`] prefer the identity with more vectors, then the lower
/// id. No threshold is applied here.
pub fn best_match<'a>(
    query: &EmbeddingVector,
    identities: impl IntoIterator<Item = &'a Identity>,
    category: Option<Category>,
) -> Option<MatchResult> {
    let mut best: Option<(MatchResult, usize)> = None;

    for identity in identities {
        if category.is_some_and(|c| c != identity.category) {
            continue;
        }
        let Some(similarity) = identity
            .embeddings()
            .iter()
            .filter_map(|e| query.similarity(e))
            .reduce(f64::max)
        else {
            continue;
        };
        let vectors = identity.embeddings().len();
        let candidate = MatchResult {
            identity_id: identity.id,
            similarity,
        };

        best = match best {
            None => Some((candidate, vectors)),
            Some((current, current_vectors)) => {
                let delta = similarity - current.similarity;
                let wins = if delta.abs() <= TIE_EPSILON {
                    vectors > current_vectors
                        || (vectors == current_vectors && identity.id < current.identity_id)
                } else {
                    delta > 0.0
                };
                if wins {
                    Some((candidate, vectors))
                } else {
                    Some((current, current_vectors))
                }
            }
        };
    }

    best.map(|(result, _)| result)
}
