//! Maps a source way to the administrative entities that own it.

use thiserror::Error;

use crate::source::{AdminEntity, SourceDataset};

/// Malformed cadastre input detected while resolving entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No relation references the way.
    #[error("source way {way_id} does not belong to any entity")]
    OrphanWay {
        /// Source way identifier.
        way_id: i64,
    },
    /// One relation lists the way more than once.
    #[error("relation {relation_id} lists source way {way_id} more than once")]
    DuplicateMembership {
        /// Source way identifier.
        way_id: i64,
        /// Relation with the repeated member.
        relation_id: i64,
    },
    /// A membership points at a relation missing from the dataset.
    #[error("source way {way_id} references unknown relation {relation_id}")]
    UnknownRelation {
        /// Source way identifier.
        way_id: i64,
        /// Missing relation identifier.
        relation_id: i64,
    },
    /// A relation lacks the cadastre reference tag.
    #[error("relation {relation_id} has no {key:?} tag")]
    MissingReference {
        /// Relation lacking the tag.
        relation_id: i64,
        /// Expected tag key.
        key: String,
    },
}

/// How many entities own a source way, which decides the match query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// The way bounds a single entity.
    Single(AdminEntity),
    /// The way separates two entities.
    Shared(AdminEntity, AdminEntity),
    /// More than two entities claim the way.
    Overlapping(Vec<AdminEntity>),
}

impl Ownership {
    /// Classify a resolved entity list.
    ///
    /// Returns `None` for an empty list.
    #[must_use]
    pub fn classify(mut entities: Vec<AdminEntity>) -> Option<Self> {
        match entities.len() {
            0 => None,
            1 => entities.pop().map(Self::Single),
            2 => {
                let second = entities.pop()?;
                let first = entities.pop()?;
                Some(Self::Shared(first, second))
            }
            _ => Some(Self::Overlapping(entities)),
        }
    }

    /// Entities in resolution order.
    #[must_use]
    pub fn entities(&self) -> Vec<&AdminEntity> {
        match self {
            Self::Single(entity) => vec![entity],
            Self::Shared(first, second) => vec![first, second],
            Self::Overlapping(entities) => entities.iter().collect(),
        }
    }

    /// Label stored on progress records.
    #[must_use]
    pub fn label(&self) -> String {
        relation_label(self.entities())
    }
}

/// Join entity labels with `" - "`.
pub fn relation_label<'a, I>(entities: I) -> String
where
    I: IntoIterator<Item = &'a AdminEntity>,
{
    entities
        .into_iter()
        .map(AdminEntity::label)
        .collect::<Vec<_>>()
        .join(" - ")
}

/// Resolve the entities owning `way_id` in relation id order.
///
/// # Errors
///
/// Returns [`ResolveError`] when the cadastre input is malformed.
pub fn resolve_entities(
    dataset: &SourceDataset,
    way_id: i64,
    reference_key: &str,
) -> Result<Vec<AdminEntity>, ResolveError> {
    let memberships = dataset.memberships(way_id);
    if memberships.is_empty() {
        return Err(ResolveError::OrphanWay { way_id });
    }

    let mut entities: Vec<AdminEntity> = Vec::with_capacity(memberships.len());
    for &relation_id in memberships {
        if entities
            .iter()
            .any(|entity| entity.relation_id == relation_id)
        {
            return Err(ResolveError::DuplicateMembership {
                way_id,
                relation_id,
            });
        }
        let relation = dataset
            .relation(relation_id)
            .ok_or(ResolveError::UnknownRelation {
                way_id,
                relation_id,
            })?;
        let reference = relation
            .tags
            .get(reference_key)
            .cloned()
            .ok_or_else(|| ResolveError::MissingReference {
                relation_id,
                key: reference_key.to_owned(),
            })?;
        let name = relation.tags.get("name").cloned().unwrap_or_default();
        entities.push(AdminEntity {
            relation_id,
            name,
            reference,
        });
    }
    Ok(entities)
}
