//! Error taxonomy shared by every Lectern service.

use std::fmt;
use thiserror::Error;

/// Entity kinds referenced by lookup and validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// A course record
    Course,
    /// A module record
    Module,
    /// A lecture record
    Lecture,
    /// A per-user progress record
    Progress,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Course => "course",
            Entity::Module => "module",
            Entity::Lecture => "lecture",
            Entity::Progress => "progress",
        };
        write!(f, "{name}")
    }
}

/// Errors surfaced by Lectern operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Lookup by id found nothing
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity looked up
        entity: Entity,
        /// The id that missed
        id: String,
    },

    /// A concurrent write won the race
    #[error(transparent)]
    Conflict(#[from] Conflict),

    /// The request was rejected before any state changed
    #[error(transparent)]
    Validation(#[from] Validation),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend failure with no structured mapping
    #[error("storage error: {0}")]
    Storage(String),
}

/// Concurrent writes that lost the race.
#[derive(Debug, Error)]
pub enum Conflict {
    /// A sibling already holds the requested position number
    #[error("{scope} number {number} is already taken")]
    DuplicateNumber {
        /// Entity kind whose numbering collided
        scope: Entity,
        /// The contested position number
        number: u32,
    },

    /// The record was rewritten since it was loaded
    #[error("stale version: expected {expected}, found {found}")]
    StaleVersion {
        /// Version the writer loaded
        expected: u64,
        /// Version currently stored
        found: u64,
    },
}

/// Requests rejected before any state was touched.
#[derive(Debug, Error)]
pub enum Validation {
    /// An id in the request belongs to a different parent (or to nothing)
    #[error("{entity} {id} does not belong to {parent} {parent_id}")]
    ForeignEntity {
        /// Kind of the offending entity
        entity: Entity,
        /// The offending id
        id: String,
        /// Kind of the expected parent
        parent: Entity,
        /// Id of the expected parent
        parent_id: String,
    },

    /// The ordered id list was empty
    #[error("ordered id list is empty")]
    EmptySet,

    /// The ordered id list is not a permutation of the children
    #[error("ordered id list must name each of the {expected} children exactly once, got {got}")]
    IncompleteSet {
        /// Number of children the parent has
        expected: usize,
        /// Number of distinct ids supplied
        got: usize,
    },
}

impl Error {
    /// Shorthand for a `NotFound` with a displayable id.
    pub fn not_found(entity: Entity, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Wraps a backend failure that has no structured mapping.
    pub fn storage(err: impl fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for Lectern operations
pub type Result<T> = std::result::Result<T, Error>;
