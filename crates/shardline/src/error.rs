//! Error types for the orchestration core.
//!
//! ## Error Cases
//! - `InvalidRequest`: a key or identity was empty or malformed. Nothing was
//!   mutated; the caller should fix its input.
//! - `NotFound`: the key has no live allocation, usually because the worker
//!   was reaped. The caller should allocate again.
//! - `ChunkCollision`: two live allocations would hold the same chunk. This
//!   means the registry invariants are broken and is never recovered from.
//! - `InvalidConfig`: the orchestrator was configured with values it cannot
//!   honor (e.g. a zero stagger stride).
//!
//! Rate limiting is not an error: a denied coin is reported as
//! [`CoinStatus::Denied`](crate::CoinStatus::Denied).

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the orchestration core.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The request was malformed and rejected before touching any state.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// No live allocation exists for the key.
    #[error("No live allocation for key `{key}`")]
    NotFound { key: String },

    /// A chunk was about to be assigned to a second live allocation.
    #[error("Chunk {chunk} is held by `{holder}` and cannot be given to `{claimant}`")]
    ChunkCollision {
        chunk: u32,
        holder: String,
        claimant: String,
    },

    /// The configuration cannot be used to build an orchestrator.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    pub(crate) fn not_found(key: &str) -> Self {
        Self::NotFound {
            key: key.to_owned(),
        }
    }

    /// Returns `true` for errors that indicate broken internal invariants
    /// rather than bad input or normal churn.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ChunkCollision { .. })
    }
}

/// Rejects empty or whitespace-only keys and identities.
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest {
            reason: format!("`{field}` must not be empty"),
        });
    }
    Ok(())
}
