//! Error types for batch allocation and ID generation.
//!
//! [`Error`] is what every public operation returns. It is `Clone` so a single
//! failed refill can be reported to every waiter and carried across the gRPC
//! boundary without losing its kind.
//!
//! ## Error Cases
//! - `UnconfiguredTag`: no step size is configured for the tag.
//! - `InvalidTag`: the tag name cannot be used as a sequence namespace.
//! - `AllocationUnavailable`: a batch could not be reserved (storage failure,
//!   contention limit, or transport failure).
//! - `SequenceExhausted`: the `u64` space of a key is used up.
//! - `InvalidRequest`: the call asked for more than the generator serves at
//!   once.
//! - `Configuration`: contradictory topology or malformed tag configuration.

/// A result type defaulting to the crate [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that allocation and generation can surface.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The tag has no step configuration.
    #[error("Tag `{tag}` is not configured")]
    UnconfiguredTag { tag: String },

    /// The tag name is empty, too long, or contains unsupported characters.
    #[error("Invalid tag `{tag}`: {reason}")]
    InvalidTag { tag: String, reason: String },

    /// A batch could not be produced. Nothing was handed out.
    #[error("Allocation unavailable: {reason}")]
    AllocationUnavailable { reason: String },

    /// Reserving another batch would overflow the key's `u64` space.
    #[error("Sequence for tag `{tag}` is exhausted")]
    SequenceExhausted { tag: String },

    /// The arguments of a call are outside what the generator accepts.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Startup configuration is contradictory or incomplete.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl Error {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::AllocationUnavailable {
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
