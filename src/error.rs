//! Error kinds produced by the chain core.
//!
//! All errors are structured values carrying a kind and enough context to
//! act on programmatically; they are stringified only for logging. The
//! kinds mirror the failure policy of the core:
//!
//! - `InvalidBlock` / `OrphanRequired` / `BranchBlock` describe the fate of
//!   an ingested block,
//! - `NotFound` / `InvalidSequence` / `InvalidArgument` are precondition
//!   failures on lookups and state transitions,
//! - `Store` wraps the persistence layer,
//! - `Timeout` surfaces an expired actor request,
//! - `Fatal` signals chain-db / state-db divergence and halts the service.

use std::fmt;

use crate::storage::StorageError;

/// Error type shared by every component of the chain core.
#[derive(Debug)]
pub enum CoreError {
    /// Header, signature, or body mismatch.
    InvalidBlock(String),
    /// The block's parent is missing; expected during sync.
    OrphanRequired,
    /// The target is valid but not on the main chain.
    BranchBlock(String),
    /// A lookup failed; the payload names the entity kind.
    NotFound(&'static str),
    /// A state-db apply/rollback precondition was violated.
    InvalidSequence(String),
    /// Caller passed an argument the operation rejects outright.
    InvalidArgument(&'static str),
    /// Persistence-layer failure.
    Store(StorageError),
    /// An actor request exceeded its deadline.
    Timeout(&'static str),
    /// Unrecoverable divergence; the process must not continue.
    Fatal(String),
}

impl CoreError {
    /// Returns `true` if the service must halt on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal(_))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidBlock(msg) => write!(f, "invalid block: {msg}"),
            CoreError::OrphanRequired => write!(f, "block parent missing, parked as orphan"),
            CoreError::BranchBlock(msg) => write!(f, "not on main chain: {msg}"),
            CoreError::NotFound(what) => write!(f, "{what} not found"),
            CoreError::InvalidSequence(msg) => write!(f, "invalid sequence: {msg}"),
            CoreError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            CoreError::Store(e) => write!(f, "store failure: {e}"),
            CoreError::Timeout(what) => write!(f, "request timed out: {what}"),
            CoreError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        CoreError::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn display_invalid_block() {
        let err = CoreError::InvalidBlock("txs root mismatch".to_string());
        assert_eq!(err.to_string(), "invalid block: txs root mismatch");
    }

    #[test]
    fn display_not_found_names_entity() {
        let err = CoreError::NotFound("block");
        assert_eq!(err.to_string(), "block not found");
    }

    #[test]
    fn storage_error_converts_to_store_kind() {
        let e: CoreError = StorageError::MissingColumnFamily("blocks").into();
        match e {
            CoreError::Store(_) => {}
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn only_fatal_is_fatal() {
        assert!(CoreError::Fatal("divergence".to_string()).is_fatal());
        assert!(!CoreError::OrphanRequired.is_fatal());
        assert!(!CoreError::Timeout("mempool").is_fatal());
    }

    #[test]
    fn core_error_implements_std_error() {
        fn assert_is_error<E: StdError>() {}
        assert_is_error::<CoreError>();
    }
}
