//! Block validity predicates.
//!
//! Validation is split along who is allowed to decide:
//!
//! - [`HeaderValidator`] is the pluggable consensus seam: whatever
//!   consensus algorithm produces blocks decides whether a header is
//!   acceptable relative to the current best block.
//! - [`base`] holds the chain core's own checks: structural header
//!   limits, full body verification for peer-supplied blocks, and the
//!   stateful nonce-monotonicity check.

pub mod base;

pub use base::{check_tx_nonces, check_tx_nonces_from, verify_block_body, BasicHeaderValidity};

use crate::error::CoreError;
use crate::types::Block;

/// Pluggable consensus-header validity predicate.
///
/// Implementations should be deterministic and side-effect free. `best`
/// is the current best block at the time the candidate arrived.
pub trait HeaderValidator: Send + 'static {
    fn is_block_valid(&self, block: &Block, best: &Block) -> Result<(), CoreError>;
}

/// A trivial validator that accepts every header.
///
/// Useful for tests and for isolating the ingestion pipeline while the
/// real consensus predicate is developed elsewhere.
pub struct AcceptAllHeaders;

impl HeaderValidator for AcceptAllHeaders {
    fn is_block_valid(&self, _block: &Block, _best: &Block) -> Result<(), CoreError> {
        Ok(())
    }
}

/// A validator that composes two other validators, failing fast on the
/// first error.
pub struct CombinedValidator<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> CombinedValidator<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> HeaderValidator for CombinedValidator<A, B>
where
    A: HeaderValidator,
    B: HeaderValidator,
{
    fn is_block_valid(&self, block: &Block, best: &Block) -> Result<(), CoreError> {
        self.first.is_block_valid(block, best)?;
        self.second.is_block_valid(block, best)?;
        Ok(())
    }
}
