//! Byzantine-tolerant consensus validation.
//!
//! A round admits signed validator votes, strips the ones that cannot be
//! trusted (bad signatures, confidence far outside the batch distribution),
//! checks the malicious fraction against the Byzantine bound, and tallies
//! the rest into a signed, verifiable result. An honest FAIL vote is never
//! treated as malicious; only statistical divergence or a broken signature
//! excludes a validator.

pub mod types;
pub mod validator;

pub use types::{ConsensusProof, ConsensusResult, ValidatorVote, VoteDecision, VotingBreakdown};
pub use validator::{ConsensusValidator, SharedConsensusValidator};

/// Error type for consensus operations
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("insufficient validators: got {got}, need {need}")]
    InsufficientValidators { got: usize, need: usize },

    #[error(
        "malicious ratio {ratio:.2} exceeds bound {max_ratio:.2} in round {round_id} \
         ({malicious} of {total} votes)"
    )]
    MaliciousRatioExceeded {
        round_id: String,
        ratio: f64,
        max_ratio: f64,
        malicious: usize,
        total: usize,
    },

    #[error("no shared secret configured")]
    MissingSecret,
}

/// Result type for consensus operations
pub type RoundResult<T> = Result<T, ConsensusError>;
