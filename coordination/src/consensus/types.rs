//! Consensus vote and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::SignatureKey;

/// A validator's verdict on the proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteDecision {
    Pass,
    Fail,
}

impl std::fmt::Display for VoteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteDecision::Pass => write!(f, "PASS"),
            VoteDecision::Fail => write!(f, "FAIL"),
        }
    }
}

/// One validator's vote in a consensus round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorVote {
    pub agent_id: String,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    pub decision: VoteDecision,
    /// HMAC over `agent_id:decision:confidence:timestamp`.
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ValidatorVote {
    /// Build a signed vote.
    pub fn signed(
        key: &SignatureKey,
        agent_id: impl Into<String>,
        decision: VoteDecision,
        confidence: f64,
        reasoning: Option<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        let timestamp = Utc::now();
        let parts = signing_parts(&agent_id, decision, confidence, timestamp);
        let signature = key.sign(&parts.each_ref().map(String::as_str));
        Self {
            agent_id,
            confidence,
            decision,
            signature,
            timestamp,
            reasoning,
        }
    }

    /// Check this vote's signature.
    pub fn verify(&self, key: &SignatureKey) -> bool {
        let parts = signing_parts(&self.agent_id, self.decision, self.confidence, self.timestamp);
        !self.signature.is_empty()
            && key.verify(&parts.each_ref().map(String::as_str), &self.signature)
    }
}

fn signing_parts(
    agent_id: &str,
    decision: VoteDecision,
    confidence: f64,
    timestamp: DateTime<Utc>,
) -> [String; 4] {
    [
        agent_id.to_string(),
        decision.to_string(),
        format!("{confidence:.4}"),
        timestamp.timestamp_millis().to_string(),
    ]
}

/// Vote counts after exclusions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingBreakdown {
    pub pass: usize,
    pub fail: usize,
}

/// Verifiable summary of a completed round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusProof {
    /// SHA-256 over the surviving votes.
    pub proposal_hash: String,
    pub total_votes: usize,
    pub accepting_votes: usize,
    /// HMAC binding round id, hash, and counts.
    pub signature: String,
}

/// Outcome of a consensus round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_achieved: bool,
    /// Confidence-weighted pass ratio over surviving votes.
    pub consensus_score: f64,
    /// Plain pass ratio over surviving votes.
    pub pass_ratio: f64,
    pub malicious_agents: Vec<String>,
    pub valid_votes: usize,
    pub breakdown: VotingBreakdown,
    pub proof: ConsensusProof,
}
