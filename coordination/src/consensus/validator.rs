//! Consensus round execution.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::types::{
    ConsensusProof, ConsensusResult, ValidatorVote, VoteDecision, VotingBreakdown,
};
use super::{ConsensusError, RoundResult};
use crate::config::CoordinationConfig;
use crate::events::{CoordinationEvent, ExclusionReason, SharedEventBus};
use crate::signal::SignatureKey;

/// Z-score above which a confidence value is treated as an outlier.
const OUTLIER_Z: f64 = 2.0;
/// Below this the batch stddev is considered degenerate and no outliers
/// are declared.
const MIN_STDDEV: f64 = 1e-9;

/// Shared reference to ConsensusValidator
pub type SharedConsensusValidator = Arc<ConsensusValidator>;

/// Byzantine-tolerant vote validator.
///
/// Rounds run sequentially; the cumulative set of agents ever excluded as
/// malicious is readable between rounds.
pub struct ConsensusValidator {
    config: CoordinationConfig,
    key: SignatureKey,
    bus: SharedEventBus,
    known_malicious: Mutex<HashSet<String>>,
}

impl ConsensusValidator {
    pub fn new(bus: SharedEventBus, config: CoordinationConfig) -> RoundResult<Self> {
        let key = SignatureKey::new(&config.shared_secret)
            .map_err(|_| ConsensusError::MissingSecret)?;
        Ok(Self {
            config,
            key,
            bus,
            known_malicious: Mutex::new(HashSet::new()),
        })
    }

    /// Create a shared reference to this validator
    pub fn shared(self) -> SharedConsensusValidator {
        Arc::new(self)
    }

    /// The signing key, for building votes that this validator will accept.
    pub fn signature_key(&self) -> &SignatureKey {
        &self.key
    }

    /// Every agent ever excluded as malicious, across rounds.
    pub fn known_malicious(&self) -> HashSet<String> {
        self.known_malicious.lock().expect("lock poisoned").clone()
    }

    fn emit(&self, event: CoordinationEvent) {
        let _ = self.bus.publish(event);
    }

    fn exclude(&self, round_id: &str, agent_id: &str, reason: ExclusionReason) {
        warn!(round_id, agent_id, %reason, "Vote excluded as malicious");
        self.emit(CoordinationEvent::MaliciousExcluded {
            round_id: round_id.to_string(),
            agent_id: agent_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }

    /// Run one consensus round over the given votes.
    pub fn execute_consensus(
        &self,
        round_id: &str,
        votes: &[ValidatorVote],
    ) -> RoundResult<ConsensusResult> {
        if votes.len() < self.config.min_validators {
            return Err(ConsensusError::InsufficientValidators {
                got: votes.len(),
                need: self.config.min_validators,
            });
        }

        let mut malicious: Vec<String> = Vec::new();
        let mut survivors: Vec<&ValidatorVote> = Vec::new();

        for vote in votes {
            if self.config.signature_validation && !vote.verify(&self.key) {
                self.exclude(round_id, &vote.agent_id, ExclusionReason::InvalidSignature);
                malicious.push(vote.agent_id.clone());
                continue;
            }
            if !vote.confidence.is_finite() {
                // Unusable for statistics, but not evidence of malice
                warn!(round_id, agent_id = %vote.agent_id, "Dropping vote with non-finite confidence");
                continue;
            }
            survivors.push(vote);
        }

        for (agent_id, z_score) in confidence_outliers(&survivors) {
            self.exclude(
                round_id,
                &agent_id,
                ExclusionReason::ConfidenceOutlier { z_score },
            );
            malicious.push(agent_id);
        }
        survivors.retain(|vote| !malicious.contains(&vote.agent_id));

        {
            let mut known = self.known_malicious.lock().expect("lock poisoned");
            known.extend(malicious.iter().cloned());
        }

        let ratio = malicious.len() as f64 / votes.len() as f64;
        if ratio > self.config.max_malicious_ratio {
            return Err(ConsensusError::MaliciousRatioExceeded {
                round_id: round_id.to_string(),
                ratio,
                max_ratio: self.config.max_malicious_ratio,
                malicious: malicious.len(),
                total: votes.len(),
            });
        }

        let breakdown = VotingBreakdown {
            pass: survivors
                .iter()
                .filter(|v| v.decision == VoteDecision::Pass)
                .count(),
            fail: survivors
                .iter()
                .filter(|v| v.decision == VoteDecision::Fail)
                .count(),
        };

        let pass_ratio = if survivors.is_empty() {
            0.0
        } else {
            breakdown.pass as f64 / survivors.len() as f64
        };
        let total_confidence: f64 = survivors.iter().map(|v| v.confidence).sum();
        let pass_confidence: f64 = survivors
            .iter()
            .filter(|v| v.decision == VoteDecision::Pass)
            .map(|v| v.confidence)
            .sum();
        let consensus_score = if total_confidence > 0.0 {
            pass_confidence / total_confidence
        } else {
            0.0
        };
        let consensus_achieved = pass_ratio >= self.config.consensus_threshold;

        let proof = self.build_proof(round_id, &survivors, breakdown.pass)?;

        if consensus_achieved {
            info!(round_id, consensus_score, pass_ratio, "Consensus achieved");
            self.emit(CoordinationEvent::ConsensusAchieved {
                round_id: round_id.to_string(),
                consensus_score,
                pass_ratio,
                total_votes: survivors.len(),
                timestamp: Utc::now(),
            });
        } else {
            info!(round_id, pass_ratio, "Consensus not reached");
        }

        Ok(ConsensusResult {
            consensus_achieved,
            consensus_score,
            pass_ratio,
            malicious_agents: malicious,
            valid_votes: survivors.len(),
            breakdown,
            proof,
        })
    }

    fn build_proof(
        &self,
        round_id: &str,
        survivors: &[&ValidatorVote],
        accepting_votes: usize,
    ) -> RoundResult<ConsensusProof> {
        let canonical = serde_json::to_string(survivors).unwrap_or_default();
        let proposal_hash = hex::encode(Sha256::digest(canonical.as_bytes()));
        let total = survivors.len().to_string();
        let accepting = accepting_votes.to_string();
        let signature = self
            .key
            .sign(&[round_id, &proposal_hash, &total, &accepting]);
        Ok(ConsensusProof {
            proposal_hash,
            total_votes: survivors.len(),
            accepting_votes,
            signature,
        })
    }
}

/// Find confidence outliers among the surviving votes.
///
/// A vote is an outlier when its confidence sits more than [`OUTLIER_Z`]
/// batch standard deviations away from the mean of the *other* votes.
/// Comparing against the leave-one-out mean keeps a single divergent value
/// from dragging the reference point toward itself.
fn confidence_outliers(survivors: &[&ValidatorVote]) -> Vec<(String, f64)> {
    if survivors.len() < 3 {
        return Vec::new();
    }
    let n = survivors.len() as f64;
    let confidences: Vec<f64> = survivors.iter().map(|v| v.confidence).collect();
    let mean: f64 = confidences.iter().sum::<f64>() / n;
    let variance: f64 = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev < MIN_STDDEV {
        return Vec::new();
    }

    let total: f64 = confidences.iter().sum();
    survivors
        .iter()
        .zip(&confidences)
        .filter_map(|(vote, &c)| {
            let mean_of_others = (total - c) / (n - 1.0);
            let z = (c - mean_of_others).abs() / stddev;
            (z > OUTLIER_Z).then(|| (vote.agent_id.clone(), z))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn validator() -> ConsensusValidator {
        let bus = EventBus::new().shared();
        ConsensusValidator::new(bus, CoordinationConfig::with_secret("test-secret")).unwrap()
    }

    fn vote(
        validator: &ConsensusValidator,
        agent_id: &str,
        decision: VoteDecision,
        confidence: f64,
    ) -> ValidatorVote {
        ValidatorVote::signed(validator.signature_key(), agent_id, decision, confidence, None)
    }

    #[test]
    fn test_too_few_votes() {
        let validator = validator();
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.9),
            vote(&validator, "a2", VoteDecision::Pass, 0.9),
            vote(&validator, "a3", VoteDecision::Pass, 0.9),
        ];
        let err = validator.execute_consensus("r1", &votes).unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::InsufficientValidators { got: 3, need: 4 }
        ));
    }

    #[test]
    fn test_unanimous_pass() {
        let validator = validator();
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.92),
            vote(&validator, "a2", VoteDecision::Pass, 0.94),
            vote(&validator, "a3", VoteDecision::Pass, 0.96),
            vote(&validator, "a4", VoteDecision::Pass, 0.98),
        ];
        let result = validator.execute_consensus("r1", &votes).unwrap();
        assert!(result.consensus_achieved);
        assert!(result.malicious_agents.is_empty());
        assert_eq!(result.valid_votes, 4);
        assert!(result.consensus_score > 0.9);
        assert_eq!(result.breakdown, VotingBreakdown { pass: 4, fail: 0 });
    }

    #[test]
    fn test_honest_dissent_is_not_malicious() {
        let validator = validator();
        // Disagreement with a confident, in-distribution FAIL vote
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.90),
            vote(&validator, "a2", VoteDecision::Pass, 0.88),
            vote(&validator, "a3", VoteDecision::Fail, 0.86),
            vote(&validator, "a4", VoteDecision::Pass, 0.92),
        ];
        let result = validator.execute_consensus("r1", &votes).unwrap();
        assert!(result.malicious_agents.is_empty());
        assert_eq!(result.breakdown.fail, 1);
        assert!(result.consensus_achieved);
    }

    #[test]
    fn test_low_confidence_outlier_excluded() {
        let validator = validator();
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.88),
            vote(&validator, "a2", VoteDecision::Pass, 0.90),
            vote(&validator, "a3", VoteDecision::Pass, 0.95),
            vote(&validator, "outlier", VoteDecision::Fail, 0.25),
        ];
        let result = validator.execute_consensus("r1", &votes).unwrap();
        assert_eq!(result.malicious_agents, vec!["outlier".to_string()]);
        assert_eq!(result.valid_votes, 3);
        assert!(result.consensus_achieved);
        assert!(validator.known_malicious().contains("outlier"));
    }

    #[test]
    fn test_unsigned_votes_excluded() {
        let validator = validator();
        let mut bad = vote(&validator, "forger", VoteDecision::Pass, 0.9);
        bad.signature = String::new();
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.9),
            vote(&validator, "a2", VoteDecision::Pass, 0.91),
            vote(&validator, "a3", VoteDecision::Pass, 0.92),
            bad,
        ];
        let result = validator.execute_consensus("r1", &votes).unwrap();
        assert_eq!(result.malicious_agents, vec!["forger".to_string()]);
        assert_eq!(result.valid_votes, 3);
    }

    #[test]
    fn test_byzantine_bound_aborts_round() {
        let validator = validator();
        let mut bad1 = vote(&validator, "m1", VoteDecision::Pass, 0.9);
        bad1.signature = String::new();
        let mut bad2 = vote(&validator, "m2", VoteDecision::Pass, 0.9);
        bad2.signature = String::new();
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.9),
            vote(&validator, "a2", VoteDecision::Pass, 0.91),
            bad1,
            bad2,
        ];
        let err = validator.execute_consensus("r1", &votes).unwrap_err();
        match err {
            ConsensusError::MaliciousRatioExceeded {
                malicious, total, ..
            } => {
                assert_eq!(malicious, 2);
                assert_eq!(total, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Exclusions are remembered even though the round aborted
        let known = validator.known_malicious();
        assert!(known.contains("m1") && known.contains("m2"));
    }

    #[test]
    fn test_nan_confidence_dropped_not_malicious() {
        let validator = validator();
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.9),
            vote(&validator, "a2", VoteDecision::Pass, 0.91),
            vote(&validator, "a3", VoteDecision::Pass, 0.92),
            vote(&validator, "broken", VoteDecision::Pass, f64::NAN),
        ];
        let result = validator.execute_consensus("r1", &votes).unwrap();
        assert!(result.malicious_agents.is_empty());
        assert_eq!(result.valid_votes, 3);
        assert!(!validator.known_malicious().contains("broken"));
    }

    #[test]
    fn test_identical_confidences_have_no_outliers() {
        let validator = validator();
        let votes: Vec<_> = (1..=4)
            .map(|i| vote(&validator, &format!("a{i}"), VoteDecision::Pass, 0.9))
            .collect();
        let result = validator.execute_consensus("r1", &votes).unwrap();
        assert!(result.malicious_agents.is_empty());
        assert!(result.consensus_achieved);
    }

    #[test]
    fn test_proof_binds_round_and_votes() {
        let validator = validator();
        let votes = vec![
            vote(&validator, "a1", VoteDecision::Pass, 0.9),
            vote(&validator, "a2", VoteDecision::Pass, 0.91),
            vote(&validator, "a3", VoteDecision::Fail, 0.89),
            vote(&validator, "a4", VoteDecision::Pass, 0.92),
        ];
        let result = validator.execute_consensus("r1", &votes).unwrap();
        let proof = &result.proof;
        assert_eq!(proof.total_votes, 4);
        assert_eq!(proof.accepting_votes, 3);
        assert_eq!(proof.proposal_hash.len(), 64);
        assert!(validator.signature_key().verify(
            &[
                "r1",
                &proof.proposal_hash,
                &proof.total_votes.to_string(),
                &proof.accepting_votes.to_string(),
            ],
            &proof.signature,
        ));
    }
}
