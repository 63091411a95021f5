//! Quality oracle: scores a produce lot by comparing the producer's IoT
//! readings with the physical sample a validator took.
//!
//! The oracle is a trait so a learned model can replace the weighted
//! reference scorer. Whatever the implementation, the contract is the same:
//! a score in `[0, 100]`, a decision, and a human-readable reason.

use crate::config::AI_AUTO_APPROVE_THRESHOLD;
use crate::transaction::{QualityDecision, Vote};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Below this score the oracle rejects outright.
pub const NEEDS_REVIEW_SCORE: u32 = 50;

const PRODUCER_FRAUD_MIN_HISTORY: usize = 5;
const PRODUCER_FRAUD_REJECT_RATE: f64 = 0.4;
const VALIDATOR_FRAUD_MIN_HISTORY: usize = 10;
const VALIDATOR_FRAUD_LOW_QUALITY_RATE: f64 = 0.3;

/// One set of environmental readings, either streamed by the producer's
/// sensors or measured on a physical sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness: Option<f64>,
}

impl SensorReading {
    pub fn new(temperature: f64, humidity: f64, freshness: f64) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
            freshness: Some(freshness),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OracleDecision {
    AutoApprove,
    NeedsReview,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessment {
    pub quality_score: u32,
    pub decision: OracleDecision,
    pub reason: String,
}

impl QualityAssessment {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            quality_score: 0,
            decision: OracleDecision::Reject,
            reason: reason.into(),
        }
    }
}

pub trait QualityOracle: Send + Sync {
    /// Score a lot. `history` holds the producer's earlier decisions and feeds
    /// the fraud heuristic.
    fn evaluate(
        &self,
        iot: Option<&SensorReading>,
        sample: Option<&SensorReading>,
        producer_id: &str,
        history: &[QualityDecision],
    ) -> QualityAssessment;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityWeights {
    pub temperature: f64,
    pub humidity: f64,
    pub freshness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            humidity: 0.2,
            freshness: 0.5,
        }
    }
}

/// Deterministic reference oracle. Each field present in both readings
/// contributes `max(0, 100 - 2 * |iot - sample|)` times its weight.
#[derive(Debug, Clone, Default)]
pub struct WeightedQualityOracle {
    weights: QualityWeights,
}

impl WeightedQualityOracle {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, iot: &SensorReading, sample: &SensorReading) -> u32 {
        let fields = [
            ("temperature", iot.temperature, sample.temperature, self.weights.temperature),
            ("humidity", iot.humidity, sample.humidity, self.weights.humidity),
            ("freshness", iot.freshness, sample.freshness, self.weights.freshness),
        ];

        let mut weighted = 0.0;
        for (name, iot_value, sample_value, weight) in fields {
            match (iot_value, sample_value) {
                (Some(a), Some(b)) => {
                    let match_score = (100.0 - (a - b).abs() * 2.0).max(0.0);
                    weighted += match_score * weight;
                }
                _ => debug!(field = name, "Reading missing from one dataset"),
            }
        }

        weighted.round().clamp(0.0, 100.0) as u32
    }
}

impl QualityOracle for WeightedQualityOracle {
    fn evaluate(
        &self,
        iot: Option<&SensorReading>,
        sample: Option<&SensorReading>,
        producer_id: &str,
        history: &[QualityDecision],
    ) -> QualityAssessment {
        let (Some(iot), Some(sample)) = (iot, sample) else {
            return QualityAssessment::rejected("Missing IoT or sample data.");
        };

        let quality_score = self.score(iot, sample);

        if let Some(reason) = detect_producer_fraud(producer_id, history) {
            return QualityAssessment {
                quality_score,
                decision: OracleDecision::Reject,
                reason,
            };
        }

        let (decision, reason) = if quality_score >= AI_AUTO_APPROVE_THRESHOLD {
            (OracleDecision::AutoApprove, "IoT data closely matches physical sample.")
        } else if quality_score >= NEEDS_REVIEW_SCORE {
            (
                OracleDecision::NeedsReview,
                "Moderate difference detected. More validator input needed.",
            )
        } else {
            (OracleDecision::Reject, "Significant mismatch between IoT and sample data.")
        };

        QualityAssessment {
            quality_score,
            decision,
            reason: reason.to_string(),
        }
    }
}

/// Flags a producer whose history is long enough and rejected too often.
pub fn detect_producer_fraud(producer_id: &str, history: &[QualityDecision]) -> Option<String> {
    let total = history.len();
    if total <= PRODUCER_FRAUD_MIN_HISTORY {
        return None;
    }
    let rejected = history
        .iter()
        .filter(|d| **d == QualityDecision::Rejected)
        .count();
    if rejected as f64 / total as f64 > PRODUCER_FRAUD_REJECT_RATE {
        warn!(producer = producer_id, rejected, total, "Producer flagged for high rejection rate");
        return Some("Producer has a high rejection rate.".to_string());
    }
    None
}

/// A vote a validator cast together with the score the lot finally received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub quality_score: u32,
    pub vote: Vote,
}

/// Flags a validator that keeps approving low-quality produce.
pub fn detect_validator_fraud(validator_id: &str, records: &[ValidationRecord]) -> Option<String> {
    let total = records.len();
    if total <= VALIDATOR_FRAUD_MIN_HISTORY {
        return None;
    }
    let approved_low_quality = records
        .iter()
        .filter(|r| r.quality_score < NEEDS_REVIEW_SCORE && r.vote == Vote::Approved)
        .count();
    if approved_low_quality as f64 / total as f64 > VALIDATOR_FRAUD_LOW_QUALITY_RATE {
        warn!(
            validator = validator_id,
            approved_low_quality, total, "Validator flagged for approving low-quality produce"
        );
        return Some("Validator is approving poor-quality produce too frequently.".to_string());
    }
    None
}
