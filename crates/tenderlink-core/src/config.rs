use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RecordType;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("{name} must be positive")]
    NonPositive { name: &'static str },
    #[error("record type {record_type} is configured as both tender and award")]
    OverlappingEventTypes { record_type: RecordType },
    #[error("{name} must list at least one record type")]
    EmptyEventTypes { name: &'static str },
}

/// Tunable policy for grouping and linking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Minimum similarity for two cores to share a cluster.
    pub threshold: f64,
    /// Characters of the core used as the bucket key.
    pub prefix_len: usize,
    /// Buckets above this size skip similarity and emit singletons.
    pub max_bucket_size: usize,
    /// Inter-cluster merge rounds; each round merges at most one pair.
    pub merge_rounds: usize,
    /// Length ratio below which similarity is 0 without comparing.
    pub length_reject_ratio: f64,
    /// Length ratio at which a contained core gets `substring_score`.
    pub substring_min_ratio: f64,
    pub substring_score: f64,
    pub tender_types: BTreeSet<RecordType>,
    pub award_types: BTreeSet<RecordType>,
    /// Customer label used for records without one.
    pub unknown_customer: String,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            threshold: 0.88,
            prefix_len: 8,
            max_bucket_size: 80,
            merge_rounds: 2,
            length_reject_ratio: 0.5,
            substring_min_ratio: 0.8,
            substring_score: 0.9,
            tender_types: BTreeSet::from([
                RecordType::TenderAnnouncement,
                RecordType::PurchaseNotice,
                RecordType::CompetitiveNegotiation,
                RecordType::CompetitiveConsultation,
                RecordType::Inquiry,
            ]),
            award_types: BTreeSet::from([
                RecordType::AwardAnnouncement,
                RecordType::AwardCandidateNotice,
                RecordType::TransactionResult,
                RecordType::TransactionNotice,
                RecordType::ResultPublicity,
            ]),
            unknown_customer: "unknown".to_string(),
        }
    }
}

impl ResolveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("threshold", self.threshold),
            ("length_reject_ratio", self.length_reject_ratio),
            ("substring_min_ratio", self.substring_min_ratio),
            ("substring_score", self.substring_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.prefix_len == 0 {
            return Err(ConfigError::NonPositive { name: "prefix_len" });
        }
        if self.max_bucket_size == 0 {
            return Err(ConfigError::NonPositive {
                name: "max_bucket_size",
            });
        }
        if self.tender_types.is_empty() {
            return Err(ConfigError::EmptyEventTypes {
                name: "tender_types",
            });
        }
        if self.award_types.is_empty() {
            return Err(ConfigError::EmptyEventTypes {
                name: "award_types",
            });
        }
        if let Some(&record_type) = self.tender_types.intersection(&self.award_types).next() {
            return Err(ConfigError::OverlappingEventTypes { record_type });
        }
        Ok(())
    }

    pub fn is_tender(&self, record_type: RecordType) -> bool {
        self.tender_types.contains(&record_type)
    }

    pub fn is_award(&self, record_type: RecordType) -> bool {
        self.award_types.contains(&record_type)
    }
}
