//! Project grouping: canonicalise titles, cluster them per customer and derive project ids.

use std::collections::HashMap;

use tenderlink_core::{AnnotatedRecord, ConfigError, Record, ResolveConfig};
use tracing::{info, info_span};

pub mod canonical;
pub mod cluster;
pub mod identity;
pub mod round;
pub mod similarity;

pub use canonical::{canonicalize, normalize_text};
pub use cluster::{cluster_customer, BucketedClusterer, Cluster, ClusterSettings, ClusterStats};
pub use identity::{assign_ids, project_id, CustomerKey, ProjectIndex, PROJECT_ID_LEN};
pub use round::parse_tender_round;
pub use similarity::{similarity, SimilarityCache, SimilarityPolicy};

pub const CRATE_NAME: &str = "tenderlink-group";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSummary {
    pub records: usize,
    pub customers: usize,
    pub unique_cores: usize,
    pub clusters: usize,
    pub oversized_buckets: usize,
    pub merges: usize,
}

#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub records: Vec<AnnotatedRecord>,
    pub clusters: Vec<Cluster>,
    pub summary: GroupSummary,
}

/// Assigns a `project_id` and effective `tender_round` to every record.
pub struct ProjectGrouper {
    config: ResolveConfig,
    settings: ClusterSettings,
}

impl ProjectGrouper {
    pub fn new(config: ResolveConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let settings = ClusterSettings::from(&config);
        Ok(Self { config, settings })
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    /// Grouping key for a record's customer. Absent and blank customers share
    /// [`CustomerKey::Unknown`], apart from any customer named like the unknown label.
    pub fn customer_key(&self, record: &Record) -> CustomerKey {
        CustomerKey::from_name(record.customer.as_deref())
    }

    /// Display name for a key: the normalised customer, or `unknown_customer`.
    pub fn customer_label<'a>(&'a self, key: &'a CustomerKey) -> &'a str {
        key.label(&self.config.unknown_customer)
    }

    pub fn group(&self, records: Vec<Record>) -> GroupOutcome {
        let _span = info_span!("group", records = records.len()).entered();

        let keyed: Vec<(CustomerKey, String)> = records
            .iter()
            .map(|record| {
                let customer = self.customer_key(record);
                let core = canonicalize(
                    &record.project_name_core,
                    record.customer.as_deref().unwrap_or_default(),
                );
                (customer, core)
            })
            .collect();

        let mut customers: Vec<(CustomerKey, Vec<String>)> = Vec::new();
        let mut slots: HashMap<&CustomerKey, usize> = HashMap::new();
        for (customer, core) in &keyed {
            let slot = *slots.entry(customer).or_insert_with(|| {
                customers.push((customer.clone(), Vec::new()));
                customers.len() - 1
            });
            customers[slot].1.push(core.clone());
        }

        let clusterer = BucketedClusterer::new(self.settings);
        let mut summary = GroupSummary {
            records: records.len(),
            customers: customers.len(),
            ..Default::default()
        };
        let mut clusters = Vec::new();
        for (customer, cores) in &customers {
            // One cache per customer keeps partitions independent.
            let mut cache = SimilarityCache::new();
            let (found, stats) = clusterer.cluster(customer, cores, &mut cache);
            summary.unique_cores += stats.unique_cores;
            summary.oversized_buckets += stats.oversized_buckets;
            summary.merges += stats.merges;
            clusters.extend(found);
        }
        summary.clusters = clusters.len();

        let index = assign_ids(&clusters);
        let annotated = records
            .into_iter()
            .zip(keyed)
            .map(|(mut record, (customer, core))| {
                let id = index
                    .get(&customer, &core)
                    .map(str::to_string)
                    .unwrap_or_else(|| customer.project_id(&core));
                record.tender_round = Some(
                    record
                        .tender_round
                        .unwrap_or_else(|| parse_tender_round(&record.title)),
                );
                AnnotatedRecord::new(record, id)
            })
            .collect();

        info!(
            customers = summary.customers,
            unique_cores = summary.unique_cores,
            clusters = summary.clusters,
            oversized_buckets = summary.oversized_buckets,
            "assigned project ids"
        );

        GroupOutcome {
            records: annotated,
            clusters,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderlink_core::RecordType;

    fn mk_record(row_id: &str, customer: Option<&str>, core: &str) -> Record {
        Record {
            row_id: row_id.to_string(),
            customer: customer.map(str::to_string),
            record_type: RecordType::TenderAnnouncement,
            title: format!("{core}招标公告"),
            project_name_core: core.to_string(),
            ..Default::default()
        }
    }

    fn grouper() -> ProjectGrouper {
        ProjectGrouper::new(ResolveConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_is_reported_at_construction() {
        let err = ProjectGrouper::new(ResolveConfig {
            threshold: -0.1,
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::ThresholdOutOfRange { name: "threshold", .. }));
    }

    #[test]
    fn variants_of_one_title_share_a_project_id() {
        let outcome = grouper().group(vec![
            mk_record("R0", Some("某市医院"), "2024-ZB-0012 人工智能平台建设项目"),
            mk_record("R1", Some("某市医院"), "某市医院智能平台建设项目"),
            mk_record("R2", Some("某市医院"), "门诊楼装修工程"),
        ]);
        let ids: Vec<&str> = outcome.records.iter().map(|r| r.project_id.as_str()).collect();
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_eq!(ids[0], project_id("某市医院", "人工智能平台建设项目"));
        assert_eq!(outcome.summary.clusters, 2);
    }

    #[test]
    fn identical_titles_never_merge_across_customers() {
        let outcome = grouper().group(vec![
            mk_record("R0", Some("某市医院"), "门诊楼装修工程"),
            mk_record("R1", Some("某区医院"), "门诊楼装修工程"),
        ]);
        assert_ne!(outcome.records[0].project_id, outcome.records[1].project_id);
        assert_eq!(outcome.summary.customers, 2);
        assert_eq!(outcome.summary.clusters, 2);
    }

    #[test]
    fn missing_customer_groups_under_unknown() {
        let outcome = grouper().group(vec![
            mk_record("R0", None, "门诊楼装修工程"),
            mk_record("R1", Some("  "), "门诊楼装修工程"),
            mk_record("R2", Some("unknown-hospital"), "门诊楼装修工程"),
        ]);
        assert_eq!(outcome.records[0].project_id, outcome.records[1].project_id);
        assert_ne!(outcome.records[0].project_id, outcome.records[2].project_id);
        assert_eq!(
            outcome.records[0].project_id,
            CustomerKey::Unknown.project_id("门诊楼装修工程")
        );
    }

    #[test]
    fn customer_named_unknown_stays_apart_from_missing_customers() {
        let grouper = grouper();
        let records = vec![
            mk_record("R0", None, "门诊楼装修工程"),
            mk_record("R1", Some("unknown"), "门诊楼装修工程"),
        ];
        assert_eq!(grouper.customer_key(&records[0]), CustomerKey::Unknown);
        assert_eq!(grouper.customer_label(&grouper.customer_key(&records[1])), "unknown");

        let outcome = grouper.group(records);
        assert_ne!(outcome.records[0].project_id, outcome.records[1].project_id);
        assert_eq!(outcome.summary.customers, 2);
        assert_eq!(outcome.summary.clusters, 2);
        assert_eq!(outcome.records[1].project_id, project_id("unknown", "门诊楼装修工程"));
    }

    #[test]
    fn tender_round_is_parsed_unless_supplied() {
        let mut explicit = mk_record("R1", Some("某局"), "办公家具采购");
        explicit.tender_round = Some(5);
        let mut parsed = mk_record("R0", Some("某局"), "办公家具采购");
        parsed.title = "办公家具采购（第二次）招标公告".to_string();
        let outcome = grouper().group(vec![parsed, explicit]);
        assert_eq!(outcome.records[0].record.tender_round, Some(2));
        assert_eq!(outcome.records[1].record.tender_round, Some(5));
    }

    #[test]
    fn regrouping_reproduces_ids() {
        let input = vec![
            mk_record("R0", Some("某市医院"), "人工智能平台建设项目"),
            mk_record("R1", Some("某市医院"), "智能平台建设项目"),
            mk_record("R2", Some("某局"), "办公家具采购"),
        ];
        let a = grouper().group(input.clone());
        let b = grouper().group(input);
        assert_eq!(a.records, b.records);
    }
}
