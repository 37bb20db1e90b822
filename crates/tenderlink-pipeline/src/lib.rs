//! Batch orchestration: load cleaned records, group, link, and write run reports.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenderlink_core::{AnnotatedRecord, LinkPair, Record, ResolveConfig};
use tenderlink_group::{CustomerKey, GroupSummary, ProjectGrouper};
use tenderlink_link::{build_link_table, LinkDistribution, TemporalLinker};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

pub mod snapshot;

use snapshot::{manifest_entry, write_link_table_parquet, write_records_parquet, SnapshotManifest};

pub const CRATE_NAME: &str = "tenderlink-pipeline";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub reports_dir: PathBuf,
    pub config_path: Option<PathBuf>,
    pub threshold_override: Option<f64>,
    pub write_customer_slices: bool,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            input_path: std::env::var("TENDERLINK_INPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data_cleaned/tender_cleaned.jsonl")),
            reports_dir: std::env::var("TENDERLINK_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./reports")),
            config_path: std::env::var("TENDERLINK_CONFIG").ok().map(PathBuf::from),
            threshold_override: std::env::var("TENDERLINK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok()),
            write_customer_slices: std::env::var("TENDERLINK_CUSTOMER_SLICES")
                .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE" | "False"))
                .unwrap_or(true),
        }
    }

    /// Reads the optional YAML file and applies env overrides. Not validated here.
    pub fn load_resolve_config(&self) -> Result<ResolveConfig> {
        let mut resolve = match &self.config_path {
            Some(path) => load_config_file(path)?.resolve,
            None => ResolveConfig::default(),
        };
        if let Some(threshold) = self.threshold_override {
            resolve.threshold = threshold;
        }
        Ok(resolve)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    resolve: ResolveConfig,
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Parses a JSON array or JSON Lines and fills in missing row ids as `R{index}`.
pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    let mut records: Vec<Record> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text).context("parsing record array")?
    } else {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("parsing record on line {}", n + 1))
            })
            .collect::<Result<_>>()?
    };

    let mut seen = HashSet::new();
    for (idx, record) in records.iter_mut().enumerate() {
        if record.row_id.trim().is_empty() {
            record.row_id = format!("R{idx}");
        }
        if !seen.insert(record.row_id.clone()) {
            warn!(row_id = %record.row_id, "duplicate row_id in input");
        }
    }
    Ok(records)
}

pub async fn load_records(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_records(&text).with_context(|| format!("loading records from {}", path.display()))
}

/// Characters unsafe in file names become `_`; at most 80 chars are kept.
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .take(80)
        .collect()
}

/// Hands out distinct slice file stems. A stem already taken gets a `_2`, `_3`, ... suffix.
#[derive(Debug, Default)]
pub struct SliceNames {
    used: HashSet<String>,
}

impl SliceNames {
    pub fn claim(&mut self, customer: &str) -> String {
        let base = safe_file_name(customer);
        let mut name = base.clone();
        let mut n = 1;
        while !self.used.insert(name.clone()) {
            n += 1;
            name = format!("{base}_{n}");
        }
        if n > 1 {
            warn!(customer, file = %name, "customer slice name already taken; suffixed");
        }
        name
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub records: Vec<AnnotatedRecord>,
    pub link_table: Vec<LinkPair>,
    pub group: GroupSummary,
    pub distribution: LinkDistribution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_path: String,
    pub records: usize,
    pub customers: usize,
    pub projects: usize,
    pub clusters: usize,
    pub linked_pairs: usize,
    pub linked: usize,
    pub tender_only: usize,
    pub award_only: usize,
    pub unlinked: usize,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

pub struct Pipeline {
    config: PipelineConfig,
    grouper: ProjectGrouper,
    linker: TemporalLinker,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let resolve = config.load_resolve_config()?;
        Self::with_resolve_config(config, resolve)
    }

    pub fn with_resolve_config(config: PipelineConfig, resolve: ResolveConfig) -> Result<Self> {
        let grouper = ProjectGrouper::new(resolve.clone()).context("invalid resolve configuration")?;
        let linker = TemporalLinker::new(resolve).context("invalid resolve configuration")?;
        Ok(Self {
            config,
            grouper,
            linker,
        })
    }

    /// Grouping then linking, without any IO.
    pub fn resolve(&self, records: Vec<Record>) -> Resolution {
        let grouped = self.grouper.group(records);
        let records = self.linker.link(grouped.records);
        let link_table = build_link_table(&records);
        let distribution = LinkDistribution::from_records(&records);
        Resolution {
            records,
            link_table,
            group: grouped.summary,
            distribution,
        }
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let records = load_records(&self.config.input_path).await?;
        info!(%run_id, records = records.len(), input = %self.config.input_path.display(), "starting run");

        let resolution = self.resolve(records);
        let projects = resolution
            .records
            .iter()
            .map(|r| r.project_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let run_dir = self.config.reports_dir.join(run_id.to_string());
        let finished_at = Utc::now();
        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at,
            input_path: self.config.input_path.display().to_string(),
            records: resolution.records.len(),
            customers: resolution.group.customers,
            projects,
            clusters: resolution.group.clusters,
            linked_pairs: resolution.link_table.len(),
            linked: resolution.distribution.linked,
            tender_only: resolution.distribution.tender_only,
            award_only: resolution.distribution.award_only,
            unlinked: resolution.distribution.unlinked,
            reports_dir: run_dir.display().to_string(),
            parquet_manifest: String::new(),
        };

        self.write_reports(&run_dir, &resolution).await?;
        let manifest_path = export_snapshots(&run_dir, &resolution).await?;
        summary.parquet_manifest = manifest_path.display().to_string();
        write_summary(&run_dir, &summary).await?;

        info!(
            %run_id,
            projects = summary.projects,
            linked_pairs = summary.linked_pairs,
            reports = %summary.reports_dir,
            "run complete"
        );
        Ok(summary)
    }

    async fn write_reports(&self, run_dir: &Path, resolution: &Resolution) -> Result<()> {
        fs::create_dir_all(run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;

        write_json(&run_dir.join("annotated_records.json"), &resolution.records).await?;
        write_json(&run_dir.join("link_table.json"), &resolution.link_table).await?;

        if self.config.write_customer_slices {
            let slices_dir = run_dir.join("by_customer");
            fs::create_dir_all(&slices_dir)
                .await
                .with_context(|| format!("creating {}", slices_dir.display()))?;
            let mut order: Vec<CustomerKey> = Vec::new();
            let mut slices: HashMap<CustomerKey, Vec<&AnnotatedRecord>> = HashMap::new();
            for record in &resolution.records {
                let customer = self.grouper.customer_key(&record.record);
                slices
                    .entry(customer.clone())
                    .or_insert_with(|| {
                        order.push(customer);
                        Vec::new()
                    })
                    .push(record);
            }
            let mut names = SliceNames::default();
            for customer in &order {
                let stem = names.claim(self.grouper.customer_label(customer));
                let path = slices_dir.join(format!("{stem}.json"));
                write_json(&path, &slices[customer]).await?;
            }
        }

        let brief = render_brief(resolution);
        fs::write(run_dir.join("run_brief.md"), brief)
            .await
            .context("writing run_brief.md")?;
        Ok(())
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).with_context(|| format!("serializing {}", path.display()))?;
    fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

async fn write_summary(run_dir: &Path, summary: &RunSummary) -> Result<()> {
    write_json(&run_dir.join("run_summary.json"), summary).await
}

fn render_brief(resolution: &Resolution) -> String {
    let group = &resolution.group;
    let dist = &resolution.distribution;
    format!(
        "# Tender/Award Link Brief\n\n- Records: {}\n- Customers: {}\n- Unique cores: {}\n- Clusters: {}\n- Oversized buckets: {}\n- Cross-bucket merges: {}\n- Linked pairs: {}\n\n## Link Types\n- 已关联: {}\n- 仅招标: {}\n- 仅中标: {}\n- 其他: {}\n",
        group.records,
        group.customers,
        group.unique_cores,
        group.clusters,
        group.oversized_buckets,
        group.merges,
        resolution.link_table.len(),
        dist.linked,
        dist.tender_only,
        dist.award_only,
        dist.unlinked,
    )
}

async fn export_snapshots(run_dir: &Path, resolution: &Resolution) -> Result<PathBuf> {
    let snapshot_dir = run_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let records_path = snapshot_dir.join("records.parquet");
    let links_path = snapshot_dir.join("link_table.parquet");
    write_records_parquet(&records_path, &resolution.records)?;
    write_link_table_parquet(&links_path, &resolution.link_table)?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("records", run_dir, &records_path)?,
            manifest_entry("link_table", run_dir, &links_path)?,
        ],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    write_json(&manifest_path, &manifest).await?;
    Ok(manifest_path)
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    Pipeline::new(PipelineConfig::from_env())?.run_once().await
}

/// Markdown index of the latest `runs` reports, newest first.
pub fn report_markdown(runs: usize, reports_dir: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_dir)
        .with_context(|| format!("reading {}", reports_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter(|entry| entry.path().join("run_summary.json").exists())
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Tender/Award Link Runs".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let summary_path = dir.path().join("run_summary.json");
        let summary: RunSummary = serde_json::from_str(
            &std::fs::read_to_string(&summary_path)
                .with_context(|| format!("reading {}", summary_path.display()))?,
        )
        .with_context(|| format!("parsing {}", summary_path.display()))?;

        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- finished: {}", summary.finished_at));
        lines.push(format!("- input: `{}`", summary.input_path));
        lines.push(format!(
            "- records: {} / projects: {} / linked pairs: {}",
            summary.records, summary.projects, summary.linked_pairs
        ));
        lines.push(format!(
            "- link types: linked {} / tender-only {} / award-only {} / other {}",
            summary.linked, summary.tender_only, summary.award_only, summary.unlinked
        ));
        lines.push(format!("- parquet manifest: `{}`", summary.parquet_manifest));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderlink_core::{LinkType, RecordType};

    #[test]
    fn json_lines_get_positional_row_ids() {
        let text = r#"
{"customer":"某市医院","record_type":"招标公告","publish_date":"2024-03-01","project_name_core":"门诊楼装修工程"}

{"row_id":"X9","customer":"某市医院","record_type":"中标公告","publish_date":"2024-03-20","project_name_core":"门诊楼装修工程"}
"#;
        let records = parse_records(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_id, "R0");
        assert_eq!(records[1].row_id, "X9");
    }

    #[test]
    fn json_array_is_accepted() {
        let records = parse_records(r#"[{"project_name_core":"a"},{"project_name_core":"b"}]"#).unwrap();
        assert_eq!(records[1].row_id, "R1");
        assert_eq!(records[1].record_type, RecordType::Other);
    }

    #[test]
    fn unrecognised_labels_and_null_cells_keep_the_batch() {
        let text = r#"{"row_id":"T1","customer":"某市医院","record_type":"招标公告","project_name_core":"门诊楼装修工程"}
{"row_id":"C1","customer":"某市医院","record_type":"变更公告","project_name_core":"门诊楼装修工程"}
{"row_id":null,"customer":null,"record_type":"中标公告","title":null,"project_name_core":null}"#;
        let records = parse_records(text).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].record_type, RecordType::Other);
        assert_eq!(records[2].row_id, "R2");
        assert_eq!(records[2].project_name_core, "");
        assert_eq!(records[2].record_type, RecordType::AwardAnnouncement);
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = parse_records("{\"project_name_core\":\"a\"}\n{not json}\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");
    }

    #[test]
    fn unsafe_customer_names_are_sanitized() {
        assert_eq!(safe_file_name("某局/信息中心:二部"), "某局_信息中心_二部");
        assert_eq!(safe_file_name(&"长".repeat(100)).chars().count(), 80);
    }

    #[test]
    fn colliding_slice_names_get_suffixes() {
        let mut names = SliceNames::default();
        assert_eq!(names.claim("某区/教育局"), "某区_教育局");
        assert_eq!(names.claim("某区:教育局"), "某区_教育局_2");
        assert_eq!(names.claim("某区|教育局"), "某区_教育局_3");
        assert_eq!(names.claim("某区教育局"), "某区教育局");
    }

    #[test]
    fn resolve_groups_then_links() {
        let pipeline = Pipeline::with_resolve_config(
            PipelineConfig {
                input_path: PathBuf::from("unused"),
                reports_dir: PathBuf::from("unused"),
                config_path: None,
                threshold_override: None,
                write_customer_slices: false,
            },
            ResolveConfig::default(),
        )
        .unwrap();
        let records = parse_records(
            r#"{"row_id":"T1","customer":"某市医院","record_type":"招标公告","publish_date":"2024-03-01","project_name_core":"2024-ZB-0012 人工智能平台建设项目"}
{"row_id":"A1","customer":"某市医院","record_type":"中标公告","publish_date":"2024-03-20","project_name_core":"智能平台建设项目"}
{"row_id":"A2","customer":"某区医院","record_type":"中标公告","publish_date":"2024-03-21","project_name_core":"人工智能平台建设项目"}"#,
        )
        .unwrap();
        let resolution = pipeline.resolve(records);
        let a1 = &resolution.records[1];
        assert_eq!(a1.link.link_type, Some(LinkType::Linked));
        assert_eq!(a1.link.related_tender_id.as_deref(), Some("T1"));
        assert_eq!(resolution.records[0].link.related_bid_id.as_deref(), Some("A1"));
        assert_eq!(resolution.records[2].link.link_type, Some(LinkType::AwardOnly));
        assert_eq!(resolution.link_table.len(), 1);
        assert_eq!(resolution.group.customers, 2);
    }

    #[test]
    fn invalid_threshold_fails_pipeline_construction() {
        let config = PipelineConfig {
            input_path: PathBuf::from("unused"),
            reports_dir: PathBuf::from("unused"),
            config_path: None,
            threshold_override: Some(1.5),
            write_customer_slices: false,
        };
        let err = Pipeline::new(config).err().unwrap();
        assert!(format!("{err:#}").contains("threshold"), "{err:#}");
    }
}
