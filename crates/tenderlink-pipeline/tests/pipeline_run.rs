use std::path::Path;

use tempfile::tempdir;
use tenderlink_core::{AnnotatedRecord, LinkPair, LinkType};
use tenderlink_pipeline::{report_markdown, Pipeline, PipelineConfig};

const INPUT: &str = r#"{"row_id":"T1","customer":"某市人民医院","record_type":"招标公告","publish_date":"2024-01-05","title":"人工智能平台建设项目招标公告","project_name_core":"人工智能平台建设项目"}
{"row_id":"T2","customer":"某市人民医院","record_type":"招标公告","publish_date":"2024-02-01","title":"人工智能平台建设项目（第二次）招标公告","project_name_core":"某市人民医院人工智能平台建设项目"}
{"row_id":"A1","customer":"某市人民医院","record_type":"中标公告","publish_date":"2024-03-01","title":"智能平台建设项目中标公告","project_name_core":"智能平台建设项目"}
{"row_id":"A2","customer":"某市人民医院","record_type":"中标候选人公示","publish_date":"2024-03-02","title":"人工智能平台建设项目中标候选人公示","project_name_core":"人工智能平台建设项目"}
{"row_id":"X1","customer":"某区/教育局","record_type":"其他","publish_date":"2024-03-02","title":"变更公告","project_name_core":"校园网改造"}
{"row_id":"A3","customer":"某区/教育局","record_type":"成交公告","title":"校园网改造成交公告","project_name_core":"校园网改造"}
"#;

fn config_for(root: &Path, config_path: Option<&Path>) -> PipelineConfig {
    PipelineConfig {
        input_path: root.join("cleaned.jsonl"),
        reports_dir: root.join("reports"),
        config_path: config_path.map(Path::to_path_buf),
        threshold_override: None,
        write_customer_slices: true,
    }
}

#[tokio::test]
async fn run_once_writes_annotated_reports() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("cleaned.jsonl"), INPUT).unwrap();

    let pipeline = Pipeline::new(config_for(dir.path(), None)).unwrap();
    let summary = pipeline.run_once().await.unwrap();
    assert_eq!(summary.records, 6);
    assert_eq!(summary.customers, 2);
    assert_eq!(summary.projects, 2);
    assert_eq!(summary.linked_pairs, 2);

    let run_dir = Path::new(&summary.reports_dir);
    for rel in [
        "annotated_records.json",
        "link_table.json",
        "run_brief.md",
        "run_summary.json",
        "snapshots/records.parquet",
        "snapshots/link_table.parquet",
        "snapshots/manifest.json",
        "by_customer/某市人民医院.json",
        "by_customer/某区_教育局.json",
    ] {
        assert!(run_dir.join(rel).exists(), "missing {rel}");
    }

    let records: Vec<AnnotatedRecord> =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("annotated_records.json")).unwrap()).unwrap();
    let get = |id: &str| records.iter().find(|r| r.row_id() == id).unwrap();

    assert_eq!(get("T1").project_id, get("A1").project_id);
    assert_eq!(get("T1").link.link_type, Some(LinkType::TenderOnly));
    assert_eq!(get("T2").link.link_type, Some(LinkType::Linked));
    assert_eq!(get("T2").link.related_bid_id.as_deref(), Some("A1"));
    assert_eq!(get("T2").record.tender_round, Some(2));
    assert_eq!(get("A1").link.related_tender_id.as_deref(), Some("T2"));
    assert_eq!(get("A2").link.related_tender_id.as_deref(), Some("T2"));
    assert_eq!(get("X1").link.link_type, None);
    assert_eq!(get("A3").link.link_type, Some(LinkType::AwardOnly));

    let table: Vec<LinkPair> =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("link_table.json")).unwrap()).unwrap();
    assert!(table.iter().all(|p| p.tender_row_id == "T2"));

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("snapshots/manifest.json")).unwrap()).unwrap();
    let files = manifest["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["path"], "snapshots/records.parquet");
    assert_eq!(files[0]["sha256"].as_str().unwrap().len(), 64);

    let index = report_markdown(5, &dir.path().join("reports")).unwrap();
    assert!(index.contains(&summary.run_id.to_string()));
    assert!(index.contains("linked pairs: 2"));
}

#[tokio::test]
async fn repeated_runs_produce_identical_annotations() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("cleaned.jsonl"), INPUT).unwrap();
    let pipeline = Pipeline::new(config_for(dir.path(), None)).unwrap();

    let first = pipeline.run_once().await.unwrap();
    let second = pipeline.run_once().await.unwrap();
    assert_ne!(first.run_id, second.run_id);

    let read = |summary: &tenderlink_pipeline::RunSummary| {
        std::fs::read(Path::new(&summary.reports_dir).join("annotated_records.json")).unwrap()
    };
    assert_eq!(read(&first), read(&second));
}

#[tokio::test]
async fn yaml_config_tightens_threshold() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("cleaned.jsonl"), INPUT).unwrap();
    let config_path = dir.path().join("tenderlink.yaml");
    std::fs::write(&config_path, "resolve:\n  threshold: 0.95\n").unwrap();

    let config = config_for(dir.path(), Some(&config_path));
    assert_eq!(config.load_resolve_config().unwrap().threshold, 0.95);

    let summary = Pipeline::new(config).unwrap().run_once().await.unwrap();
    // 0.9 substring matches no longer merge the truncated title.
    assert_eq!(summary.projects, 3);
}

#[tokio::test]
async fn missing_input_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let err = Pipeline::new(config_for(dir.path(), None))
        .unwrap()
        .run_once()
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("cleaned.jsonl"), "{err:#}");
}
