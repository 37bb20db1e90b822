//! Parquet snapshots of a run plus a sha256 manifest.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tenderlink_core::{AnnotatedRecord, LinkPair};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

pub fn write_records_parquet(path: &Path, records: &[AnnotatedRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("row_id", DataType::Utf8, false),
        Field::new("customer", DataType::Utf8, true),
        Field::new("publish_date", DataType::Utf8, true),
        Field::new("record_type", DataType::Utf8, false),
        Field::new("project_name_core", DataType::Utf8, false),
        Field::new("tender_round", DataType::UInt32, true),
        Field::new("project_id", DataType::Utf8, false),
        Field::new("link_type", DataType::Utf8, true),
        Field::new("related_tender_id", DataType::Utf8, true),
        Field::new("related_bid_id", DataType::Utf8, true),
    ]));

    let row_ids = StringArray::from(records.iter().map(|r| Some(r.row_id())).collect::<Vec<_>>());
    let customers = StringArray::from(
        records
            .iter()
            .map(|r| r.record.customer.as_deref())
            .collect::<Vec<_>>(),
    );
    let dates = StringArray::from(
        records
            .iter()
            .map(|r| r.record.publish_date.map(|d| d.to_string()))
            .collect::<Vec<_>>(),
    );
    let record_types = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.record.record_type.label()))
            .collect::<Vec<_>>(),
    );
    let cores = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.record.project_name_core.as_str()))
            .collect::<Vec<_>>(),
    );
    let rounds = UInt32Array::from(records.iter().map(|r| r.record.tender_round).collect::<Vec<_>>());
    let project_ids = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.project_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let link_types = StringArray::from(
        records
            .iter()
            .map(|r| r.link.link_type.map(|t| t.to_string()))
            .collect::<Vec<_>>(),
    );
    let tender_ids = StringArray::from(
        records
            .iter()
            .map(|r| r.link.related_tender_id.as_deref())
            .collect::<Vec<_>>(),
    );
    let bid_ids = StringArray::from(
        records
            .iter()
            .map(|r| r.link.related_bid_id.as_deref())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(row_ids),
            Arc::new(customers),
            Arc::new(dates),
            Arc::new(record_types),
            Arc::new(cores),
            Arc::new(rounds),
            Arc::new(project_ids),
            Arc::new(link_types),
            Arc::new(tender_ids),
            Arc::new(bid_ids),
        ],
    )
    .context("building annotated records batch")?;
    write_parquet(path, batch)
}

pub fn write_link_table_parquet(path: &Path, pairs: &[LinkPair]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("project_id", DataType::Utf8, false),
        Field::new("tender_row_id", DataType::Utf8, false),
        Field::new("bid_row_id", DataType::Utf8, false),
        Field::new("tender_round", DataType::UInt32, true),
        Field::new("publish_date", DataType::Utf8, true),
    ]));

    let project_ids = StringArray::from(pairs.iter().map(|p| Some(p.project_id.as_str())).collect::<Vec<_>>());
    let tender_ids = StringArray::from(pairs.iter().map(|p| Some(p.tender_row_id.as_str())).collect::<Vec<_>>());
    let bid_ids = StringArray::from(pairs.iter().map(|p| Some(p.bid_row_id.as_str())).collect::<Vec<_>>());
    let rounds = UInt32Array::from(pairs.iter().map(|p| p.tender_round).collect::<Vec<_>>());
    let dates = StringArray::from(
        pairs
            .iter()
            .map(|p| p.publish_date.map(|d| d.to_string()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(project_ids),
            Arc::new(tender_ids),
            Arc::new(bid_ids),
            Arc::new(rounds),
            Arc::new(dates),
        ],
    )
    .context("building link table batch")?;
    write_parquet(path, batch)
}

pub fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
    })
}
