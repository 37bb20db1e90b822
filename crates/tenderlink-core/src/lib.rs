//! Core record model and link annotations shared by the grouping and linking stages.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

mod config;

pub use config::{ConfigError, ResolveConfig};

pub const CRATE_NAME: &str = "tenderlink-core";

/// Stable per-record key; `R{index}` when the cleaning stage did not assign one.
pub type RowId = String;

/// Announcement category assigned by the cleaning stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum RecordType {
    #[serde(rename = "招标公告", alias = "tender_announcement")]
    TenderAnnouncement,
    #[serde(rename = "采购公告", alias = "purchase_notice")]
    PurchaseNotice,
    #[serde(rename = "竞争性谈判", alias = "competitive_negotiation")]
    CompetitiveNegotiation,
    #[serde(rename = "竞争性磋商", alias = "competitive_consultation")]
    CompetitiveConsultation,
    #[serde(rename = "询价", alias = "inquiry")]
    Inquiry,
    #[serde(rename = "中标公告", alias = "award_announcement")]
    AwardAnnouncement,
    #[serde(rename = "中标候选人公示", alias = "award_candidate_notice")]
    AwardCandidateNotice,
    #[serde(rename = "成交结果", alias = "transaction_result")]
    TransactionResult,
    #[serde(rename = "成交公告", alias = "transaction_notice")]
    TransactionNotice,
    #[serde(rename = "结果公示", alias = "result_publicity")]
    ResultPublicity,
    #[default]
    #[serde(rename = "其他", alias = "other")]
    Other,
}

impl RecordType {
    pub const ALL: [RecordType; 11] = [
        RecordType::TenderAnnouncement,
        RecordType::PurchaseNotice,
        RecordType::CompetitiveNegotiation,
        RecordType::CompetitiveConsultation,
        RecordType::Inquiry,
        RecordType::AwardAnnouncement,
        RecordType::AwardCandidateNotice,
        RecordType::TransactionResult,
        RecordType::TransactionNotice,
        RecordType::ResultPublicity,
        RecordType::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RecordType::TenderAnnouncement => "招标公告",
            RecordType::PurchaseNotice => "采购公告",
            RecordType::CompetitiveNegotiation => "竞争性谈判",
            RecordType::CompetitiveConsultation => "竞争性磋商",
            RecordType::Inquiry => "询价",
            RecordType::AwardAnnouncement => "中标公告",
            RecordType::AwardCandidateNotice => "中标候选人公示",
            RecordType::TransactionResult => "成交结果",
            RecordType::TransactionNotice => "成交公告",
            RecordType::ResultPublicity => "结果公示",
            RecordType::Other => "其他",
        }
    }

    /// snake_case alias accepted alongside the label.
    pub fn slug(self) -> &'static str {
        match self {
            RecordType::TenderAnnouncement => "tender_announcement",
            RecordType::PurchaseNotice => "purchase_notice",
            RecordType::CompetitiveNegotiation => "competitive_negotiation",
            RecordType::CompetitiveConsultation => "competitive_consultation",
            RecordType::Inquiry => "inquiry",
            RecordType::AwardAnnouncement => "award_announcement",
            RecordType::AwardCandidateNotice => "award_candidate_notice",
            RecordType::TransactionResult => "transaction_result",
            RecordType::TransactionNotice => "transaction_notice",
            RecordType::ResultPublicity => "result_publicity",
            RecordType::Other => "other",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Unknown labels degrade to [`RecordType::Other`].
impl FromStr for RecordType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(RecordType::ALL
            .into_iter()
            .find(|t| t.label() == s || t.slug() == s)
            .unwrap_or(RecordType::Other))
    }
}

/// Pairing status of a record inside its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    #[serde(rename = "仅招标", alias = "tender_only")]
    TenderOnly,
    #[serde(rename = "仅中标", alias = "award_only")]
    AwardOnly,
    #[serde(rename = "已关联", alias = "linked")]
    Linked,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkType::TenderOnly => "仅招标",
            LinkType::AwardOnly => "仅中标",
            LinkType::Linked => "已关联",
        };
        f.write_str(label)
    }
}

/// Cleaned announcement record handed over by the cleaning stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Record {
    #[serde(default, deserialize_with = "null_as_default")]
    pub row_id: RowId,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub publish_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_record_type")]
    pub record_type: RecordType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub project_name_core: String,
    #[serde(default)]
    pub tender_round: Option<u32>,
}

/// Output fields produced by the temporal linker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LinkAnnotation {
    pub link_type: Option<LinkType>,
    pub related_tender_id: Option<RowId>,
    pub related_bid_id: Option<RowId>,
}

/// A record enriched with its project identity and link annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    #[serde(flatten)]
    pub record: Record,
    pub project_id: String,
    #[serde(flatten)]
    pub link: LinkAnnotation,
}

impl AnnotatedRecord {
    pub fn new(record: Record, project_id: impl Into<String>) -> Self {
        Self {
            record,
            project_id: project_id.into(),
            link: LinkAnnotation::default(),
        }
    }

    pub fn row_id(&self) -> &str {
        &self.record.row_id
    }
}

/// One linked (tender, award) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPair {
    pub project_id: String,
    pub tender_row_id: RowId,
    pub bid_row_id: RowId,
    pub tender_round: Option<u32>,
    pub publish_date: Option<NaiveDate>,
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parses the date layouts seen in exported announcement sheets. Anything else is `None`.
pub fn parse_publish_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_publish_date))
}

/// Labels outside the known taxonomy read as [`RecordType::Other`] instead of failing the record.
fn lenient_record_type<'de, D>(deserializer: D) -> Result<RecordType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(|label| label.parse().unwrap_or_default())
        .unwrap_or_default())
}

/// Explicit `null` cells (pandas/CSV exports) read as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
