//! Tender/award temporal linking within resolved projects.
//!
//! Each project is scanned once in chronological order with a single piece of state, the
//! currently open tender. Awards attach to it without closing it, so several awards in a
//! row (multi-lot results) all point at the same tender until a newer tender appears.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tenderlink_core::{AnnotatedRecord, ConfigError, LinkAnnotation, LinkPair, LinkType, ResolveConfig};
use tracing::{debug, info, info_span};

pub const CRATE_NAME: &str = "tenderlink-link";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Tender,
    Award,
    Neither,
}

/// Per-project cursor over the chronological scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LinkState {
    #[default]
    NoOpenTender,
    Open { tender: usize },
}

impl LinkState {
    fn on_tender(&mut self, idx: usize) {
        *self = LinkState::Open { tender: idx };
    }

    fn open_tender(&self) -> Option<usize> {
        match self {
            LinkState::NoOpenTender => None,
            LinkState::Open { tender } => Some(*tender),
        }
    }
}

/// Chronological order inside a project: dated records first, then round, then row id.
fn scan_order(a: &AnnotatedRecord, b: &AnnotatedRecord) -> Ordering {
    let date_a = a.record.publish_date;
    let date_b = b.record.publish_date;
    date_a
        .is_none()
        .cmp(&date_b.is_none())
        .then(date_a.cmp(&date_b))
        .then(a.record.tender_round.unwrap_or(1).cmp(&b.record.tender_round.unwrap_or(1)))
        .then_with(|| a.record.row_id.cmp(&b.record.row_id))
}

pub struct TemporalLinker {
    config: ResolveConfig,
}

impl TemporalLinker {
    pub fn new(config: ResolveConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn kind(&self, record: &AnnotatedRecord) -> EventKind {
        if self.config.is_tender(record.record.record_type) {
            EventKind::Tender
        } else if self.config.is_award(record.record.record_type) {
            EventKind::Award
        } else {
            EventKind::Neither
        }
    }

    /// Overwrites every record's link annotation. Input order is preserved.
    pub fn link(&self, mut records: Vec<AnnotatedRecord>) -> Vec<AnnotatedRecord> {
        let _span = info_span!("link", records = records.len()).entered();

        let mut projects: Vec<Vec<usize>> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let slot = *slots.entry(record.project_id.clone()).or_insert_with(|| {
                projects.push(Vec::new());
                projects.len() - 1
            });
            projects[slot].push(idx);
        }

        for mut members in projects {
            members.sort_by(|&a, &b| scan_order(&records[a], &records[b]));
            self.link_project(&mut records, &members);
        }

        let distribution = LinkDistribution::from_records(&records);
        info!(
            projects = slots.len(),
            linked = distribution.linked,
            tender_only = distribution.tender_only,
            award_only = distribution.award_only,
            unlinked = distribution.unlinked,
            "linked tender and award events"
        );
        records
    }

    fn link_project(&self, records: &mut [AnnotatedRecord], order: &[usize]) {
        let mut state = LinkState::default();
        // tender index -> first award index pointing at it, in scan order
        let mut first_award: BTreeMap<usize, usize> = BTreeMap::new();

        for &idx in order {
            let annotation = match self.kind(&records[idx]) {
                EventKind::Tender => {
                    state.on_tender(idx);
                    LinkAnnotation {
                        link_type: Some(LinkType::TenderOnly),
                        ..Default::default()
                    }
                }
                EventKind::Award => match state.open_tender() {
                    Some(tender) => {
                        first_award.entry(tender).or_insert(idx);
                        LinkAnnotation {
                            link_type: Some(LinkType::Linked),
                            related_tender_id: Some(records[tender].record.row_id.clone()),
                            related_bid_id: None,
                        }
                    }
                    None => LinkAnnotation {
                        link_type: Some(LinkType::AwardOnly),
                        ..Default::default()
                    },
                },
                EventKind::Neither => LinkAnnotation::default(),
            };
            records[idx].link = annotation;
        }

        for (tender, award) in first_award {
            let bid_id = records[award].record.row_id.clone();
            let link = &mut records[tender].link;
            link.link_type = Some(LinkType::Linked);
            link.related_bid_id = Some(bid_id);
        }
        if let Some(&first) = order.first() {
            debug!(project_id = %records[first].project_id, records = order.len(), "linked project");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkDistribution {
    pub linked: usize,
    pub tender_only: usize,
    pub award_only: usize,
    pub unlinked: usize,
}

impl LinkDistribution {
    pub fn from_records(records: &[AnnotatedRecord]) -> Self {
        let mut dist = Self::default();
        for record in records {
            match record.link.link_type {
                Some(LinkType::Linked) => dist.linked += 1,
                Some(LinkType::TenderOnly) => dist.tender_only += 1,
                Some(LinkType::AwardOnly) => dist.award_only += 1,
                None => dist.unlinked += 1,
            }
        }
        dist
    }
}

/// One row per award linked to a tender, in record order.
pub fn build_link_table(records: &[AnnotatedRecord]) -> Vec<LinkPair> {
    records
        .iter()
        .filter(|r| r.link.link_type == Some(LinkType::Linked))
        .filter_map(|r| {
            r.link.related_tender_id.as_ref().map(|tender| LinkPair {
                project_id: r.project_id.clone(),
                tender_row_id: tender.clone(),
                bid_row_id: r.record.row_id.clone(),
                tender_round: r.record.tender_round,
                publish_date: r.record.publish_date,
            })
        })
        .collect()
}
