use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared handle to a vacancy inside a snapshot. Derived views and drill-downs
/// hand out clones of these handles, so identity survives across views.
pub type VacancyRef = Arc<Vacancy>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionKind {
    Growth,
    Replacement,
}

impl RequisitionKind {
    /// Parses the stored label. Anything that is not a growth label counts as a
    /// replacement, matching how the legacy screens treated free-form values.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.eq_ignore_ascii_case("growth") || label.eq_ignore_ascii_case("aumento de quadro") {
            RequisitionKind::Growth
        } else {
            RequisitionKind::Replacement
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequisitionKind::Growth => "growth",
            RequisitionKind::Replacement => "replacement",
        }
    }
}

impl fmt::Display for RequisitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counting category of a vacancy inside a rollup. A frozen vacancy is counted
/// as frozen whatever its requisition kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Growth,
    Replacement,
    Frozen,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Growth, Category::Replacement, Category::Frozen];

    pub fn label(self) -> &'static str {
        match self {
            Category::Growth => "growth",
            Category::Replacement => "replacement",
            Category::Frozen => "frozen",
        }
    }
}

impl From<RequisitionKind> for Category {
    fn from(kind: RequisitionKind) -> Self {
        match kind {
            RequisitionKind::Growth => Category::Growth,
            RequisitionKind::Replacement => Category::Replacement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vacancy {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub sequence: Option<i64>,
    pub opened_at: DateTime<Utc>,
    pub unit: String,
    pub sector: String,
    pub job_type: String,
    pub title: String,
    pub kind: RequisitionKind,
    pub reason: String,
    pub replaced_name: Option<String>,
    pub shift: String,
    pub manager: String,
    pub director: String,
    pub closed_at: Option<DateTime<Utc>>,
    pub hire_name: Option<String>,
    pub sourcing_channel: Option<String>,
    pub creator: Option<String>,
    pub closer: Option<String>,
    pub frozen: bool,
    pub observations: Vec<String>,
}

impl Vacancy {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Who a vacancy is attributed to: its creator, else whoever closed it,
    /// else the configured sentinel.
    pub fn creator_key<'a>(&'a self, unassigned: &'a str) -> &'a str {
        non_empty(self.creator.as_deref())
            .or_else(|| non_empty(self.closer.as_deref()))
            .unwrap_or(unassigned)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// The record set from one successful fetch. Never mutated after creation;
/// a refresh builds a new snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub token: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    pub records: Vec<VacancyRef>,
}

impl Snapshot {
    pub fn new(token: u64, fetched_at: DateTime<Utc>, records: Vec<Vacancy>) -> Self {
        Self {
            token,
            fetched_at: Some(fetched_at),
            records: records.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, id: Uuid) -> Option<VacancyRef> {
        self.records.iter().find(|record| record.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::vacancy;

    #[test]
    fn kind_labels_parse_leniently() {
        assert_eq!(RequisitionKind::from_label("growth"), RequisitionKind::Growth);
        assert_eq!(
            RequisitionKind::from_label("  Aumento de Quadro "),
            RequisitionKind::Growth
        );
        assert_eq!(
            RequisitionKind::from_label("Substituição"),
            RequisitionKind::Replacement
        );
        assert_eq!(RequisitionKind::from_label(""), RequisitionKind::Replacement);
    }

    #[test]
    fn creator_key_falls_back_to_closer_then_sentinel() {
        let mut record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        record.creator = Some("ana".to_string());
        record.closer = Some("bruno".to_string());
        assert_eq!(record.creator_key("UNASSIGNED"), "ana");

        record.creator = Some("   ".to_string());
        assert_eq!(record.creator_key("UNASSIGNED"), "bruno");

        record.closer = None;
        assert_eq!(record.creator_key("UNASSIGNED"), "UNASSIGNED");
    }

    #[test]
    fn snapshot_lookup_by_identity() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let id = record.id;
        let snapshot = Snapshot::new(1, Utc::now(), vec![record]);
        assert_eq!(snapshot.find(id).map(|found| found.id), Some(id));
        assert!(snapshot.find(Uuid::new_v4()).is_none());
    }
}
