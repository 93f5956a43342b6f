//! Query contract for the record store.
//!
//! A [`RecordQuery`] is a predicate tree plus ordering. The Postgres adapter
//! compiles it to SQL; [`Predicate::matches`] evaluates it in memory with the
//! same semantics.

use serde::{Deserialize, Serialize};

use crate::filter::{FilterState, FrozenScope, SortDirection, StatusScope};
use crate::models::Vacancy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Sequence,
    OpenedAt,
    CreatedAt,
    ClosedAt,
    Unit,
    Sector,
    JobType,
    Title,
    Manager,
    Director,
    Shift,
    Creator,
    Closer,
    Frozen,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Field::Sequence => "sequence_no",
            Field::OpenedAt => "opened_at",
            Field::CreatedAt => "created_at",
            Field::ClosedAt => "closed_at",
            Field::Unit => "unit",
            Field::Sector => "sector",
            Field::JobType => "job_type",
            Field::Title => "title",
            Field::Manager => "manager",
            Field::Director => "director",
            Field::Shift => "shift",
            Field::Creator => "creator",
            Field::Closer => "closer",
            Field::Frozen => "frozen",
        }
    }

    fn text<'a>(self, record: &'a Vacancy) -> Option<&'a str> {
        match self {
            Field::Unit => Some(record.unit.as_str()),
            Field::Sector => Some(record.sector.as_str()),
            Field::JobType => Some(record.job_type.as_str()),
            Field::Title => Some(record.title.as_str()),
            Field::Manager => Some(record.manager.as_str()),
            Field::Director => Some(record.director.as_str()),
            Field::Shift => Some(record.shift.as_str()),
            Field::Creator => record.creator.as_deref(),
            Field::Closer => record.closer.as_deref(),
            _ => None,
        }
    }

    fn is_null(self, record: &Vacancy) -> bool {
        match self {
            Field::Sequence => record.sequence.is_none(),
            Field::ClosedAt => record.closed_at.is_none(),
            Field::Creator => record.creator.is_none(),
            Field::Closer => record.closer.is_none(),
            Field::OpenedAt | Field::CreatedAt | Field::Frozen => false,
            _ => self.text(record).is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(Field, Value),
    IsNull(Field),
    NotNull(Field),
    In(Field, Vec<String>),
    /// Case-insensitive substring match.
    Contains(Field, String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, record: &Vacancy) -> bool {
        match self {
            Predicate::Eq(field, value) => match (field, value) {
                (Field::Sequence, Value::Int(wanted)) => record.sequence == Some(*wanted),
                (Field::Frozen, Value::Bool(wanted)) => record.frozen == *wanted,
                (field, Value::Text(wanted)) => field.text(record) == Some(wanted.as_str()),
                _ => false,
            },
            Predicate::IsNull(field) => field.is_null(record),
            Predicate::NotNull(field) => !field.is_null(record),
            Predicate::In(field, values) => field
                .text(record)
                .is_some_and(|text| values.iter().any(|value| value == text)),
            Predicate::Contains(field, needle) => {
                let needle = needle.to_lowercase();
                field
                    .text(record)
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
            }
            Predicate::And(parts) => parts.iter().all(|part| part.matches(record)),
            Predicate::Or(parts) => parts.iter().any(|part| part.matches(record)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub predicate: Option<Predicate>,
    pub order_by: Field,
    pub direction: SortDirection,
    pub limit: Option<i64>,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self::all()
    }
}

impl RecordQuery {
    /// Every vacancy, newest opening first.
    pub fn all() -> Self {
        Self {
            predicate: None,
            order_by: Field::OpenedAt,
            direction: SortDirection::Desc,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    /// Narrows the fetch with the parts of `filter` the store can evaluate
    /// exactly. Creator attribution depends on a fallback chain, so it is left
    /// to the client-side pipeline; the result is always a superset of what
    /// the pipeline keeps.
    pub fn from_filter(filter: &FilterState) -> Self {
        let mut parts = Vec::new();

        match filter.status {
            StatusScope::Open => parts.push(Predicate::IsNull(Field::ClosedAt)),
            StatusScope::Closed => parts.push(Predicate::NotNull(Field::ClosedAt)),
            StatusScope::Any => {}
        }
        match filter.frozen {
            FrozenScope::FrozenOnly => parts.push(Predicate::Eq(Field::Frozen, Value::Bool(true))),
            FrozenScope::ActiveOnly => parts.push(Predicate::Eq(Field::Frozen, Value::Bool(false))),
            FrozenScope::Any => {}
        }
        if !filter.units.is_empty() {
            parts.push(Predicate::In(Field::Unit, filter.units.iter().cloned().collect()));
        }
        if !filter.shifts.is_empty() {
            parts.push(Predicate::In(Field::Shift, filter.shifts.iter().cloned().collect()));
        }

        let search = filter.search.trim();
        if !search.is_empty() {
            let mut alternatives: Vec<Predicate> = [
                Field::Title,
                Field::Unit,
                Field::Sector,
                Field::Manager,
                Field::Director,
            ]
            .into_iter()
            .map(|field| Predicate::Contains(field, search.to_string()))
            .collect();
            if search.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(sequence) = search.parse() {
                    alternatives.push(Predicate::Eq(Field::Sequence, Value::Int(sequence)));
                }
            }
            parts.push(Predicate::Or(alternatives));
        }

        Self {
            predicate: (!parts.is_empty()).then_some(Predicate::And(parts)),
            ..Self::all()
        }
    }

    pub fn matches(&self, record: &Vacancy) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.matches(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{apply, PipelineContext};
    use crate::models::RequisitionKind;
    use crate::testing::{closed_after, frozen, reference_now, shared, vacancy};

    #[test]
    fn empty_filter_fetches_everything() {
        let query = RecordQuery::from_filter(&FilterState::default());
        assert_eq!(query.predicate, None);
        assert!(query.matches(&vacancy("Ops", "A", "X", RequisitionKind::Growth)));
    }

    #[test]
    fn boolean_tree_evaluates_in_memory() {
        let record = vacancy("Ops", "A", "Camara Fria", RequisitionKind::Growth);
        let predicate = Predicate::And(vec![
            Predicate::IsNull(Field::ClosedAt),
            Predicate::Or(vec![
                Predicate::Contains(Field::Sector, "FRIA".to_string()),
                Predicate::Eq(Field::Sequence, Value::Int(9)),
            ]),
            Predicate::In(Field::Unit, vec!["A".to_string(), "B".to_string()]),
        ]);
        assert!(predicate.matches(&record));
        assert!(!Predicate::Or(Vec::new()).matches(&record));
        assert!(Predicate::And(Vec::new()).matches(&record));
        assert!(!Predicate::Eq(Field::Frozen, Value::Bool(true)).matches(&record));
    }

    #[test]
    fn server_side_narrowing_is_a_superset_of_the_pipeline() {
        let mut numbered = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        numbered.sequence = Some(42);
        let mut by_closer = closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 3);
        by_closer.creator = None;
        by_closer.sequence = Some(42);
        let records = shared(vec![
            numbered,
            by_closer,
            frozen(vacancy("Ops", "B", "Y", RequisitionKind::Replacement)),
            vacancy("Adm", "A", "Z", RequisitionKind::Growth),
        ]);

        let mut filter = FilterState {
            search: "42".to_string(),
            ..FilterState::default()
        };
        filter.units.insert("A".to_string());
        filter.creators.insert("bruno".to_string());

        let ctx = PipelineContext {
            now: reference_now(),
            unassigned_label: "UNASSIGNED",
        };
        let query = RecordQuery::from_filter(&filter);
        let narrowed: Vec<_> = records
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();

        let from_full = apply(&records, &filter, &ctx);
        let from_narrowed = apply(&narrowed, &filter, &ctx);
        assert_eq!(from_full.len(), 1);
        assert!(narrowed.len() < records.len());
        assert_eq!(
            from_full.iter().map(|r| r.id).collect::<Vec<_>>(),
            from_narrowed.iter().map(|r| r.id).collect::<Vec<_>>()
        );
    }
}
