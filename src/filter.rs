use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::aging::{days_open, DateWindow};
use crate::models::{Vacancy, VacancyRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StatusScope {
    Open,
    Closed,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FrozenScope {
    FrozenOnly,
    ActiveOnly,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    OpenedAt,
    ClosedAt,
    CreatedAt,
    Sequence,
    Title,
    Unit,
    Sector,
    JobType,
    Manager,
    Creator,
    /// Days open, up to closing or now.
    DaysElapsed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::OpenedAt,
            direction: SortDirection::Desc,
        }
    }
}

/// Everything the user has chosen on a screen. Lives for the session and is
/// only changed by explicit user action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub status: StatusScope,
    pub frozen: FrozenScope,
    pub units: BTreeSet<String>,
    pub creators: BTreeSet<String>,
    pub shifts: BTreeSet<String>,
    pub search: String,
    pub sort: Option<SortSpec>,
    pub closing_window: Option<DateWindow>,
}

impl FilterState {
    pub fn with_status(&self, status: StatusScope) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.sort.unwrap_or_default()
    }
}

/// Inputs the pipeline needs besides the records and the filter.
#[derive(Debug, Clone, Copy)]
pub struct PipelineContext<'a> {
    pub now: DateTime<Utc>,
    pub unassigned_label: &'a str,
}

struct SearchQuery {
    needle: String,
    sequence: Option<i64>,
}

impl SearchQuery {
    fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let sequence = if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            trimmed.parse().ok()
        } else {
            None
        };
        Some(Self {
            needle: trimmed.to_lowercase(),
            sequence,
        })
    }

    fn matches(&self, record: &Vacancy) -> bool {
        let text_hit = [
            &record.title,
            &record.unit,
            &record.sector,
            &record.manager,
            &record.director,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&self.needle));

        text_hit || self.sequence.is_some_and(|wanted| record.sequence == Some(wanted))
    }
}

fn member(selection: &BTreeSet<String>, value: &str) -> bool {
    selection.is_empty() || selection.contains(value)
}

/// Runs every active predicate and orders the result. Pure: the same records
/// and filter always give the same list.
pub fn apply(
    records: &[VacancyRef],
    filter: &FilterState,
    ctx: &PipelineContext<'_>,
) -> Vec<VacancyRef> {
    let search = SearchQuery::parse(&filter.search);

    let matched: Vec<VacancyRef> = records
        .iter()
        .filter(|record| match filter.status {
            StatusScope::Open => record.is_open(),
            StatusScope::Closed => record.is_closed(),
            StatusScope::Any => true,
        })
        .filter(|record| match filter.frozen {
            FrozenScope::FrozenOnly => record.frozen,
            FrozenScope::ActiveOnly => !record.frozen,
            FrozenScope::Any => true,
        })
        .filter(|record| member(&filter.units, &record.unit))
        .filter(|record| member(&filter.shifts, &record.shift))
        .filter(|record| member(&filter.creators, record.creator_key(ctx.unassigned_label)))
        .filter(|record| search.as_ref().map_or(true, |query| query.matches(record)))
        .cloned()
        .collect();

    sort(matched, filter.sort_spec(), ctx)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Instant(DateTime<Utc>),
    Number(i64),
    Text(String),
}

fn text(value: &str) -> Option<SortValue> {
    let value = value.trim();
    (!value.is_empty()).then(|| SortValue::Text(value.to_lowercase()))
}

fn sort_value(record: &Vacancy, key: SortKey, ctx: &PipelineContext<'_>) -> Option<SortValue> {
    match key {
        SortKey::OpenedAt => Some(SortValue::Instant(record.opened_at)),
        SortKey::ClosedAt => record.closed_at.map(SortValue::Instant),
        SortKey::CreatedAt => Some(SortValue::Instant(record.created_at)),
        SortKey::Sequence => record.sequence.map(SortValue::Number),
        SortKey::Title => text(&record.title),
        SortKey::Unit => text(&record.unit),
        SortKey::Sector => text(&record.sector),
        SortKey::JobType => text(&record.job_type),
        SortKey::Manager => text(&record.manager),
        SortKey::Creator => text(record.creator_key(ctx.unassigned_label)),
        SortKey::DaysElapsed => Some(SortValue::Number(days_open(record, ctx.now))),
    }
}

/// Stable sort; missing values go last in both directions.
fn sort(records: Vec<VacancyRef>, spec: SortSpec, ctx: &PipelineContext<'_>) -> Vec<VacancyRef> {
    let mut keyed: Vec<(Option<SortValue>, VacancyRef)> = records
        .into_iter()
        .map(|record| (sort_value(&record, spec.key, ctx), record))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => match spec.direction {
            SortDirection::Asc => a.cmp(b),
            SortDirection::Desc => b.cmp(a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    keyed.into_iter().map(|(_, record)| record).collect()
}
