use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::models::{Vacancy, VacancyRef};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Whole days between two instants: the absolute difference rounded up, so any
/// partial day counts as a full one.
pub fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let millis = (to - from).num_milliseconds().abs();
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

/// Days a vacancy has been (or was) open: up to its closing instant, or up to
/// `now` while it is still open.
pub fn days_open(record: &Vacancy, now: DateTime<Utc>) -> i64 {
    elapsed_days(record.opened_at, record.closed_at.unwrap_or(now))
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum AgingBucket {
    #[value(name = "0-15")]
    UpTo15,
    #[value(name = "16-30")]
    UpTo30,
    #[value(name = "31-45")]
    UpTo45,
    #[value(name = "46+")]
    Over45,
}

impl AgingBucket {
    pub const ALL: [AgingBucket; 4] = [
        AgingBucket::UpTo15,
        AgingBucket::UpTo30,
        AgingBucket::UpTo45,
        AgingBucket::Over45,
    ];

    pub fn classify(days: i64) -> Self {
        match days {
            i64::MIN..=15 => AgingBucket::UpTo15,
            16..=30 => AgingBucket::UpTo30,
            31..=45 => AgingBucket::UpTo45,
            _ => AgingBucket::Over45,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgingBucket::UpTo15 => "0-15 days",
            AgingBucket::UpTo30 => "16-30 days",
            AgingBucket::UpTo45 => "31-45 days",
            AgingBucket::Over45 => "46+ days",
        }
    }

    fn index(self) -> usize {
        match self {
            AgingBucket::UpTo15 => 0,
            AgingBucket::UpTo30 => 1,
            AgingBucket::UpTo45 => 2,
            AgingBucket::Over45 => 3,
        }
    }
}

impl fmt::Display for AgingBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    OpenAging,
    LeadTime,
}

/// Which duration a bucket table measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketMode {
    /// Open vacancies, measured from opening to `now`.
    OpenAging { now: DateTime<Utc> },
    /// Closed vacancies, measured from opening to closing.
    LeadTime,
}

impl BucketMode {
    pub fn kind(self) -> BucketKind {
        match self {
            BucketMode::OpenAging { .. } => BucketKind::OpenAging,
            BucketMode::LeadTime => BucketKind::LeadTime,
        }
    }

    /// Elapsed days under this mode, or `None` when the vacancy does not apply.
    pub fn elapsed(self, record: &Vacancy) -> Option<i64> {
        match self {
            BucketMode::OpenAging { now } => record
                .is_open()
                .then(|| elapsed_days(record.opened_at, now)),
            BucketMode::LeadTime => record
                .closed_at
                .map(|closed_at| elapsed_days(record.opened_at, closed_at)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BucketTable {
    kind: BucketKind,
    buckets: [Vec<VacancyRef>; 4],
}

impl BucketTable {
    pub fn build(records: &[VacancyRef], mode: BucketMode) -> Self {
        let mut buckets: [Vec<VacancyRef>; 4] = Default::default();
        for record in records {
            if let Some(days) = mode.elapsed(record) {
                buckets[AgingBucket::classify(days).index()].push(VacancyRef::clone(record));
            }
        }
        Self {
            kind: mode.kind(),
            buckets,
        }
    }

    pub fn empty(kind: BucketKind) -> Self {
        Self {
            kind,
            buckets: Default::default(),
        }
    }

    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    pub fn count(&self, bucket: AgingBucket) -> usize {
        self.buckets[bucket.index()].len()
    }

    pub fn records(&self, bucket: AgingBucket) -> &[VacancyRef] {
        &self.buckets[bucket.index()]
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn counts(&self) -> [(AgingBucket, usize); 4] {
        AgingBucket::ALL.map(|bucket| (bucket, self.count(bucket)))
    }
}

/// Inclusive day window used to pick closures for lead-time views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// From the first day of `today`'s month through `today`.
    pub fn month_to_date(today: NaiveDate) -> Self {
        let start = today.with_day(1).unwrap_or(today);
        Self { start, end: today }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%d/%m/%Y"),
            self.end.format("%d/%m/%Y")
        )
    }
}

/// Vacancies whose closing day falls inside `window`. Open vacancies never pass.
pub fn closed_within(records: &[VacancyRef], window: DateWindow) -> Vec<VacancyRef> {
    records
        .iter()
        .filter(|record| {
            record
                .closed_at
                .is_some_and(|closed_at| window.contains(closed_at.date_naive()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequisitionKind;
    use crate::testing::{closed_after, opened_days_ago, reference_now, shared, vacancy};
    use chrono::Duration;

    #[test]
    fn elapsed_days_rounds_partial_days_up() {
        let start = reference_now();
        assert_eq!(elapsed_days(start, start), 0);
        assert_eq!(elapsed_days(start, start + Duration::milliseconds(1)), 1);
        assert_eq!(elapsed_days(start, start + Duration::days(3)), 3);
        assert_eq!(elapsed_days(start, start + Duration::hours(73)), 4);
        assert_eq!(elapsed_days(start + Duration::days(2), start), 2);
    }

    #[test]
    fn buckets_follow_inclusive_low_boundaries() {
        assert_eq!(AgingBucket::classify(0), AgingBucket::UpTo15);
        assert_eq!(AgingBucket::classify(15), AgingBucket::UpTo15);
        assert_eq!(AgingBucket::classify(16), AgingBucket::UpTo30);
        assert_eq!(AgingBucket::classify(30), AgingBucket::UpTo30);
        assert_eq!(AgingBucket::classify(31), AgingBucket::UpTo45);
        assert_eq!(AgingBucket::classify(45), AgingBucket::UpTo45);
        assert_eq!(AgingBucket::classify(46), AgingBucket::Over45);
        assert_eq!(AgingBucket::classify(400), AgingBucket::Over45);
    }

    #[test]
    fn open_aging_skips_closed_records_and_sums_to_input() {
        let now = reference_now();
        let records = shared(vec![
            opened_days_ago(vacancy("Ops", "A", "X", RequisitionKind::Growth), 15),
            opened_days_ago(vacancy("Ops", "A", "X", RequisitionKind::Growth), 16),
            opened_days_ago(vacancy("Ops", "A", "X", RequisitionKind::Growth), 45),
            opened_days_ago(vacancy("Ops", "A", "X", RequisitionKind::Growth), 46),
            closed_after(
                opened_days_ago(vacancy("Ops", "A", "X", RequisitionKind::Growth), 60),
                10,
            ),
        ]);

        let table = BucketTable::build(&records, BucketMode::OpenAging { now });
        assert_eq!(table.kind(), BucketKind::OpenAging);
        assert_eq!(table.count(AgingBucket::UpTo15), 1);
        assert_eq!(table.count(AgingBucket::UpTo30), 1);
        assert_eq!(table.count(AgingBucket::UpTo45), 1);
        assert_eq!(table.count(AgingBucket::Over45), 1);
        assert_eq!(table.total(), 4);
    }

    #[test]
    fn lead_time_measures_open_to_close() {
        let records = shared(vec![
            closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 3),
            closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 31),
            vacancy("Ops", "A", "X", RequisitionKind::Growth),
        ]);

        let table = BucketTable::build(&records, BucketMode::LeadTime);
        assert_eq!(table.count(AgingBucket::UpTo15), 1);
        assert_eq!(table.count(AgingBucket::UpTo45), 1);
        assert_eq!(table.total(), 2);
    }

    #[test]
    fn bucket_records_are_the_input_handles() {
        let records = shared(vec![closed_after(
            vacancy("Ops", "A", "X", RequisitionKind::Growth),
            20,
        )]);
        let table = BucketTable::build(&records, BucketMode::LeadTime);
        assert!(VacancyRef::ptr_eq(
            &table.records(AgingBucket::UpTo30)[0],
            &records[0]
        ));
    }

    #[test]
    fn closing_window_is_inclusive_at_day_granularity() {
        let opened = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let first = closed_after(opened.clone(), 1);
        let last = closed_after(opened.clone(), 5);
        let outside = closed_after(opened.clone(), 6);
        let window = DateWindow::new(
            first.closed_at.map(|at| at.date_naive()).unwrap_or_default(),
            last.closed_at.map(|at| at.date_naive()).unwrap_or_default(),
        );

        let records = shared(vec![first, last, outside, opened]);
        let picked = closed_within(&records, window);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn month_to_date_starts_on_the_first() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap_or_default();
        let window = DateWindow::month_to_date(today);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap_or_default());
        assert_eq!(window.end, today);
        assert!(window.contains(today));
    }
}
