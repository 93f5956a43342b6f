use std::collections::BTreeMap;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::aging::DateWindow;
use crate::models::VacancyRef;
use crate::rollup::UNSPECIFIED_JOB_TYPE;

#[derive(Debug, Clone)]
pub struct JobTypeShare {
    pub job_type: String,
    pub records: Vec<VacancyRef>,
    pub percent: f64,
}

/// Share of each job type among `records`, largest first.
pub fn job_type_share(records: &[VacancyRef]) -> Vec<JobTypeShare> {
    let mut groups: BTreeMap<String, Vec<VacancyRef>> = BTreeMap::new();
    for record in records {
        let job_type = record.job_type.trim();
        let key = if job_type.is_empty() {
            UNSPECIFIED_JOB_TYPE
        } else {
            job_type
        };
        groups
            .entry(key.to_string())
            .or_default()
            .push(VacancyRef::clone(record));
    }

    let total = records.len();
    let mut shares: Vec<JobTypeShare> = groups
        .into_iter()
        .map(|(job_type, records)| JobTypeShare {
            percent: if total == 0 {
                0.0
            } else {
                records.len() as f64 * 100.0 / total as f64
            },
            job_type,
            records,
        })
        .collect();

    shares.sort_by(|a, b| b.records.len().cmp(&a.records.len()));
    shares
}

#[derive(Debug, Clone)]
pub struct CloserTally {
    pub closer: String,
    pub records: Vec<VacancyRef>,
}

/// Closed vacancies grouped by who closed them, most closures first. Closures
/// without a recorded closer go under `fallback`.
pub fn closures_by_closer(records: &[VacancyRef], fallback: &str) -> Vec<CloserTally> {
    let mut groups: BTreeMap<String, Vec<VacancyRef>> = BTreeMap::new();
    for record in records.iter().filter(|record| record.is_closed()) {
        let closer = record
            .closer
            .as_deref()
            .map(str::trim)
            .filter(|closer| !closer.is_empty())
            .unwrap_or(fallback);
        groups
            .entry(closer.to_string())
            .or_default()
            .push(VacancyRef::clone(record));
    }

    let mut ranking: Vec<CloserTally> = groups
        .into_iter()
        .map(|(closer, records)| CloserTally { closer, records })
        .collect();
    ranking.sort_by(|a, b| b.records.len().cmp(&a.records.len()));
    ranking
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DailyBasis {
    #[default]
    Created,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DailyScope {
    #[default]
    AllInPeriod,
    OnlyOpen,
}

#[derive(Debug, Clone, Default)]
pub struct DirectorNode {
    pub records: Vec<VacancyRef>,
    pub managers: BTreeMap<String, Vec<VacancyRef>>,
}

#[derive(Debug, Clone, Default)]
pub struct TitleNode {
    pub records: Vec<VacancyRef>,
    pub directors: BTreeMap<String, DirectorNode>,
}

#[derive(Debug, Clone)]
pub struct DayNode {
    pub day: NaiveDate,
    pub records: Vec<VacancyRef>,
    pub titles: BTreeMap<String, TitleNode>,
}

#[derive(Debug, Clone, Default)]
pub struct DailyBreakdown {
    pub total: usize,
    /// Most recent day first.
    pub days: Vec<DayNode>,
}

fn or_placeholder(value: &str, placeholder: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}

/// Day → job title → director → manager tree over the vacancies whose basis
/// date falls in `window`.
pub fn daily_breakdown(
    records: &[VacancyRef],
    basis: DailyBasis,
    scope: DailyScope,
    window: DateWindow,
) -> DailyBreakdown {
    let mut days: BTreeMap<NaiveDate, (Vec<VacancyRef>, BTreeMap<String, TitleNode>)> =
        BTreeMap::new();
    let mut total = 0;

    for record in records {
        let instant = match basis {
            DailyBasis::Created => Some(record.created_at),
            DailyBasis::Closed => record.closed_at,
        };
        let Some(day) = instant.map(|at| at.date_naive()) else {
            continue;
        };
        if !window.contains(day) {
            continue;
        }
        if scope == DailyScope::OnlyOpen && record.is_closed() {
            continue;
        }

        total += 1;
        let (day_records, titles) = days.entry(day).or_default();
        day_records.push(VacancyRef::clone(record));

        let title = titles
            .entry(or_placeholder(&record.title, "NO TITLE"))
            .or_default();
        title.records.push(VacancyRef::clone(record));

        let director = title
            .directors
            .entry(or_placeholder(&record.director, "NO DIRECTOR"))
            .or_default();
        director.records.push(VacancyRef::clone(record));
        director
            .managers
            .entry(or_placeholder(&record.manager, "NO MANAGER"))
            .or_default()
            .push(VacancyRef::clone(record));
    }

    DailyBreakdown {
        total,
        days: days
            .into_iter()
            .rev()
            .map(|(day, (records, titles))| DayNode {
                day,
                records,
                titles,
            })
            .collect(),
    }
}
