use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::AddAssign;

use serde::Serialize;

use crate::models::{Category, RequisitionKind, Vacancy, VacancyRef};

pub const UNSPECIFIED_JOB_TYPE: &str = "Other roles";
pub const UNSPECIFIED: &str = "N/A";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub growth: usize,
    pub replacement: usize,
    pub frozen: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.growth + self.replacement + self.frozen
    }

    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::Growth => self.growth,
            Category::Replacement => self.replacement,
            Category::Frozen => self.frozen,
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.growth += other.growth;
        self.replacement += other.replacement;
        self.frozen += other.frozen;
    }
}

impl Sum for Tally {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Tally::default(), |mut acc, tally| {
            acc += tally;
            acc
        })
    }
}

/// One (job type, unit, sector) cell. Counts are the lengths of the record
/// lists, so they cannot disagree with what a drill-down returns.
#[derive(Debug, Clone, Default)]
pub struct SectorLeaf {
    growth: Vec<VacancyRef>,
    replacement: Vec<VacancyRef>,
    frozen: Vec<VacancyRef>,
}

impl SectorLeaf {
    fn push(&mut self, category: Category, record: VacancyRef) {
        match category {
            Category::Growth => self.growth.push(record),
            Category::Replacement => self.replacement.push(record),
            Category::Frozen => self.frozen.push(record),
        }
    }

    pub fn tally(&self) -> Tally {
        Tally {
            growth: self.growth.len(),
            replacement: self.replacement.len(),
            frozen: self.frozen.len(),
        }
    }

    pub fn records(&self, category: Category) -> &[VacancyRef] {
        match category {
            Category::Growth => &self.growth,
            Category::Replacement => &self.replacement,
            Category::Frozen => &self.frozen,
        }
    }

    /// Contributing records, optionally narrowed to one category.
    pub fn collect(&self, category: Option<Category>, out: &mut Vec<VacancyRef>) {
        match category {
            Some(category) => out.extend(self.records(category).iter().cloned()),
            None => {
                for category in Category::ALL {
                    out.extend(self.records(category).iter().cloned());
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnitNode {
    pub tally: Tally,
    pub sectors: BTreeMap<String, SectorLeaf>,
}

#[derive(Debug, Clone, Default)]
pub struct JobTypeNode {
    pub tally: Tally,
    pub units: BTreeMap<String, UnitNode>,
}

#[derive(Debug, Clone, Default)]
pub struct RollupTree {
    pub show_frozen: bool,
    pub tally: Tally,
    pub job_types: BTreeMap<String, JobTypeNode>,
}

/// Flattened leaf for tabular output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollupRow {
    pub job_type: String,
    pub unit: String,
    pub sector: String,
    pub growth: usize,
    pub replacement: usize,
    pub frozen: usize,
    pub total: usize,
}

fn label_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Category a vacancy is counted under, or `None` when it is left out.
/// Frozen vacancies only count (as frozen) when `show_frozen` is set.
pub fn categorize(record: &Vacancy, show_frozen: bool) -> Option<Category> {
    if record.frozen {
        return show_frozen.then_some(Category::Frozen);
    }
    Some(match record.kind {
        RequisitionKind::Growth => Category::Growth,
        RequisitionKind::Replacement => Category::Replacement,
    })
}

/// Groups records by job type, unit and sector. Leaf lists are filled first and
/// every ancestor tally is summed from its children afterwards.
pub fn build(records: &[VacancyRef], show_frozen: bool) -> RollupTree {
    let mut job_types: BTreeMap<String, JobTypeNode> = BTreeMap::new();

    for record in records {
        let Some(category) = categorize(record, show_frozen) else {
            continue;
        };
        job_types
            .entry(label_or(&record.job_type, UNSPECIFIED_JOB_TYPE))
            .or_default()
            .units
            .entry(label_or(&record.unit, UNSPECIFIED))
            .or_default()
            .sectors
            .entry(label_or(&record.sector, UNSPECIFIED))
            .or_default()
            .push(category, VacancyRef::clone(record));
    }

    for job in job_types.values_mut() {
        for unit in job.units.values_mut() {
            unit.tally = unit.sectors.values().map(SectorLeaf::tally).sum();
        }
        job.tally = job.units.values().map(|unit| unit.tally).sum();
    }
    let tally = job_types.values().map(|job| job.tally).sum();

    RollupTree {
        show_frozen,
        tally,
        job_types,
    }
}

impl RollupTree {
    pub fn is_empty(&self) -> bool {
        self.job_types.is_empty()
    }

    pub fn job_type(&self, job_type: &str) -> Option<&JobTypeNode> {
        self.job_types.get(job_type)
    }

    pub fn unit(&self, job_type: &str, unit: &str) -> Option<&UnitNode> {
        self.job_type(job_type)?.units.get(unit)
    }

    pub fn leaf(&self, job_type: &str, unit: &str, sector: &str) -> Option<&SectorLeaf> {
        self.unit(job_type, unit)?.sectors.get(sector)
    }

    pub fn leaves(&self) -> impl Iterator<Item = (&str, &str, &str, &SectorLeaf)> {
        self.job_types.iter().flat_map(|(job_type, job)| {
            job.units.iter().flat_map(move |(unit, node)| {
                node.sectors
                    .iter()
                    .map(move |(sector, leaf)| {
                        (job_type.as_str(), unit.as_str(), sector.as_str(), leaf)
                    })
            })
        })
    }

    /// Every distinct unit name across job types, in order. Used to expand the
    /// whole map at once.
    pub fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .job_types
            .values()
            .flat_map(|job| job.units.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn rows(&self) -> Vec<RollupRow> {
        self.leaves()
            .map(|(job_type, unit, sector, leaf)| {
                let tally = leaf.tally();
                RollupRow {
                    job_type: job_type.to_string(),
                    unit: unit.to_string(),
                    sector: sector.to_string(),
                    growth: tally.growth,
                    replacement: tally.replacement,
                    frozen: tally.frozen,
                    total: tally.total(),
                }
            })
            .collect()
    }
}

impl UnitNode {
    pub fn collect(&self, category: Option<Category>, out: &mut Vec<VacancyRef>) {
        for leaf in self.sectors.values() {
            leaf.collect(category, out);
        }
    }
}

impl JobTypeNode {
    pub fn collect(&self, category: Option<Category>, out: &mut Vec<VacancyRef>) {
        for unit in self.units.values() {
            unit.collect(category, out);
        }
    }
}
