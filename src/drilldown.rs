//! Maps a click on an aggregated number back to the records behind it.
//!
//! Every selection is assembled from the record handles captured when the
//! rollup or bucket table was built. Nothing is re-queried, so a selection
//! always has exactly as many records as the number it came from.

use crate::aging::{AgingBucket, BucketKind, BucketTable};
use crate::breakdown::{CloserTally, JobTypeShare};
use crate::models::{Category, VacancyRef};
use crate::rollup::RollupTree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrillTarget {
    Root {
        category: Option<Category>,
    },
    JobType {
        job_type: String,
        category: Option<Category>,
    },
    Unit {
        job_type: String,
        unit: String,
        category: Option<Category>,
    },
    Sector {
        job_type: String,
        unit: String,
        sector: String,
        category: Option<Category>,
    },
}

impl DrillTarget {
    fn category(&self) -> Option<Category> {
        match self {
            DrillTarget::Root { category }
            | DrillTarget::JobType { category, .. }
            | DrillTarget::Unit { category, .. }
            | DrillTarget::Sector { category, .. } => *category,
        }
    }

    fn path(&self) -> String {
        match self {
            DrillTarget::Root { .. } => "all".to_string(),
            DrillTarget::JobType { job_type, .. } => job_type.clone(),
            DrillTarget::Unit { job_type, unit, .. } => format!("{job_type} > {unit}"),
            DrillTarget::Sector {
                job_type,
                unit,
                sector,
                ..
            } => format!("{job_type} > {unit} > {sector}"),
        }
    }

    pub fn label(&self) -> String {
        match self.category() {
            Some(category) => format!("Open vacancies: {} ({})", self.path(), category.label()),
            None => format!("Open vacancies: {}", self.path()),
        }
    }
}

/// Records behind one aggregated figure plus a title for the detail list.
#[derive(Debug, Clone)]
pub struct Selection {
    pub label: String,
    pub records: Vec<VacancyRef>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn drill_rollup(tree: &RollupTree, target: &DrillTarget) -> Selection {
    let category = target.category();
    let mut records = Vec::new();

    match target {
        DrillTarget::Root { .. } => {
            for job in tree.job_types.values() {
                job.collect(category, &mut records);
            }
        }
        DrillTarget::JobType { job_type, .. } => {
            if let Some(job) = tree.job_type(job_type) {
                job.collect(category, &mut records);
            }
        }
        DrillTarget::Unit { job_type, unit, .. } => {
            if let Some(node) = tree.unit(job_type, unit) {
                node.collect(category, &mut records);
            }
        }
        DrillTarget::Sector {
            job_type,
            unit,
            sector,
            ..
        } => {
            if let Some(leaf) = tree.leaf(job_type, unit, sector) {
                leaf.collect(category, &mut records);
            }
        }
    }

    Selection {
        label: target.label(),
        records,
    }
}

pub fn drill_bucket(table: &BucketTable, bucket: AgingBucket) -> Selection {
    let label = match table.kind() {
        BucketKind::OpenAging => format!("Open for {}", bucket.label()),
        BucketKind::LeadTime => format!("Closed in {}", bucket.label()),
    };
    Selection {
        label,
        records: table.records(bucket).to_vec(),
    }
}

pub fn drill_share(shares: &[JobTypeShare], job_type: &str) -> Selection {
    Selection {
        label: format!("Open vacancies: {job_type}"),
        records: shares
            .iter()
            .find(|share| share.job_type == job_type)
            .map(|share| share.records.clone())
            .unwrap_or_default(),
    }
}

pub fn drill_closer(ranking: &[CloserTally], closer: &str) -> Selection {
    Selection {
        label: format!("Closed by {closer}"),
        records: ranking
            .iter()
            .find(|row| row.closer == closer)
            .map(|row| row.records.clone())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aging::BucketMode;
    use crate::breakdown::{closures_by_closer, job_type_share};
    use crate::models::RequisitionKind;
    use crate::rollup::build;
    use crate::testing::{closed_after, frozen, opened_days_ago, reference_now, shared, vacancy};

    fn sample() -> Vec<VacancyRef> {
        shared(vec![
            vacancy("Ops", "A", "X", RequisitionKind::Growth),
            vacancy("Ops", "A", "X", RequisitionKind::Growth),
            vacancy("Ops", "A", "X", RequisitionKind::Replacement),
            frozen(vacancy("Ops", "A", "X", RequisitionKind::Growth)),
            vacancy("Ops", "B", "Y", RequisitionKind::Replacement),
            vacancy("Adm", "C", "Z", RequisitionKind::Growth),
        ])
    }

    #[test]
    fn leaf_selection_matches_stored_count_and_keys() {
        let records = sample();
        let tree = build(&records, true);
        let leaf = tree.leaf("Ops", "A", "X").cloned().unwrap_or_default();

        for category in Category::ALL {
            let selection = drill_rollup(
                &tree,
                &DrillTarget::Sector {
                    job_type: "Ops".to_string(),
                    unit: "A".to_string(),
                    sector: "X".to_string(),
                    category: Some(category),
                },
            );
            assert_eq!(selection.len(), leaf.tally().get(category));
            for record in &selection.records {
                assert_eq!(record.job_type, "Ops");
                assert_eq!(record.unit, "A");
                assert_eq!(record.sector, "X");
                assert_eq!(crate::rollup::categorize(record, true), Some(category));
            }
        }
    }

    #[test]
    fn selections_share_identity_with_the_snapshot() {
        let records = sample();
        let tree = build(&records, false);
        let selection = drill_rollup(
            &tree,
            &DrillTarget::Unit {
                job_type: "Ops".to_string(),
                unit: "B".to_string(),
                category: None,
            },
        );
        assert_eq!(selection.len(), 1);
        assert!(VacancyRef::ptr_eq(&selection.records[0], &records[4]));
        assert_eq!(selection.label, "Open vacancies: Ops > B");
    }

    #[test]
    fn ancestor_selection_sizes_follow_tallies() {
        let records = sample();
        let tree = build(&records, false);

        let root = drill_rollup(&tree, &DrillTarget::Root { category: None });
        assert_eq!(root.len(), tree.tally.total());

        let growth = drill_rollup(
            &tree,
            &DrillTarget::JobType {
                job_type: "Ops".to_string(),
                category: Some(Category::Growth),
            },
        );
        assert_eq!(growth.len(), 2);
        assert_eq!(growth.label, "Open vacancies: Ops (growth)");
    }

    #[test]
    fn unknown_targets_give_empty_selections() {
        let tree = build(&sample(), false);
        let selection = drill_rollup(
            &tree,
            &DrillTarget::JobType {
                job_type: "Nope".to_string(),
                category: None,
            },
        );
        assert!(selection.is_empty());
        assert_eq!(selection.label, "Open vacancies: Nope");
    }

    #[test]
    fn bucket_share_and_closer_drilldowns() {
        let records = shared(vec![
            opened_days_ago(vacancy("Ops", "A", "X", RequisitionKind::Growth), 20),
            closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 50),
        ]);

        let aging = BucketTable::build(&records, BucketMode::OpenAging { now: reference_now() });
        let selection = drill_bucket(&aging, AgingBucket::UpTo30);
        assert_eq!(selection.label, "Open for 16-30 days");
        assert!(VacancyRef::ptr_eq(&selection.records[0], &records[0]));

        let lead = BucketTable::build(&records, BucketMode::LeadTime);
        assert_eq!(drill_bucket(&lead, AgingBucket::Over45).len(), 1);

        let shares = job_type_share(&records);
        assert_eq!(drill_share(&shares, "Ops").len(), 2);
        assert!(drill_share(&shares, "Adm").is_empty());

        let ranking = closures_by_closer(&records, "SYSTEM");
        assert_eq!(drill_closer(&ranking, "bruno").len(), 1);
    }
}
