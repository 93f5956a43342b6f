use std::fmt::Write;

use crate::aging::BucketTable;
use crate::breakdown::DailyBreakdown;
use crate::models::Category;
use crate::reconcile::DerivedViews;

fn column(category: Category) -> &'static str {
    match category {
        Category::Growth => "Growth",
        Category::Replacement => "Replacement",
        Category::Frozen => "Frozen",
    }
}

fn write_buckets(output: &mut String, table: &BucketTable, empty: &str) {
    if table.total() == 0 {
        let _ = writeln!(output, "{empty}");
        return;
    }
    for (bucket, count) in table.counts() {
        let _ = writeln!(output, "- {}: {}", bucket.label(), count);
    }
}

/// Renders the dashboard as Markdown.
pub fn build_report(views: &DerivedViews, daily: &DailyBreakdown) -> String {
    let mut output = String::new();
    let tree = &views.rollup;

    let _ = writeln!(output, "# Vacancy Pulse Report");
    let _ = writeln!(
        output,
        "Generated {} from {} vacancies (closures {})",
        views.computed_at.format("%Y-%m-%d %H:%M UTC"),
        views.snapshot.len(),
        views.closing_window
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Vacancies");

    if tree.is_empty() {
        let _ = writeln!(output, "No open vacancies.");
    } else {
        let mut header = String::from("| Job type | Unit | Sector |");
        let mut rule = String::from("|---|---|---|");
        let categories: Vec<Category> = Category::ALL
            .into_iter()
            .filter(|category| tree.show_frozen || *category != Category::Frozen)
            .collect();
        for category in &categories {
            let _ = write!(header, " {} |", column(*category));
            rule.push_str("---:|");
        }
        header.push_str(" Total |");
        rule.push_str("---:|");
        let _ = writeln!(output, "{header}");
        let _ = writeln!(output, "{rule}");

        for row in tree.rows() {
            let _ = write!(output, "| {} | {} | {} |", row.job_type, row.unit, row.sector);
            for category in &categories {
                let count = match category {
                    Category::Growth => row.growth,
                    Category::Replacement => row.replacement,
                    Category::Frozen => row.frozen,
                };
                let _ = write!(output, " {count} |");
            }
            let _ = writeln!(output, " {} |", row.total);
        }
        let _ = write!(output, "| **Total** | | |");
        for category in &categories {
            let _ = write!(output, " {} |", tree.tally.get(*category));
        }
        let _ = writeln!(output, " {} |", tree.tally.total());
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Vacancy Aging");
    write_buckets(&mut output, &views.aging, "No open vacancies.");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lead Time ({})", views.closing_window);
    write_buckets(&mut output, &views.lead_time, "No closures in this window.");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Closures by Recruiter");

    if views.closers.is_empty() {
        let _ = writeln!(output, "No closures in this window.");
    } else {
        for tally in views.closers.iter().take(10) {
            let _ = writeln!(output, "- {}: {}", tally.closer, tally.records.len());
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Job Type Share");

    if views.share.is_empty() {
        let _ = writeln!(output, "No open vacancies.");
    } else {
        for share in &views.share {
            let _ = writeln!(
                output,
                "- {}: {} ({:.1}%)",
                share.job_type,
                share.records.len(),
                share.percent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Intake");

    if daily.days.is_empty() {
        let _ = writeln!(output, "No vacancies in this window.");
    } else {
        for day in &daily.days {
            let _ = writeln!(
                output,
                "- {}: {} vacancies",
                day.day.format("%d/%m/%Y"),
                day.records.len()
            );
            for (title, node) in &day.titles {
                let _ = writeln!(output, "  - {}: {}", title, node.records.len());
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::aging::DateWindow;
    use crate::breakdown::{daily_breakdown, DailyBasis, DailyScope};
    use crate::config::EngineSettings;
    use crate::models::{RequisitionKind, Snapshot};
    use crate::reconcile::ViewState;
    use crate::testing::{closed_after, frozen, opened_days_ago, reference_now, vacancy};

    fn views(show_frozen: bool) -> DerivedViews {
        let records = vec![
            opened_days_ago(vacancy("Ops", "A", "X", RequisitionKind::Growth), 10),
            frozen(vacancy("Ops", "A", "X", RequisitionKind::Replacement)),
            closed_after(opened_days_ago(vacancy("Adm", "B", "Y", RequisitionKind::Growth), 5), 3),
        ];
        let view = ViewState {
            show_frozen,
            ..ViewState::default()
        };
        DerivedViews::compute(
            Arc::new(Snapshot::new(1, reference_now(), records)),
            &view,
            &EngineSettings::default(),
            reference_now(),
        )
    }

    #[test]
    fn report_lists_every_section() {
        let views = views(false);
        let window = DateWindow::month_to_date(reference_now().date_naive());
        let daily = daily_breakdown(
            &views.snapshot.records,
            DailyBasis::Created,
            DailyScope::AllInPeriod,
            window,
        );
        let report = build_report(&views, &daily);

        assert!(report.starts_with("# Vacancy Pulse Report"));
        assert!(report.contains("| Job type | Unit | Sector | Growth | Replacement | Total |"));
        assert!(report.contains("| Ops | A | X | 1 | 0 | 1 |"));
        assert!(report.contains("- 0-15 days: 1"));
        assert!(report.contains("## Closures by Recruiter\n- bruno: 1"));
        assert!(report.contains("- Ops: 1 (100.0%)"));
        assert!(report.contains("## Daily Intake\n- "));
    }

    #[test]
    fn frozen_column_appears_only_when_shown() {
        let report = build_report(&views(true), &DailyBreakdown::default());
        assert!(report.contains("| Growth | Replacement | Frozen | Total |"));
        assert!(report.contains("| Ops | A | X | 1 | 0 | 1 | 2 |"));
        assert!(report.contains("No vacancies in this window."));
    }
}
