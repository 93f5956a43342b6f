use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PulseError;
use crate::models::Vacancy;

pub const OBSERVATION_SEPARATOR: &str = " | ";

/// One spreadsheet row per vacancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Vacancy #")]
    pub sequence: String,
    #[serde(rename = "Created")]
    pub created: String,
    #[serde(rename = "Opened")]
    pub opened: String,
    #[serde(rename = "Closed")]
    pub closed: String,
    #[serde(rename = "Unit")]
    pub unit: String,
    #[serde(rename = "Sector")]
    pub sector: String,
    #[serde(rename = "Job type")]
    pub job_type: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Kind")]
    pub kind: String,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "Replacing")]
    pub replaced_name: String,
    #[serde(rename = "Shift")]
    pub shift: String,
    #[serde(rename = "Manager")]
    pub manager: String,
    #[serde(rename = "Director")]
    pub director: String,
    #[serde(rename = "Hired")]
    pub hire_name: String,
    #[serde(rename = "Channel")]
    pub sourcing_channel: String,
    #[serde(rename = "Created by")]
    pub creator: String,
    #[serde(rename = "Closed by")]
    pub closer: String,
    #[serde(rename = "Frozen")]
    pub frozen: String,
    #[serde(rename = "Observations")]
    pub observations: String,
}

fn day(at: DateTime<Utc>) -> String {
    at.format("%d/%m/%Y").to_string()
}

impl From<&Vacancy> for ExportRow {
    fn from(record: &Vacancy) -> Self {
        Self {
            id: record.id.to_string(),
            sequence: record.sequence.map(|n| n.to_string()).unwrap_or_default(),
            created: day(record.created_at),
            opened: day(record.opened_at),
            closed: record.closed_at.map(day).unwrap_or_default(),
            unit: record.unit.clone(),
            sector: record.sector.clone(),
            job_type: record.job_type.clone(),
            title: record.title.clone(),
            kind: record.kind.to_string(),
            reason: record.reason.clone(),
            replaced_name: record.replaced_name.clone().unwrap_or_default(),
            shift: record.shift.clone(),
            manager: record.manager.clone(),
            director: record.director.clone(),
            hire_name: record.hire_name.clone().unwrap_or_default(),
            sourcing_channel: record.sourcing_channel.clone().unwrap_or_default(),
            creator: record.creator.clone().unwrap_or_default(),
            closer: record.closer.clone().unwrap_or_default(),
            frozen: if record.frozen { "yes" } else { "no" }.to_string(),
            observations: record.observations.join(OBSERVATION_SEPARATOR),
        }
    }
}

/// Projects an already filtered and sorted list, keeping its order.
pub fn export_rows<'a, I>(records: I) -> Vec<ExportRow>
where
    I: IntoIterator<Item = &'a Vacancy>,
{
    records.into_iter().map(ExportRow::from).collect()
}

pub fn write_csv<W: Write>(writer: W, rows: &[ExportRow]) -> Result<(), PulseError> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &Path, rows: &[ExportRow]) -> Result<(), PulseError> {
    let file = std::fs::File::create(path)?;
    write_csv(file, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequisitionKind;
    use crate::testing::{closed_after, vacancy};

    #[test]
    fn rows_format_dates_and_join_observations() {
        let mut record = closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 2);
        record.sequence = Some(42);
        record.observations.push("20/03/2026 bruno: closed".to_string());

        let rows = export_rows([&record]);
        let row = &rows[0];
        assert_eq!(row.sequence, "42");
        assert_eq!(row.opened, "19/03/2026");
        assert_eq!(row.closed, "21/03/2026");
        assert_eq!(row.kind, "growth");
        assert_eq!(row.frozen, "no");
        assert_eq!(
            row.observations,
            "01/03/2026 ana: Vacancy opened. | 20/03/2026 bruno: closed"
        );
    }

    #[test]
    fn open_vacancies_leave_closing_columns_blank() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Replacement);
        let row = ExportRow::from(&record);
        assert_eq!(row.closed, "");
        assert_eq!(row.hire_name, "");
        assert_eq!(row.closer, "");
    }

    #[test]
    fn csv_has_a_header_and_one_line_per_row() {
        let records = [
            vacancy("Ops", "A", "X", RequisitionKind::Growth),
            vacancy("Ops", "B", "Y", RequisitionKind::Growth),
        ];
        let rows = export_rows(records.iter());
        let mut buffer = Vec::new();
        write_csv(&mut buffer, &rows).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID,Vacancy #,Created,Opened,Closed,Unit"));
    }
}
