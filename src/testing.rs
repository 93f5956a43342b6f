use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::models::{RequisitionKind, Vacancy, VacancyRef};

pub(crate) fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0)
        .single()
        .expect("valid reference instant")
}

pub(crate) fn vacancy(job_type: &str, unit: &str, sector: &str, kind: RequisitionKind) -> Vacancy {
    let opened_at = reference_now() - Duration::days(1);
    Vacancy {
        id: Uuid::new_v4(),
        created_at: opened_at,
        sequence: None,
        opened_at,
        unit: unit.to_string(),
        sector: sector.to_string(),
        job_type: job_type.to_string(),
        title: "Forklift operator".to_string(),
        kind,
        reason: "turnover".to_string(),
        replaced_name: None,
        shift: "morning".to_string(),
        manager: "Carla Nunes".to_string(),
        director: "Paulo Reis".to_string(),
        closed_at: None,
        hire_name: None,
        sourcing_channel: None,
        creator: Some("ana".to_string()),
        closer: None,
        frozen: false,
        observations: vec!["01/03/2026 ana: Vacancy opened.".to_string()],
    }
}

pub(crate) fn opened_days_ago(mut record: Vacancy, days: i64) -> Vacancy {
    record.opened_at = reference_now() - Duration::days(days);
    record.created_at = record.opened_at;
    record
}

pub(crate) fn closed_after(mut record: Vacancy, days: i64) -> Vacancy {
    record.closed_at = Some(record.opened_at + Duration::days(days));
    record.closer = Some("bruno".to_string());
    record.frozen = false;
    record
}

pub(crate) fn frozen(mut record: Vacancy) -> Vacancy {
    record.frozen = true;
    record
}

pub(crate) fn shared(records: Vec<Vacancy>) -> Vec<VacancyRef> {
    records.into_iter().map(Arc::new).collect()
}
