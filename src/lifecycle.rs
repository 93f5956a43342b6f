//! Vacancy lifecycle transitions.
//!
//! Each transition takes the current record and returns the next one, with
//! audit lines appended to its observations. Earlier lines are never
//! touched, so persisting a transition means rewriting the whole list.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::ValueEnum;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::models::{RequisitionKind, Vacancy, VacancyRef};

pub fn audit_line(at: DateTime<Utc>, actor: &str, message: &str) -> String {
    format!("{} {}: {}", at.format("%d/%m/%Y"), actor, message)
}

fn require(value: &str, what: &'static str) -> Result<(), LifecycleError> {
    if value.trim().is_empty() {
        Err(LifecycleError::Blank(what))
    } else {
        Ok(())
    }
}

fn appended(record: &Vacancy, line: String) -> Vec<String> {
    let mut observations = record.observations.clone();
    observations.push(line);
    observations
}

/// Fields captured by the "new vacancy" form.
#[derive(Debug, Clone)]
pub struct NewVacancy {
    pub sequence: Option<i64>,
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
}

pub fn open(draft: NewVacancy, actor: &str, at: DateTime<Utc>) -> Result<Vacancy, LifecycleError> {
    require(actor, "actor")?;
    require(&draft.unit, "unit")?;
    require(&draft.title, "title")?;

    Ok(Vacancy {
        id: Uuid::new_v4(),
        created_at: at,
        sequence: draft.sequence,
        opened_at: at,
        unit: draft.unit,
        sector: draft.sector,
        job_type: draft.job_type,
        title: draft.title,
        kind: draft.kind,
        reason: draft.reason,
        replaced_name: draft.replaced_name.filter(|name| !name.trim().is_empty()),
        shift: draft.shift,
        manager: draft.manager,
        director: draft.director,
        closed_at: None,
        hire_name: None,
        sourcing_channel: None,
        creator: Some(actor.to_string()),
        closer: None,
        frozen: false,
        observations: vec![audit_line(at, actor, "Vacancy opened.")],
    })
}

#[derive(Debug, Clone)]
pub struct Closing {
    pub closed_at: DateTime<Utc>,
    pub hire_name: String,
    pub sourcing_channel: String,
    pub note: Option<String>,
}

/// Closing instant for a vacancy closed "on" a calendar day: the start of
/// that day, or the opening instant when it opened later that same day.
pub fn closing_on(record: &Vacancy, day: NaiveDate) -> DateTime<Utc> {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    if day == record.opened_at.date_naive() {
        start.max(record.opened_at)
    } else {
        start
    }
}

/// Closes an open vacancy. A frozen vacancy is unfrozen by closing it.
pub fn close(
    record: &Vacancy,
    closing: Closing,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<Vacancy, LifecycleError> {
    require(actor, "actor")?;
    require(&closing.hire_name, "hire name")?;
    if record.is_closed() {
        return Err(LifecycleError::AlreadyClosed);
    }
    if closing.closed_at < record.opened_at {
        return Err(LifecycleError::ClosesBeforeOpening);
    }

    let mut message = format!("Vacancy closed. Hired: {}.", closing.hire_name.trim());
    if let Some(note) = closing.note.as_deref().map(str::trim).filter(|note| !note.is_empty()) {
        message.push_str(&format!(" Note: {note}"));
    }

    Ok(Vacancy {
        closed_at: Some(closing.closed_at),
        hire_name: Some(closing.hire_name.trim().to_string()),
        sourcing_channel: Some(closing.sourcing_channel),
        closer: Some(actor.to_string()),
        frozen: false,
        observations: appended(record, audit_line(at, actor, &message)),
        ..record.clone()
    })
}

pub fn set_frozen(
    record: &Vacancy,
    frozen: bool,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<Vacancy, LifecycleError> {
    require(actor, "actor")?;
    if frozen && record.is_closed() {
        return Err(LifecycleError::FrozenWhileClosed);
    }
    if record.frozen == frozen {
        return Err(LifecycleError::NoChange);
    }

    let message = if frozen {
        "Vacancy frozen."
    } else {
        "Vacancy unfrozen."
    };
    Ok(Vacancy {
        frozen,
        observations: appended(record, audit_line(at, actor, message)),
        ..record.clone()
    })
}

/// Reopens a closed vacancy, clearing everything the closing set.
pub fn reopen(
    record: &Vacancy,
    reason: &str,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<Vacancy, LifecycleError> {
    require(actor, "actor")?;
    require(reason, "reason")?;
    if record.is_open() {
        return Err(LifecycleError::NotClosed);
    }

    let message = format!(
        "Vacancy REOPENED. Reason: {}. (Previously closed with: {}.)",
        reason.trim(),
        record.hire_name.as_deref().unwrap_or("not informed")
    );
    Ok(Vacancy {
        closed_at: None,
        hire_name: None,
        closer: None,
        frozen: false,
        observations: appended(record, audit_line(at, actor, &message)),
        ..record.clone()
    })
}

pub fn comment(
    record: &Vacancy,
    text: &str,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<Vacancy, LifecycleError> {
    require(actor, "actor")?;
    require(text, "comment")?;
    Ok(Vacancy {
        observations: appended(record, audit_line(at, actor, text.trim())),
        ..record.clone()
    })
}

/// Administrative field corrections. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct VacancyEdit {
    pub sequence: Option<i64>,
    pub unit: Option<String>,
    pub sector: Option<String>,
    pub job_type: Option<String>,
    pub title: Option<String>,
    pub kind: Option<RequisitionKind>,
    pub shift: Option<String>,
    pub manager: Option<String>,
    pub director: Option<String>,
    pub creator: Option<String>,
    /// Only closed vacancies have a closer.
    pub closer: Option<String>,
}

fn track<T: PartialEq + std::fmt::Display>(
    changes: &mut Vec<String>,
    name: &str,
    slot: &mut T,
    next: Option<T>,
) {
    if let Some(next) = next {
        if *slot != next {
            changes.push(format!("{name} from \"{slot}\" to \"{next}\""));
            *slot = next;
        }
    }
}

fn require_if_set(value: Option<&String>, what: &'static str) -> Result<(), LifecycleError> {
    value.map_or(Ok(()), |value| require(value, what))
}

/// Applies the edit to a copy of the record and describes each field it
/// actually changed.
fn apply_edit(
    record: &Vacancy,
    changes: VacancyEdit,
) -> Result<(Vacancy, Vec<String>), LifecycleError> {
    require_if_set(changes.unit.as_ref(), "unit")?;
    require_if_set(changes.title.as_ref(), "title")?;
    require_if_set(changes.creator.as_ref(), "creator")?;
    require_if_set(changes.closer.as_ref(), "closer")?;
    if changes.closer.is_some() && record.is_open() {
        return Err(LifecycleError::NotClosed);
    }

    let mut next = record.clone();
    let mut changed = Vec::new();

    let mut sequence = next.sequence.map(|n| n.to_string()).unwrap_or_default();
    track(&mut changed, "sequence", &mut sequence, changes.sequence.map(|n| n.to_string()));
    if let Some(value) = changes.sequence {
        next.sequence = Some(value);
    }
    track(&mut changed, "unit", &mut next.unit, changes.unit);
    track(&mut changed, "sector", &mut next.sector, changes.sector);
    track(&mut changed, "job type", &mut next.job_type, changes.job_type);
    track(&mut changed, "title", &mut next.title, changes.title);
    track(&mut changed, "kind", &mut next.kind, changes.kind);
    track(&mut changed, "shift", &mut next.shift, changes.shift);
    track(&mut changed, "manager", &mut next.manager, changes.manager);
    track(&mut changed, "director", &mut next.director, changes.director);
    let mut creator = next.creator.clone().unwrap_or_default();
    track(&mut changed, "creator", &mut creator, changes.creator);
    if !creator.is_empty() {
        next.creator = Some(creator);
    }
    let mut closer = next.closer.clone().unwrap_or_default();
    track(&mut changed, "closer", &mut closer, changes.closer);
    if !closer.is_empty() {
        next.closer = Some(closer);
    }

    if changed.is_empty() {
        return Err(LifecycleError::NoChange);
    }
    Ok((next, changed))
}

/// Applies an edit, appending one audit line per changed field.
pub fn edit(
    record: &Vacancy,
    changes: VacancyEdit,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<Vacancy, LifecycleError> {
    require(actor, "actor")?;
    let (mut next, changed) = apply_edit(record, changes)?;
    next.observations.extend(
        changed
            .iter()
            .map(|change| audit_line(at, actor, &format!("Changed {change}."))),
    );
    Ok(next)
}

/// Fields a bulk update can set across a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BulkField {
    Unit,
    Sector,
    JobType,
    Manager,
    Creator,
    Closer,
    Frozen,
}

impl BulkField {
    fn to_edit(self, value: &str) -> VacancyEdit {
        let mut edit = VacancyEdit::default();
        let slot = match self {
            BulkField::Unit => &mut edit.unit,
            BulkField::Sector => &mut edit.sector,
            BulkField::JobType => &mut edit.job_type,
            BulkField::Manager => &mut edit.manager,
            BulkField::Creator => &mut edit.creator,
            BulkField::Closer => &mut edit.closer,
            BulkField::Frozen => return edit,
        };
        *slot = Some(value.trim().to_string());
        edit
    }
}

fn parse_flag(value: &str) -> Result<bool, LifecycleError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(LifecycleError::Invalid("frozen")),
    }
}

/// Sets one field across many vacancies, returning only the records that
/// changed, each with one bulk audit line. Records already holding the value
/// are skipped, as are open records when the field is the closer. Any other
/// rejection fails the whole batch before anything is returned.
pub fn bulk_update(
    records: &[VacancyRef],
    field: BulkField,
    value: &str,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<Vec<Vacancy>, LifecycleError> {
    require(actor, "actor")?;
    require(value, "value")?;
    let frozen = match field {
        BulkField::Frozen => Some(parse_flag(value)?),
        _ => None,
    };

    let mut updated = Vec::new();
    for record in records {
        let (mut next, changed) = match frozen {
            Some(frozen) => {
                if frozen && record.is_closed() {
                    return Err(LifecycleError::FrozenWhileClosed);
                }
                if record.frozen == frozen {
                    continue;
                }
                let change = format!("frozen from \"{}\" to \"{frozen}\"", record.frozen);
                let next = Vacancy {
                    frozen,
                    ..(**record).clone()
                };
                (next, vec![change])
            }
            None if field == BulkField::Closer && record.is_open() => continue,
            None => match apply_edit(record, field.to_edit(value)) {
                Ok(applied) => applied,
                Err(LifecycleError::NoChange) => continue,
                Err(err) => return Err(err),
            },
        };
        next.observations.extend(
            changed
                .iter()
                .map(|change| audit_line(at, actor, &format!("Bulk changed {change}."))),
        );
        updated.push(next);
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_after, frozen, reference_now, vacancy};
    use chrono::Duration;
    use std::sync::Arc;

    fn draft() -> NewVacancy {
        NewVacancy {
            sequence: Some(12),
            unit: "A".to_string(),
            sector: "X".to_string(),
            job_type: "Ops".to_string(),
            title: "Picker".to_string(),
            kind: RequisitionKind::Replacement,
            reason: "resignation".to_string(),
            replaced_name: Some("  ".to_string()),
            shift: "night".to_string(),
            manager: "Carla".to_string(),
            director: "Paulo".to_string(),
        }
    }

    fn closing(at: DateTime<Utc>) -> Closing {
        Closing {
            closed_at: at,
            hire_name: "Joana".to_string(),
            sourcing_channel: "referral".to_string(),
            note: Some("started monday".to_string()),
        }
    }

    #[test]
    fn open_seeds_the_audit_log() {
        let record = open(draft(), "ana", reference_now()).unwrap();
        assert_eq!(record.creator.as_deref(), Some("ana"));
        assert_eq!(record.replaced_name, None);
        assert_eq!(record.observations, vec!["20/03/2026 ana: Vacancy opened.".to_string()]);
        assert!(record.is_open());
    }

    #[test]
    fn open_requires_unit_and_title() {
        let mut missing = draft();
        missing.unit = " ".to_string();
        assert_eq!(
            open(missing, "ana", reference_now()).unwrap_err(),
            LifecycleError::Blank("unit")
        );
    }

    #[test]
    fn close_unfreezes_and_appends_one_line() {
        let record = frozen(vacancy("Ops", "A", "X", RequisitionKind::Growth));
        let closed = close(&record, closing(reference_now()), "bruno", reference_now()).unwrap();
        assert!(!closed.frozen);
        assert_eq!(closed.closer.as_deref(), Some("bruno"));
        assert_eq!(closed.observations.len(), record.observations.len() + 1);
        assert_eq!(closed.observations[..record.observations.len()], record.observations[..]);
        assert!(closed
            .observations
            .last()
            .is_some_and(|line| line.ends_with("Hired: Joana. Note: started monday")));
    }

    #[test]
    fn close_rejects_bad_transitions() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let early = record.opened_at - Duration::hours(1);
        assert_eq!(
            close(&record, closing(early), "bruno", reference_now()).unwrap_err(),
            LifecycleError::ClosesBeforeOpening
        );

        let done = closed_after(record, 3);
        assert_eq!(
            close(&done, closing(reference_now()), "bruno", reference_now()).unwrap_err(),
            LifecycleError::AlreadyClosed
        );
    }

    #[test]
    fn freezing_is_exclusive_with_closing() {
        let done = closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 3);
        assert_eq!(
            set_frozen(&done, true, "ana", reference_now()).unwrap_err(),
            LifecycleError::FrozenWhileClosed
        );

        let open_record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let paused = set_frozen(&open_record, true, "ana", reference_now()).unwrap();
        assert!(paused.frozen);
        assert_eq!(
            set_frozen(&paused, true, "ana", reference_now()).unwrap_err(),
            LifecycleError::NoChange
        );
        let resumed = set_frozen(&paused, false, "ana", reference_now()).unwrap();
        assert!(!resumed.frozen);
        assert_eq!(resumed.observations.len(), open_record.observations.len() + 2);
    }

    #[test]
    fn reopen_clears_closing_fields() {
        let mut done = closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 3);
        done.hire_name = Some("Joana".to_string());
        let reopened = reopen(&done, "hire quit", "ana", reference_now()).unwrap();
        assert!(reopened.is_open());
        assert_eq!(reopened.hire_name, None);
        assert_eq!(reopened.closer, None);
        assert!(!reopened.frozen);
        assert!(reopened
            .observations
            .last()
            .is_some_and(|line| line.contains("Previously closed with: Joana")));

        assert_eq!(
            reopen(&reopened, "again", "ana", reference_now()).unwrap_err(),
            LifecycleError::NotClosed
        );
        assert_eq!(
            reopen(&done, "   ", "ana", reference_now()).unwrap_err(),
            LifecycleError::Blank("reason")
        );
    }

    #[test]
    fn comments_must_have_text() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        assert_eq!(
            comment(&record, "", "ana", reference_now()).unwrap_err(),
            LifecycleError::Blank("comment")
        );
        let commented = comment(&record, " call back friday ", "ana", reference_now()).unwrap();
        assert_eq!(
            commented.observations.last().map(String::as_str),
            Some("20/03/2026 ana: call back friday")
        );
    }

    #[test]
    fn edit_logs_each_changed_field() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let edited = edit(
            &record,
            VacancyEdit {
                unit: Some("B".to_string()),
                sector: Some("X".to_string()),
                kind: Some(RequisitionKind::Replacement),
                sequence: Some(7),
                ..VacancyEdit::default()
            },
            "admin",
            reference_now(),
        )
        .unwrap();
        assert_eq!(edited.unit, "B");
        assert_eq!(edited.kind, RequisitionKind::Replacement);
        assert_eq!(edited.sequence, Some(7));
        assert_eq!(
            edited.observations[record.observations.len()..],
            [
                "20/03/2026 admin: Changed sequence from \"\" to \"7\".".to_string(),
                "20/03/2026 admin: Changed unit from \"A\" to \"B\".".to_string(),
                "20/03/2026 admin: Changed kind from \"growth\" to \"replacement\".".to_string(),
            ]
        );

        assert_eq!(
            edit(&record, VacancyEdit::default(), "admin", reference_now()).unwrap_err(),
            LifecycleError::NoChange
        );
    }

    #[test]
    fn edit_rejects_blank_identity_fields() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        for (changes, field) in [
            (VacancyEdit { creator: Some("  ".to_string()), ..VacancyEdit::default() }, "creator"),
            (VacancyEdit { unit: Some(String::new()), ..VacancyEdit::default() }, "unit"),
            (VacancyEdit { title: Some(" ".to_string()), ..VacancyEdit::default() }, "title"),
        ] {
            assert_eq!(
                edit(&record, changes, "admin", reference_now()).unwrap_err(),
                LifecycleError::Blank(field)
            );
        }
    }

    #[test]
    fn closer_is_editable_only_once_closed() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let changes = VacancyEdit {
            closer: Some("rita".to_string()),
            ..VacancyEdit::default()
        };
        assert_eq!(
            edit(&record, changes.clone(), "admin", reference_now()).unwrap_err(),
            LifecycleError::NotClosed
        );

        let done = closed_after(record, 3);
        let edited = edit(&done, changes, "admin", reference_now()).unwrap();
        assert_eq!(edited.closer.as_deref(), Some("rita"));
    }

    #[test]
    fn closing_on_the_opening_day_starts_at_the_opening() {
        let record = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let opened = record.opened_at;
        let same_day = closing_on(&record, opened.date_naive());
        assert_eq!(same_day, opened);
        assert!(close(&record, closing(same_day), "bruno", reference_now()).is_ok());

        let next_day = opened.date_naive() + Duration::days(1);
        assert_eq!(
            closing_on(&record, next_day),
            next_day.and_time(NaiveTime::MIN).and_utc()
        );

        let day_before = opened.date_naive() - Duration::days(1);
        assert_eq!(
            close(&record, closing(closing_on(&record, day_before)), "bruno", reference_now())
                .unwrap_err(),
            LifecycleError::ClosesBeforeOpening
        );
    }

    #[test]
    fn bulk_update_logs_one_line_per_changed_record() {
        let mut moved = vacancy("Ops", "B", "X", RequisitionKind::Growth);
        moved.creator = Some("ana".to_string());
        let records: Vec<VacancyRef> = vec![
            Arc::new(vacancy("Ops", "A", "X", RequisitionKind::Growth)),
            Arc::new(moved),
        ];
        let updated =
            bulk_update(&records, BulkField::Unit, " B ", "admin", reference_now()).unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, records[0].id);
        assert_eq!(updated[0].unit, "B");
        assert_eq!(
            updated[0].observations[records[0].observations.len()..],
            ["20/03/2026 admin: Bulk changed unit from \"A\" to \"B\".".to_string()]
        );

        let creators =
            bulk_update(&records, BulkField::Creator, "rita", "admin", reference_now()).unwrap();
        assert_eq!(creators.len(), 2);
        assert!(creators.iter().all(|record| record.creator.as_deref() == Some("rita")));
    }

    #[test]
    fn bulk_freeze_is_all_or_nothing() {
        let active = vacancy("Ops", "A", "X", RequisitionKind::Growth);
        let paused = frozen(vacancy("Ops", "A", "X", RequisitionKind::Growth));
        let done = closed_after(vacancy("Ops", "A", "X", RequisitionKind::Growth), 3);

        let records: Vec<VacancyRef> = vec![Arc::new(active.clone()), Arc::new(paused)];
        let updated =
            bulk_update(&records, BulkField::Frozen, "true", "admin", reference_now()).unwrap();
        assert_eq!(updated.len(), 1);
        assert!(updated[0].frozen);
        assert!(updated[0]
            .observations
            .last()
            .is_some_and(|line| line.ends_with("Bulk changed frozen from \"false\" to \"true\".")));

        let mixed: Vec<VacancyRef> = vec![Arc::new(active), Arc::new(done.clone())];
        assert_eq!(
            bulk_update(&mixed, BulkField::Frozen, "true", "admin", reference_now()).unwrap_err(),
            LifecycleError::FrozenWhileClosed
        );
        assert_eq!(
            bulk_update(&mixed, BulkField::Frozen, "maybe", "admin", reference_now()).unwrap_err(),
            LifecycleError::Invalid("frozen")
        );
        assert_eq!(
            bulk_update(&mixed, BulkField::Sector, " ", "admin", reference_now()).unwrap_err(),
            LifecycleError::Blank("value")
        );

        let closers =
            bulk_update(&mixed, BulkField::Closer, "rita", "admin", reference_now()).unwrap();
        assert_eq!(closers.len(), 1);
        assert_eq!(closers[0].id, done.id);
        assert_eq!(closers[0].closer.as_deref(), Some("rita"));
    }
}
