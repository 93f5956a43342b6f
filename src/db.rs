use std::path::Path;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PulseError;
use crate::filter::SortDirection;
use crate::lifecycle::{self, NewVacancy};
use crate::models::{RequisitionKind, Vacancy};
use crate::query::{Predicate, RecordQuery, Value};
use crate::reconcile::{ChangeEvent, ChangeStream, RecordSource};

const COLUMNS: &str = "vacancy_id, created_at, sequence_no, opened_at, unit, sector, job_type, \
     title, kind, reason, replaced_name, shift, manager, director, closed_at, hire_name, \
     sourcing_channel, creator, closer, frozen, observations";

pub async fn init_db(pool: &PgPool) -> Result<(), PulseError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn vacancy_from_row(row: &PgRow) -> Result<Vacancy, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    Ok(Vacancy {
        id: row.try_get("vacancy_id")?,
        created_at: row.try_get("created_at")?,
        sequence: row.try_get("sequence_no")?,
        opened_at: row.try_get("opened_at")?,
        unit: row.try_get("unit")?,
        sector: row.try_get("sector")?,
        job_type: row.try_get("job_type")?,
        title: row.try_get("title")?,
        kind: RequisitionKind::from_label(&kind),
        reason: row.try_get("reason")?,
        replaced_name: row.try_get("replaced_name")?,
        shift: row.try_get("shift")?,
        manager: row.try_get("manager")?,
        director: row.try_get("director")?,
        closed_at: row.try_get("closed_at")?,
        hire_name: row.try_get("hire_name")?,
        sourcing_channel: row.try_get("sourcing_channel")?,
        creator: row.try_get("creator")?,
        closer: row.try_get("closer")?,
        frozen: row.try_get("frozen")?,
        observations: row.try_get("observations")?,
    })
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn push_predicate(builder: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::Eq(field, value) => {
            builder.push(field.column()).push(" = ");
            match value {
                Value::Text(text) => builder.push_bind(text.clone()),
                Value::Int(number) => builder.push_bind(*number),
                Value::Bool(flag) => builder.push_bind(*flag),
            };
        }
        Predicate::IsNull(field) => {
            builder.push(field.column()).push(" IS NULL");
        }
        Predicate::NotNull(field) => {
            builder.push(field.column()).push(" IS NOT NULL");
        }
        Predicate::In(field, values) => {
            builder
                .push(field.column())
                .push(" = ANY(")
                .push_bind(values.clone())
                .push(")");
        }
        Predicate::Contains(field, needle) => {
            builder
                .push(field.column())
                .push(" ILIKE ")
                .push_bind(format!("%{}%", escape_like(needle)));
        }
        Predicate::And(parts) | Predicate::Or(parts) => {
            if parts.is_empty() {
                let empty = if matches!(predicate, Predicate::And(_)) {
                    "TRUE"
                } else {
                    "FALSE"
                };
                builder.push(empty);
                return;
            }
            let joiner = if matches!(predicate, Predicate::And(_)) {
                " AND "
            } else {
                " OR "
            };
            builder.push("(");
            for (index, part) in parts.iter().enumerate() {
                if index > 0 {
                    builder.push(joiner);
                }
                push_predicate(builder, part);
            }
            builder.push(")");
        }
    }
}

pub fn build_select(query: &RecordQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {COLUMNS} FROM requisitions.vacancies"));
    if let Some(predicate) = &query.predicate {
        builder.push(" WHERE ");
        push_predicate(&mut builder, predicate);
    }
    let direction = match query.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    builder
        .push(" ORDER BY ")
        .push(query.order_by.column())
        .push(" ")
        .push(direction)
        .push(" NULLS LAST");
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ").push_bind(limit);
    }
    builder
}

pub async fn fetch_vacancies(
    pool: &PgPool,
    query: &RecordQuery,
) -> Result<Vec<Vacancy>, PulseError> {
    let mut builder = build_select(query);
    let rows = builder.build().fetch_all(pool).await?;
    let mut vacancies = Vec::with_capacity(rows.len());
    for row in &rows {
        vacancies.push(vacancy_from_row(row)?);
    }
    debug!(records = vacancies.len(), "vacancies fetched");
    Ok(vacancies)
}

pub async fn find_vacancy(pool: &PgPool, id: Uuid) -> Result<Vacancy, PulseError> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM requisitions.vacancies WHERE vacancy_id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(PulseError::NotFound(id))?;
    Ok(vacancy_from_row(&row)?)
}

/// Inserts a vacancy. Returns `false` when its sequence number already exists.
pub async fn insert_vacancy(pool: &PgPool, vacancy: &Vacancy) -> Result<bool, PulseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO requisitions.vacancies
        (vacancy_id, created_at, sequence_no, opened_at, unit, sector, job_type, title, kind,
         reason, replaced_name, shift, manager, director, closed_at, hire_name,
         sourcing_channel, creator, closer, frozen, observations)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(vacancy.id)
    .bind(vacancy.created_at)
    .bind(vacancy.sequence)
    .bind(vacancy.opened_at)
    .bind(&vacancy.unit)
    .bind(&vacancy.sector)
    .bind(&vacancy.job_type)
    .bind(&vacancy.title)
    .bind(vacancy.kind.as_str())
    .bind(&vacancy.reason)
    .bind(&vacancy.replaced_name)
    .bind(&vacancy.shift)
    .bind(&vacancy.manager)
    .bind(&vacancy.director)
    .bind(vacancy.closed_at)
    .bind(&vacancy.hire_name)
    .bind(&vacancy.sourcing_channel)
    .bind(&vacancy.creator)
    .bind(&vacancy.closer)
    .bind(vacancy.frozen)
    .bind(&vacancy.observations)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Writes back every mutable field of a vacancy, including the full
/// observation list.
pub async fn save_vacancy(pool: &PgPool, vacancy: &Vacancy) -> Result<(), PulseError> {
    let result = sqlx::query(
        r#"
        UPDATE requisitions.vacancies
        SET sequence_no = $2, unit = $3, sector = $4, job_type = $5, title = $6, kind = $7,
            shift = $8, manager = $9, director = $10, closed_at = $11, hire_name = $12,
            sourcing_channel = $13, creator = $14, closer = $15, frozen = $16,
            observations = $17
        WHERE vacancy_id = $1
        "#,
    )
    .bind(vacancy.id)
    .bind(vacancy.sequence)
    .bind(&vacancy.unit)
    .bind(&vacancy.sector)
    .bind(&vacancy.job_type)
    .bind(&vacancy.title)
    .bind(vacancy.kind.as_str())
    .bind(&vacancy.shift)
    .bind(&vacancy.manager)
    .bind(&vacancy.director)
    .bind(vacancy.closed_at)
    .bind(&vacancy.hire_name)
    .bind(&vacancy.sourcing_channel)
    .bind(&vacancy.creator)
    .bind(&vacancy.closer)
    .bind(vacancy.frozen)
    .bind(&vacancy.observations)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PulseError::NotFound(vacancy.id));
    }
    info!(id = %vacancy.id, "vacancy saved");
    Ok(())
}

pub async fn seed(pool: &PgPool) -> Result<usize, PulseError> {
    let now = Utc::now();
    let drafts = vec![
        (1, "Ops", "CD Cajamar", "Camara Fria", "Forklift operator", "growth", 10, false),
        (2, "Ops", "CD Cajamar", "Camara Fria", "Picker", "replacement", 20, true),
        (3, "Ops", "CD Extrema", "Expedicao", "Loader", "replacement", 50, false),
        (4, "Admin", "CD Extrema", "RH", "HR analyst", "growth", 33, false),
    ];

    let mut inserted = 0usize;
    for (sequence, job_type, unit, sector, title, kind, days_ago, frozen) in drafts {
        let opened_at = now - Duration::days(days_ago);
        let mut vacancy = lifecycle::open(
            NewVacancy {
                sequence: Some(sequence),
                unit: unit.to_string(),
                sector: sector.to_string(),
                job_type: job_type.to_string(),
                title: title.to_string(),
                kind: RequisitionKind::from_label(kind),
                reason: "seed".to_string(),
                replaced_name: None,
                shift: "morning".to_string(),
                manager: "Carla Nunes".to_string(),
                director: "Paulo Reis".to_string(),
            },
            "seed",
            opened_at,
        )?;
        if frozen {
            vacancy = lifecycle::set_frozen(&vacancy, true, "seed", opened_at)?;
        }
        if insert_vacancy(pool, &vacancy).await? {
            inserted += 1;
        }
    }

    info!(inserted, "seed data inserted");
    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &Path) -> Result<usize, PulseError> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        sequence: Option<i64>,
        opened_on: NaiveDate,
        closed_on: Option<NaiveDate>,
        unit: String,
        sector: String,
        job_type: String,
        title: String,
        kind: String,
        reason: String,
        replaced_name: Option<String>,
        shift: String,
        manager: String,
        director: String,
        hire_name: Option<String>,
        sourcing_channel: Option<String>,
        creator: Option<String>,
        closer: Option<String>,
        #[serde(default)]
        frozen: bool,
    }

    fn at_midnight(day: NaiveDate) -> DateTime<Utc> {
        day.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;
    let mut skipped = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let opened_at = at_midnight(row.opened_on);
        let closed_at = row.closed_on.map(at_midnight);
        if closed_at.is_some_and(|closed_at| closed_at < opened_at) {
            warn!(sequence = ?row.sequence, "closing precedes opening; row skipped");
            skipped += 1;
            continue;
        }

        let actor = row.creator.clone().unwrap_or_else(|| "import".to_string());
        let vacancy = Vacancy {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            sequence: row.sequence,
            opened_at,
            unit: row.unit,
            sector: row.sector,
            job_type: row.job_type,
            title: row.title,
            kind: RequisitionKind::from_label(&row.kind),
            reason: row.reason,
            replaced_name: row.replaced_name,
            shift: row.shift,
            manager: row.manager,
            director: row.director,
            hire_name: row.hire_name,
            sourcing_channel: row.sourcing_channel,
            creator: row.creator,
            closer: row.closer,
            frozen: row.frozen && closed_at.is_none(),
            closed_at,
            observations: vec![lifecycle::audit_line(Utc::now(), &actor, "Vacancy imported.")],
        };

        if insert_vacancy(pool, &vacancy).await? {
            inserted += 1;
        } else {
            skipped += 1;
        }
    }

    info!(inserted, skipped, path = %csv_path.display(), "csv import finished");
    Ok(inserted)
}

/// Postgres-backed [`RecordSource`].
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSource for PgRecordStore {
    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<Vacancy>, PulseError> {
        fetch_vacancies(&self.pool, query).await
    }
}

/// Change stream fed by the `pg_notify` trigger on the vacancies table.
///
/// A dropped connection is re-established on the next receive. Notifications
/// sent while disconnected are lost, so every reconnect is reported as
/// [`ChangeEvent::Unknown`] to force a full refetch.
pub struct PgChangeStream {
    listener: PgListener,
    failures: u32,
}

impl PgChangeStream {
    pub async fn connect(pool: &PgPool, channel: &str) -> Result<Self, PulseError> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(channel).await?;
        info!(channel, "listening for vacancy changes");
        Ok(Self {
            listener,
            failures: 0,
        })
    }
}

const RECONNECT_BASE: StdDuration = StdDuration::from_millis(500);
const RECONNECT_MAX: StdDuration = StdDuration::from_secs(30);

/// Wait before the next receive after `failures` consecutive errors.
pub fn reconnect_delay(failures: u32) -> StdDuration {
    let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
    RECONNECT_BASE.saturating_mul(factor).min(RECONNECT_MAX)
}

#[async_trait]
impl ChangeStream for PgChangeStream {
    async fn next_change(&mut self) -> Option<ChangeEvent> {
        match self.listener.try_recv().await {
            Ok(Some(notification)) => {
                self.failures = 0;
                Some(ChangeEvent::from_payload(notification.payload()))
            }
            Ok(None) => {
                warn!("change stream disconnected; reconnecting");
                Some(ChangeEvent::Unknown)
            }
            Err(err) => {
                self.failures = self.failures.saturating_add(1);
                let delay = reconnect_delay(self.failures);
                warn!(
                    error = %err,
                    failures = self.failures,
                    ?delay,
                    "change stream failed; retrying"
                );
                tokio::time::sleep(delay).await;
                Some(ChangeEvent::Unknown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterState;
    use crate::query::Field;

    #[test]
    fn reconnects_back_off_up_to_a_cap() {
        assert_eq!(reconnect_delay(0), StdDuration::from_millis(500));
        assert_eq!(reconnect_delay(1), StdDuration::from_millis(500));
        assert_eq!(reconnect_delay(2), StdDuration::from_secs(1));
        assert_eq!(reconnect_delay(4), StdDuration::from_secs(4));
        assert_eq!(reconnect_delay(7), StdDuration::from_secs(30));
        assert_eq!(reconnect_delay(40), StdDuration::from_secs(30));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn select_compiles_the_predicate_tree() {
        let mut filter = FilterState {
            search: "42".to_string(),
            status: crate::filter::StatusScope::Open,
            ..FilterState::default()
        };
        filter.units.insert("A".to_string());
        let query = RecordQuery::from_filter(&filter).with_limit(Some(100));
        let builder = build_select(&query);
        let sql = builder.sql();

        assert!(sql.starts_with("SELECT vacancy_id, created_at"));
        assert!(sql.contains(
            "WHERE (closed_at IS NULL AND unit = ANY($1) AND (title ILIKE $2 OR unit ILIKE $3 \
             OR sector ILIKE $4 OR manager ILIKE $5 OR director ILIKE $6 OR sequence_no = $7))"
        ));
        assert!(sql.ends_with("ORDER BY opened_at DESC NULLS LAST LIMIT $8"));
    }

    #[test]
    fn empty_groups_compile_to_constants() {
        let query = RecordQuery {
            predicate: Some(Predicate::Or(Vec::new())),
            order_by: Field::Sequence,
            direction: SortDirection::Asc,
            limit: None,
        };
        let builder = build_select(&query);
        assert!(builder.sql().contains("WHERE FALSE ORDER BY sequence_no ASC"));
    }
}
