use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use requisition_pulse::aging::{days_open, AgingBucket, BucketTable, DateWindow};
use requisition_pulse::breakdown::{daily_breakdown, DailyBasis, DailyScope};
use requisition_pulse::config::{EngineSettings, StoreArgs};
use requisition_pulse::db::{self, PgChangeStream, PgRecordStore};
use requisition_pulse::drilldown::{self, DrillTarget, Selection};
use requisition_pulse::error::LifecycleError;
use requisition_pulse::export;
use requisition_pulse::filter::{
    FilterState, FrozenScope, SortDirection, SortKey, SortSpec, StatusScope,
};
use requisition_pulse::lifecycle::{self, BulkField, Closing, NewVacancy, VacancyEdit};
use requisition_pulse::models::{Category, RequisitionKind, Vacancy, VacancyRef};
use requisition_pulse::reconcile::{
    Command, Controller, ControllerState, DerivedViews, FetchMode, FetchOutcome, ViewState,
};
use requisition_pulse::report;

mod logging;

#[derive(Parser)]
#[command(name = "requisition-pulse")]
#[command(about = "Vacancy analytics and live reconciliation", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "PULSE_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct FilterArgs {
    #[arg(long, value_enum, default_value_t = StatusScope::Any)]
    status: StatusScope,
    #[arg(long, value_enum, default_value_t = FrozenScope::Any)]
    frozen: FrozenScope,
    /// Restrict to a unit (repeatable)
    #[arg(long = "unit")]
    units: Vec<String>,
    /// Restrict to a creator (repeatable)
    #[arg(long = "creator")]
    creators: Vec<String>,
    /// Restrict to a shift (repeatable)
    #[arg(long = "shift")]
    shifts: Vec<String>,
    /// Free-text search over title, unit, sector, manager, director or number
    #[arg(long, default_value = "")]
    search: String,
    #[arg(long, value_enum)]
    sort: Option<SortKey>,
    #[arg(long, value_enum, default_value_t = SortDirection::Desc)]
    direction: SortDirection,
    /// First day of the closing window (defaults to the start of its month)
    #[arg(long)]
    closed_from: Option<NaiveDate>,
    /// Last day of the closing window (defaults to today)
    #[arg(long)]
    closed_to: Option<NaiveDate>,
    /// Count frozen vacancies in the open-side views
    #[arg(long)]
    show_frozen: bool,
}

impl FilterArgs {
    fn view_state(&self, today: NaiveDate) -> anyhow::Result<ViewState> {
        let closing_window = match (self.closed_from, self.closed_to) {
            (None, None) => None,
            (start, end) => {
                let end = end.unwrap_or(today);
                let start = start.unwrap_or(DateWindow::month_to_date(end).start);
                if start > end {
                    anyhow::bail!("--closed-from {start} is after --closed-to {end}");
                }
                Some(DateWindow::new(start, end))
            }
        };

        Ok(ViewState {
            filter: FilterState {
                status: self.status,
                frozen: self.frozen,
                units: self.units.iter().cloned().collect(),
                creators: self.creators.iter().cloned().collect(),
                shifts: self.shifts.iter().cloned().collect(),
                search: self.search.clone(),
                sort: self.sort.map(|key| SortSpec {
                    key,
                    direction: self.direction,
                }),
                closing_window,
            },
            show_frozen: self.show_frozen,
            ..ViewState::default()
        })
    }
}

#[derive(Debug, Clone, Args)]
struct ActorArgs {
    /// Who performs the action; recorded in the audit trail
    #[arg(long, env = "PULSE_ACTOR")]
    actor: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import vacancies from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print the filtered and sorted vacancy list
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Open vacancies by job type, unit and sector
    Rollup {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print the rows as JSON
        #[arg(long)]
        json: bool,
        /// Drill into a job type
        #[arg(long)]
        job_type: Option<String>,
        /// Drill into a unit of --job-type
        #[arg(long, requires = "job_type")]
        in_unit: Option<String>,
        /// Drill into a sector of --in-unit
        #[arg(long, requires = "in_unit")]
        in_sector: Option<String>,
        /// Restrict the drill-down to one category
        #[arg(long, value_enum)]
        category: Option<Category>,
    },
    /// Open vacancies by days open
    Aging {
        #[command(flatten)]
        filter: FilterArgs,
        /// List the vacancies of one bucket
        #[arg(long, value_enum)]
        bucket: Option<AgingBucket>,
    },
    /// Closures in the closing window by days to close
    LeadTime {
        #[command(flatten)]
        filter: FilterArgs,
        /// List the vacancies of one bucket
        #[arg(long, value_enum)]
        bucket: Option<AgingBucket>,
    },
    /// Share of open vacancies per job type
    Share {
        #[command(flatten)]
        filter: FilterArgs,
        /// List the vacancies of one job type
        #[arg(long)]
        job_type: Option<String>,
    },
    /// Closures in the closing window ranked by recruiter
    Closers {
        #[command(flatten)]
        filter: FilterArgs,
        /// List the closures of one recruiter
        #[arg(long)]
        closer: Option<String>,
    },
    /// Export the filtered list as CSV
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "vacancies.csv")]
        out: PathBuf,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value_t = DailyBasis::Created)]
        daily_basis: DailyBasis,
        #[arg(long, value_enum, default_value_t = DailyScope::AllInPeriod)]
        daily_scope: DailyScope,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Keep the dashboard live as vacancies change
    Watch {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print the effective settings before starting
        #[arg(long)]
        verbose: bool,
    },
    /// Open a new vacancy
    Open {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        sequence: Option<i64>,
        #[arg(long)]
        unit: String,
        #[arg(long)]
        sector: String,
        #[arg(long)]
        job_type: String,
        #[arg(long)]
        title: String,
        /// growth or replacement
        #[arg(long, default_value = "replacement")]
        kind: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long)]
        replacing: Option<String>,
        #[arg(long, default_value = "")]
        shift: String,
        #[arg(long, default_value = "")]
        manager: String,
        #[arg(long, default_value = "")]
        director: String,
    },
    /// Close a vacancy with the hire
    Close {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        hire: String,
        #[arg(long, default_value = "")]
        channel: String,
        /// Closing day (defaults to now)
        #[arg(long)]
        on: Option<NaiveDate>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Put an open vacancy on hold
    Freeze {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        id: Uuid,
    },
    /// Resume a frozen vacancy
    Unfreeze {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        id: Uuid,
    },
    /// Reopen a closed vacancy
    Reopen {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Append a comment to the audit trail
    Comment {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        text: String,
    },
    /// Correct vacancy fields
    Edit {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        sequence: Option<i64>,
        #[arg(long)]
        unit: Option<String>,
        #[arg(long)]
        sector: Option<String>,
        #[arg(long)]
        job_type: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        shift: Option<String>,
        #[arg(long)]
        manager: Option<String>,
        #[arg(long)]
        director: Option<String>,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long)]
        closer: Option<String>,
    },
    /// Set one field on every selected vacancy
    Bulk {
        #[command(flatten)]
        actor: ActorArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// Select a vacancy by id (repeatable); defaults to every listed one
        #[arg(long = "id")]
        ids: Vec<Uuid>,
        #[arg(long, value_enum)]
        field: BulkField,
        /// New value; `true` or `false` for the frozen field
        #[arg(long)]
        value: String,
    },
}

/// Fetches once through the controller and returns the derived views.
async fn load_views(
    pool: &PgPool,
    settings: &EngineSettings,
    view: ViewState,
) -> anyhow::Result<Arc<DerivedViews>> {
    Ok(load_controller(pool, settings, view).await?.views())
}

async fn load_controller(
    pool: &PgPool,
    settings: &EngineSettings,
    view: ViewState,
) -> anyhow::Result<Controller<PgRecordStore>> {
    let mut controller =
        Controller::new(Arc::new(PgRecordStore::new(pool.clone())), settings.clone())
            .with_fetch_mode(FetchMode::Narrowed)
            .with_view(view);

    match controller.refresh().await {
        FetchOutcome::Applied { records } => info!(records, "snapshot loaded"),
        outcome => {
            if let ControllerState::Error(message) = controller.state() {
                anyhow::bail!("failed to load vacancies: {message}");
            }
            anyhow::bail!("snapshot was not applied ({outcome:?})");
        }
    }
    Ok(controller)
}

fn print_vacancies(records: &[VacancyRef], limit: usize) {
    let now = Utc::now();
    for record in records.iter().take(limit) {
        let status = match (record.closed_at, record.frozen) {
            (Some(_), _) => "closed",
            (None, true) => "frozen",
            (None, false) => "open",
        };
        println!(
            "- #{} {} | {} / {} | {} ({}) | {} days | {}",
            record
                .sequence
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.opened_at.format("%d/%m/%Y"),
            record.unit,
            record.sector,
            record.title,
            record.kind,
            days_open(record, now),
            status
        );
    }
    if records.len() > limit {
        println!("... and {} more.", records.len() - limit);
    }
}

fn print_selection(selection: &Selection) {
    println!("{} ({})", selection.label, selection.len());
    print_vacancies(&selection.records, usize::MAX);
}

fn print_buckets(title: &str, table: &BucketTable) {
    println!("{title}:");
    for (bucket, count) in table.counts() {
        println!("- {}: {}", bucket.label(), count);
    }
    println!("Total: {}", table.total());
}

fn print_summary(views: &DerivedViews) {
    let aging = views
        .aging
        .counts()
        .iter()
        .map(|(_, count)| count.to_string())
        .collect::<Vec<_>>()
        .join("/");
    println!(
        "[{}] {} vacancies | {} listed | {} open | aging {} | {} closed in {}",
        views.computed_at.format("%H:%M:%S"),
        views.snapshot.len(),
        views.listing.len(),
        views.rollup.tally.total(),
        aging,
        views.lead_time.total(),
        views.closing_window
    );
}

async fn apply_transition<F>(pool: &PgPool, id: Uuid, transition: F) -> anyhow::Result<Vacancy>
where
    F: FnOnce(&Vacancy) -> Result<Vacancy, LifecycleError>,
{
    let current = db::find_vacancy(pool, id)
        .await
        .with_context(|| format!("failed to load vacancy {id}"))?;
    let next = transition(&current)?;
    db::save_vacancy(pool, &next)
        .await
        .with_context(|| format!("failed to save vacancy {id}"))?;
    Ok(next)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json).context("failed to initialise logging")?;

    let settings = cli.store.settings();
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&cli.store.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} vacancies).");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv)
                .await
                .with_context(|| format!("failed to import {}", csv.display()))?;
            println!("Inserted {inserted} vacancies from {}.", csv.display());
        }
        Commands::List { filter, limit } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            if views.listing.is_empty() {
                println!("No vacancies match this filter.");
                return Ok(());
            }
            println!("{} vacancies:", views.listing.len());
            print_vacancies(&views.listing, limit);
        }
        Commands::Rollup {
            filter,
            json,
            job_type,
            in_unit,
            in_sector,
            category,
        } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            let tree = &views.rollup;

            if job_type.is_some() || category.is_some() {
                let target = match (job_type, in_unit, in_sector) {
                    (Some(job_type), Some(unit), Some(sector)) => DrillTarget::Sector {
                        job_type,
                        unit,
                        sector,
                        category,
                    },
                    (Some(job_type), Some(unit), None) => DrillTarget::Unit {
                        job_type,
                        unit,
                        category,
                    },
                    (Some(job_type), None, _) => DrillTarget::JobType { job_type, category },
                    (None, _, _) => DrillTarget::Root { category },
                };
                print_selection(&drilldown::drill_rollup(tree, &target));
                return Ok(());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&tree.rows())?);
                return Ok(());
            }
            if tree.is_empty() {
                println!("No open vacancies.");
                return Ok(());
            }
            for (name, node) in &tree.job_types {
                println!("{name}: {}", node.tally.total());
                for (unit, unit_node) in &node.units {
                    println!("  {unit}: {}", unit_node.tally.total());
                    for (sector, leaf) in &unit_node.sectors {
                        let tally = leaf.tally();
                        print!(
                            "    {sector}: growth {} | replacement {}",
                            tally.growth, tally.replacement
                        );
                        if tree.show_frozen {
                            print!(" | frozen {}", tally.frozen);
                        }
                        println!(" | total {}", tally.total());
                    }
                }
            }
            println!("Total: {}", tree.tally.total());
        }
        Commands::Aging { filter, bucket } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            match bucket {
                Some(bucket) => print_selection(&drilldown::drill_bucket(&views.aging, bucket)),
                None => print_buckets("Open vacancies by days open", &views.aging),
            }
        }
        Commands::LeadTime { filter, bucket } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            match bucket {
                Some(bucket) => {
                    print_selection(&drilldown::drill_bucket(&views.lead_time, bucket))
                }
                None => print_buckets(
                    &format!("Closures {} by days to close", views.closing_window),
                    &views.lead_time,
                ),
            }
        }
        Commands::Share { filter, job_type } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            if let Some(job_type) = job_type {
                print_selection(&drilldown::drill_share(&views.share, &job_type));
                return Ok(());
            }
            if views.share.is_empty() {
                println!("No open vacancies.");
            }
            for share in &views.share {
                println!(
                    "- {}: {} ({:.1}%)",
                    share.job_type,
                    share.records.len(),
                    share.percent
                );
            }
        }
        Commands::Closers { filter, closer } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            if let Some(closer) = closer {
                print_selection(&drilldown::drill_closer(&views.closers, &closer));
                return Ok(());
            }
            if views.closers.is_empty() {
                println!("No closures in {}.", views.closing_window);
            }
            for tally in &views.closers {
                println!("- {}: {}", tally.closer, tally.records.len());
            }
        }
        Commands::Export { filter, out } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            let rows = export::export_rows(views.listing.iter().map(|record| record.as_ref()));
            export::write_csv_file(&out, &rows)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Exported {} vacancies to {}.", rows.len(), out.display());
        }
        Commands::Report {
            filter,
            daily_basis,
            daily_scope,
            out,
        } => {
            let views = load_views(&pool, &settings, filter.view_state(today)?).await?;
            let daily = daily_breakdown(
                &views.listing,
                daily_basis,
                daily_scope,
                views.closing_window,
            );
            let report = report::build_report(&views, &daily);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Watch { filter, verbose } => {
            if verbose {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            let view = filter.view_state(today)?;
            let changes = PgChangeStream::connect(&pool, &settings.notify_channel)
                .await
                .context("failed to listen for vacancy changes")?;
            let controller =
                Controller::new(Arc::new(PgRecordStore::new(pool.clone())), settings.clone())
                    .with_fetch_mode(FetchMode::Narrowed)
                    .with_view(view);
            let mut subscription = controller.subscribe();
            let (commands, receiver) = mpsc::channel(16);
            let runner = tokio::spawn(controller.run(changes, receiver));

            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    changed = subscription.views.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let views = subscription.views.borrow_and_update().clone();
                        print_summary(&views);
                    }
                    state = subscription.state.changed() => {
                        if state.is_err() {
                            break;
                        }
                        let state = subscription.state.borrow_and_update().clone();
                        if let ControllerState::Error(message) = state {
                            eprintln!("refresh failed: {message}");
                        }
                    }
                    _ = &mut shutdown => {
                        let _ = commands.send(Command::Shutdown).await;
                        break;
                    }
                }
            }

            runner.await.context("reconciliation task failed")?;
            println!("Stopped watching.");
        }
        Commands::Open {
            actor,
            sequence,
            unit,
            sector,
            job_type,
            title,
            kind,
            reason,
            replacing,
            shift,
            manager,
            director,
        } => {
            let vacancy = lifecycle::open(
                NewVacancy {
                    sequence,
                    unit,
                    sector,
                    job_type,
                    title,
                    kind: RequisitionKind::from_label(&kind),
                    reason,
                    replaced_name: replacing,
                    shift,
                    manager,
                    director,
                },
                &actor.actor,
                Utc::now(),
            )?;
            if !db::insert_vacancy(&pool, &vacancy).await? {
                anyhow::bail!("a vacancy with this number already exists");
            }
            println!("Opened vacancy {}.", vacancy.id);
        }
        Commands::Close {
            actor,
            id,
            hire,
            channel,
            on,
            note,
        } => {
            let now = Utc::now();
            apply_transition(&pool, id, |current| {
                lifecycle::close(
                    current,
                    Closing {
                        closed_at: on.map_or(now, |day| lifecycle::closing_on(current, day)),
                        hire_name: hire,
                        sourcing_channel: channel,
                        note,
                    },
                    &actor.actor,
                    now,
                )
            })
            .await?;
            println!("Closed vacancy {id}.");
        }
        Commands::Freeze { actor, id } => {
            apply_transition(&pool, id, |current| {
                lifecycle::set_frozen(current, true, &actor.actor, Utc::now())
            })
            .await?;
            println!("Froze vacancy {id}.");
        }
        Commands::Unfreeze { actor, id } => {
            apply_transition(&pool, id, |current| {
                lifecycle::set_frozen(current, false, &actor.actor, Utc::now())
            })
            .await?;
            println!("Unfroze vacancy {id}.");
        }
        Commands::Reopen { actor, id, reason } => {
            apply_transition(&pool, id, |current| {
                lifecycle::reopen(current, &reason, &actor.actor, Utc::now())
            })
            .await?;
            println!("Reopened vacancy {id}.");
        }
        Commands::Comment { actor, id, text } => {
            apply_transition(&pool, id, |current| {
                lifecycle::comment(current, &text, &actor.actor, Utc::now())
            })
            .await?;
            println!("Comment added to vacancy {id}.");
        }
        Commands::Edit {
            actor,
            id,
            sequence,
            unit,
            sector,
            job_type,
            title,
            kind,
            shift,
            manager,
            director,
            creator,
            closer,
        } => {
            let changes = VacancyEdit {
                sequence,
                unit,
                sector,
                job_type,
                title,
                kind: kind.as_deref().map(RequisitionKind::from_label),
                shift,
                manager,
                director,
                creator,
                closer,
            };
            let edited = apply_transition(&pool, id, |current| {
                lifecycle::edit(current, changes, &actor.actor, Utc::now())
            })
            .await?;
            println!(
                "Updated vacancy {id} ({} audit lines).",
                edited.observations.len()
            );
        }
        Commands::Bulk {
            actor,
            filter,
            ids,
            field,
            value,
        } => {
            let mut controller = load_controller(&pool, &settings, filter.view_state(today)?).await?;
            let ids: BTreeSet<Uuid> = ids.into_iter().collect();
            if ids.is_empty() {
                controller.toggle_select_all();
            } else {
                for id in &ids {
                    controller.toggle_selected(*id);
                }
            }
            let selected = controller.selected_records();
            if selected.is_empty() {
                anyhow::bail!("no vacancies selected");
            }
            if !ids.is_empty() && selected.len() < ids.len() {
                anyhow::bail!(
                    "{} of the given ids are not among the listed vacancies",
                    ids.len() - selected.len()
                );
            }

            let updated =
                lifecycle::bulk_update(&selected, field, &value, &actor.actor, Utc::now())?;
            for record in &updated {
                db::save_vacancy(&pool, record)
                    .await
                    .with_context(|| format!("failed to save vacancy {}", record.id))?;
            }
            info!(selected = selected.len(), updated = updated.len(), "bulk update applied");
            println!(
                "Updated {} of {} selected vacancies.",
                updated.len(),
                selected.len()
            );
        }
    }

    Ok(())
}
