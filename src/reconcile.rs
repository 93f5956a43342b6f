//! Live reconciliation of derived views against the record store.
//!
//! The [`Controller`] is the only owner of mutable state: the current
//! [`Snapshot`] and the user's [`ViewState`]. Everything shown to a consumer is
//! a [`DerivedViews`] value recomputed from those two and published on a
//! `watch` channel.
//!
//! Any change notification triggers a full re-fetch. Requests are stamped with
//! a monotonic token; a response is applied only when its token is newer than
//! the last applied one, and nothing is applied once the controller is closed.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aging::{closed_within, BucketKind, BucketMode, BucketTable, DateWindow};
use crate::breakdown::{closures_by_closer, job_type_share, CloserTally, JobTypeShare};
use crate::config::EngineSettings;
use crate::error::PulseError;
use crate::filter::{self, FilterState, StatusScope};
use crate::models::{Snapshot, Vacancy, VacancyRef};
use crate::query::RecordQuery;
use crate::rollup::{self, RollupTree};

/// Query side of the record store.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<Vacancy>, PulseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
    /// Something changed but the stream did not say what.
    Unknown,
}

impl ChangeEvent {
    pub fn from_payload(payload: &str) -> Self {
        match payload.trim().to_ascii_uppercase().as_str() {
            "INSERT" => ChangeEvent::Insert,
            "UPDATE" => ChangeEvent::Update,
            "DELETE" => ChangeEvent::Delete,
            _ => ChangeEvent::Unknown,
        }
    }
}

/// Notification side of the record store. `None` means the stream has ended.
#[async_trait]
pub trait ChangeStream: Send {
    async fn next_change(&mut self) -> Option<ChangeEvent>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Fetching,
    /// The last fetch failed. Behaves like `Idle`; the message is a transient
    /// notice and the previous snapshot stays in place.
    Error(String),
}

/// Expandable node of the rollup map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodePath {
    JobType(String),
    Unit(String),
}

/// Session state the user controls. Reconciliation never resets it.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub filter: FilterState,
    pub show_frozen: bool,
    pub expanded: BTreeSet<NodePath>,
    pub selected: BTreeSet<Uuid>,
    pub detail: Option<VacancyRef>,
}

/// Everything a screen renders, computed from one snapshot.
#[derive(Debug, Clone)]
pub struct DerivedViews {
    pub snapshot: Arc<Snapshot>,
    pub computed_at: DateTime<Utc>,
    /// Filtered and sorted list, as the user asked.
    pub listing: Vec<VacancyRef>,
    pub rollup: RollupTree,
    pub aging: BucketTable,
    pub closing_window: DateWindow,
    pub lead_time: BucketTable,
    pub share: Vec<JobTypeShare>,
    pub closers: Vec<CloserTally>,
}

impl DerivedViews {
    /// Recomputes every pipeline. The map, aging and share cover open
    /// vacancies; lead time and the closer ranking cover closures inside the
    /// closing window. Both sides honour the rest of the filter.
    pub fn compute(
        snapshot: Arc<Snapshot>,
        view: &ViewState,
        settings: &EngineSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let ctx = settings.pipeline(now);
        let records = &snapshot.records;

        let listing = filter::apply(records, &view.filter, &ctx);

        let open_filter = view.filter.with_status(StatusScope::Open);
        let mut open = filter::apply(records, &open_filter, &ctx);
        if !view.show_frozen {
            open.retain(|record| !record.frozen);
        }

        let closing_window = view
            .filter
            .closing_window
            .unwrap_or_else(|| DateWindow::month_to_date(now.date_naive()));
        let closed = closed_within(
            &filter::apply(records, &view.filter.with_status(StatusScope::Closed), &ctx),
            closing_window,
        );

        Self {
            computed_at: now,
            rollup: rollup::build(&open, view.show_frozen),
            aging: BucketTable::build(&open, BucketMode::OpenAging { now }),
            lead_time: BucketTable::build(&closed, BucketMode::LeadTime),
            share: job_type_share(&open),
            closers: closures_by_closer(&closed, &settings.closer_fallback),
            closing_window,
            listing,
            snapshot,
        }
    }

    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            snapshot: Arc::new(Snapshot::default()),
            computed_at: now,
            listing: Vec::new(),
            rollup: RollupTree::default(),
            aging: BucketTable::empty(BucketKind::OpenAging),
            closing_window: DateWindow::month_to_date(now.date_naive()),
            lead_time: BucketTable::empty(BucketKind::LeadTime),
            share: Vec::new(),
            closers: Vec::new(),
        }
    }
}

/// Stamp of one fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn token(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { records: usize },
    /// A newer response was already applied.
    Stale,
    /// The controller was closed before the response arrived.
    Discarded,
    Failed,
}

/// How much of the filter the store evaluates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Fetch every vacancy and filter in memory.
    #[default]
    Full,
    /// Push the filter's store-safe predicates into the query. The query is
    /// rebuilt from the current filter on every fetch.
    Narrowed,
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub type ViewUpdate = Box<dyn FnOnce(&mut ViewState) + Send>;

pub enum Command {
    Refresh,
    UpdateView(ViewUpdate),
    Shutdown,
}

/// Receiving ends for a controller's published state.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub views: watch::Receiver<Arc<DerivedViews>>,
    pub state: watch::Receiver<ControllerState>,
}

type FetchResult = (FetchTicket, Result<Vec<Vacancy>, PulseError>);

pub struct Controller<S: RecordSource> {
    source: Arc<S>,
    mode: FetchMode,
    settings: EngineSettings,
    clock: Clock,
    issued: u64,
    applied: u64,
    in_flight: usize,
    alive: bool,
    snapshot: Arc<Snapshot>,
    view: ViewState,
    views_tx: watch::Sender<Arc<DerivedViews>>,
    state_tx: watch::Sender<ControllerState>,
}

impl<S: RecordSource> Controller<S> {
    pub fn new(source: Arc<S>, settings: EngineSettings) -> Self {
        Self::with_clock(source, settings, Arc::new(Utc::now))
    }

    pub fn with_clock(source: Arc<S>, settings: EngineSettings, clock: Clock) -> Self {
        let (views_tx, _) = watch::channel(Arc::new(DerivedViews::empty(clock())));
        let (state_tx, _) = watch::channel(ControllerState::Idle);
        Self {
            source,
            mode: FetchMode::Full,
            settings,
            clock,
            issued: 0,
            applied: 0,
            in_flight: 0,
            alive: true,
            snapshot: Arc::new(Snapshot::default()),
            view: ViewState::default(),
            views_tx,
            state_tx,
        }
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_view(mut self, view: ViewState) -> Self {
        self.view = view;
        self.publish();
        self
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            views: self.views_tx.subscribe(),
            state: self.state_tx.subscribe(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state_tx.borrow().clone()
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn views(&self) -> Arc<DerivedViews> {
        self.views_tx.borrow().clone()
    }

    /// The query the next fetch sends. Status is never narrowed: the open and
    /// closed sides of the views both come from the same snapshot.
    pub fn store_query(&self) -> RecordQuery {
        let query = match self.mode {
            FetchMode::Full => RecordQuery::all(),
            FetchMode::Narrowed => {
                RecordQuery::from_filter(&self.view.filter.with_status(StatusScope::Any))
            }
        };
        query.with_limit(self.settings.fetch_limit)
    }

    /// Stamps a new request and moves to `Fetching`.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issued += 1;
        self.in_flight += 1;
        self.state_tx.send_replace(ControllerState::Fetching);
        debug!(token = self.issued, in_flight = self.in_flight, "fetch started");
        FetchTicket(self.issued)
    }

    /// The fetch for `ticket`, detached from the controller so it can run on
    /// its own task.
    pub fn fetch_future(
        &self,
        ticket: FetchTicket,
    ) -> impl Future<Output = FetchResult> + Send + 'static {
        let source = Arc::clone(&self.source);
        let query = self.store_query();
        async move { (ticket, source.fetch(&query).await) }
    }

    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Vacancy>, PulseError>,
    ) -> FetchOutcome {
        self.in_flight = self.in_flight.saturating_sub(1);

        if !self.alive {
            debug!(token = ticket.token(), "response discarded after close");
            return FetchOutcome::Discarded;
        }
        if ticket.token() <= self.applied {
            warn!(
                token = ticket.token(),
                applied = self.applied,
                "stale response ignored"
            );
            self.settle(None);
            return FetchOutcome::Stale;
        }

        match result {
            Ok(records) => {
                let count = records.len();
                self.applied = ticket.token();
                let fetched_at = (self.clock)();
                self.snapshot = Arc::new(Snapshot::new(ticket.token(), fetched_at, records));
                self.refresh_detail();
                self.publish();
                self.settle(None);
                info!(token = ticket.token(), records = count, "snapshot applied");
                FetchOutcome::Applied { records: count }
            }
            Err(err) => {
                warn!(
                    token = ticket.token(),
                    error = %err,
                    "fetch failed; keeping previous snapshot"
                );
                self.settle(Some(err.to_string()));
                FetchOutcome::Failed
            }
        }
    }

    /// Gives up on a fetch whose task died without a result.
    pub fn abandon_fetch(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.settle(None);
    }

    /// Fetches and applies in one step.
    pub async fn refresh(&mut self) -> FetchOutcome {
        let ticket = self.begin_fetch();
        let (ticket, result) = self.fetch_future(ticket).await;
        self.complete_fetch(ticket, result)
    }

    fn settle(&mut self, failure: Option<String>) {
        let next = if self.in_flight > 0 {
            ControllerState::Fetching
        } else if let Some(message) = failure {
            ControllerState::Error(message)
        } else {
            ControllerState::Idle
        };
        self.state_tx.send_replace(next);
    }

    fn refresh_detail(&mut self) {
        if let Some(current) = self.view.detail.take() {
            self.view.detail = self.snapshot.find(current.id);
            if self.view.detail.is_none() {
                debug!(id = %current.id, "detail closed; vacancy no longer present");
            }
        }
    }

    fn publish(&mut self) {
        let views = DerivedViews::compute(
            Arc::clone(&self.snapshot),
            &self.view,
            &self.settings,
            (self.clock)(),
        );
        self.views_tx.send_replace(Arc::new(views));
    }

    /// Applies a user change to the session state and recomputes from the
    /// current snapshot. Never fetches; returns `true` when the change altered
    /// the store query, so the snapshot must be fetched again.
    pub fn update_view(&mut self, update: impl FnOnce(&mut ViewState)) -> bool {
        let before = self.store_query();
        update(&mut self.view);
        self.publish();
        self.store_query() != before
    }

    pub fn set_filter(&mut self, filter: FilterState) -> bool {
        self.update_view(|view| view.filter = filter)
    }

    /// Selected vacancies still in the current listing, in listing order.
    pub fn selected_records(&self) -> Vec<VacancyRef> {
        self.views()
            .listing
            .iter()
            .filter(|record| self.view.selected.contains(&record.id))
            .cloned()
            .collect()
    }

    pub fn toggle_expanded(&mut self, path: NodePath) {
        if !self.view.expanded.remove(&path) {
            self.view.expanded.insert(path);
        }
    }

    pub fn expand_all_units(&mut self) {
        let units = self.views().rollup.unit_names();
        self.view.expanded.extend(units.into_iter().map(NodePath::Unit));
    }

    pub fn collapse_all(&mut self) {
        self.view.expanded.clear();
    }

    pub fn toggle_selected(&mut self, id: Uuid) {
        if !self.view.selected.remove(&id) {
            self.view.selected.insert(id);
        }
    }

    /// Selects every row in the current listing, or clears the selection when
    /// all of them are already selected.
    pub fn toggle_select_all(&mut self) {
        let listed: BTreeSet<Uuid> = self
            .views()
            .listing
            .iter()
            .map(|record| record.id)
            .collect();
        if !listed.is_empty() && listed.is_subset(&self.view.selected) {
            self.view.selected.clear();
        } else {
            self.view.selected = listed;
        }
    }

    pub fn open_detail(&mut self, id: Uuid) -> Option<VacancyRef> {
        self.view.detail = self.snapshot.find(id);
        self.view.detail.clone()
    }

    pub fn close_detail(&mut self) {
        self.view.detail = None;
    }

    /// Marks the consumer as gone. Responses that arrive afterwards are dropped.
    pub fn close(&mut self) {
        self.alive = false;
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn spawn_fetch(&mut self, tasks: &mut JoinSet<FetchResult>) {
        let ticket = self.begin_fetch();
        tasks.spawn(self.fetch_future(ticket));
    }

    /// Event loop: fetches on start, then on every change event or refresh
    /// command, applying responses as they complete. Returns when told to shut
    /// down or when the command channel closes; outstanding fetches are
    /// aborted and their results never applied.
    pub async fn run<C: ChangeStream>(
        mut self,
        mut changes: C,
        mut commands: mpsc::Receiver<Command>,
    ) -> Self {
        let mut tasks: JoinSet<FetchResult> = JoinSet::new();
        let mut changes_open = true;

        self.spawn_fetch(&mut tasks);

        loop {
            tokio::select! {
                change = changes.next_change(), if changes_open => match change {
                    Some(event) => {
                        debug!(?event, "change notification");
                        self.spawn_fetch(&mut tasks);
                    }
                    None => {
                        info!("change stream ended; manual refresh only");
                        changes_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Refresh) => self.spawn_fetch(&mut tasks),
                    Some(Command::UpdateView(update)) => {
                        if self.update_view(update) {
                            debug!("filter changed the store query; refetching");
                            self.spawn_fetch(&mut tasks);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok((ticket, result)) => {
                        self.complete_fetch(ticket, result);
                    }
                    Err(err) => {
                        warn!(error = %err, "fetch task failed to complete");
                        self.abandon_fetch();
                    }
                },
            }
        }

        self.close();
        tasks.abort_all();
        self.in_flight = 0;
        self.state_tx.send_replace(ControllerState::Idle);
        info!("reconciliation stopped");
        self
    }
}
