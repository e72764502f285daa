//! Polling dashboard state for one video.
//!
//! At most one poll is in flight. Every poll mints a [`PollToken`] that is
//! stored as current; a completion commits only while its token is still
//! current and the session is alive. Superseding a poll aborts its task and
//! retires its token, so a late answer can never overwrite newer state.

pub mod demo;
pub mod render;
pub mod source;

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::records::{merge, Aggregates, EngagementVerdict, ViewRecord};
use demo::demo_records;
use source::{AnalyticsSource, PollError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    Demo,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Started(PollToken),
    Skipped(SkipReason),
}

struct InFlight {
    token: PollToken,
    abort: AbortHandle,
}

struct PollState {
    records: Vec<ViewRecord>,
    loading: bool,
    last_error: Option<u16>,
    demo: bool,
    alive: bool,
    in_flight: Option<InFlight>,
    next_token: u64,
}

impl PollState {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            loading: true,
            last_error: None,
            demo: false,
            alive: true,
            in_flight: None,
            next_token: 0,
        }
    }

    fn cancel_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(flight) => {
                flight.abort.abort();
                self.loading = false;
                true
            }
            None => false,
        }
    }
}

/// What the presentation layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "status", rename_all = "snake_case")]
pub enum ViewStatus {
    /// First poll still outstanding, nothing to show yet.
    Loading,
    /// Failed with no data at all; blocking error with retry.
    Blocked(u16),
    Live,
    /// Last refresh failed; older data stays visible under a banner.
    Stale(u16),
    Demo,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub public_id: String,
    pub records: Vec<ViewRecord>,
    pub aggregates: Aggregates,
    pub verdict: EngagementVerdict,
    pub loading: bool,
    pub last_error: Option<u16>,
    pub demo: bool,
    pub view: ViewStatus,
}

pub struct Dashboard {
    public_id: String,
    source: Arc<dyn AnalyticsSource>,
    state: Mutex<PollState>,
    changes: broadcast::Sender<()>,
}

impl Dashboard {
    pub fn new(public_id: impl Into<String>, source: Arc<dyn AnalyticsSource>) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            public_id: public_id.into(),
            source,
            state: Mutex::new(PollState::new()),
            changes,
        })
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    /// Fires after every committed change to the dashboard state.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let _ = self.changes.send(());
    }

    /// Timer-driven poll. Skipped while another poll is outstanding.
    pub fn tick(self: &Arc<Self>) -> PollOutcome {
        let mut st = self.lock();
        if !st.alive {
            return PollOutcome::Skipped(SkipReason::TornDown);
        }
        if st.demo {
            return PollOutcome::Skipped(SkipReason::Demo);
        }
        if st.in_flight.is_some() {
            return PollOutcome::Skipped(SkipReason::InFlight);
        }
        PollOutcome::Started(self.begin_poll(&mut st))
    }

    /// Manual poll. Supersedes any outstanding poll.
    pub fn refresh(self: &Arc<Self>) -> PollOutcome {
        let mut st = self.lock();
        if !st.alive {
            return PollOutcome::Skipped(SkipReason::TornDown);
        }
        if st.demo {
            return PollOutcome::Skipped(SkipReason::Demo);
        }
        if st.cancel_in_flight() {
            debug!("Cancelled pending poll for {}", self.public_id);
        }
        PollOutcome::Started(self.begin_poll(&mut st))
    }

    fn begin_poll(self: &Arc<Self>, st: &mut PollState) -> PollToken {
        st.next_token += 1;
        let token = PollToken(st.next_token);
        st.loading = true;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = this.source.fetch(&this.public_id).await;
            this.complete(token, result);
        });

        // The task cannot commit before this is stored: it needs the lock we hold.
        st.in_flight = Some(InFlight {
            token,
            abort: handle.abort_handle(),
        });
        token
    }

    fn complete(&self, token: PollToken, result: Result<Vec<ViewRecord>, PollError>) -> bool {
        let mut st = self.lock();
        let current = st.in_flight.as_ref().map(|f| f.token);
        if !st.alive || current != Some(token) {
            debug!("Dropping superseded poll result for {}", self.public_id);
            return false;
        }

        st.in_flight = None;
        st.loading = false;
        match result {
            Ok(batch) => {
                let received = batch.len();
                let merged = merge(&st.records, batch);
                st.records = merged;
                st.last_error = None;
                debug!(
                    "Poll merged {} record(s), {} total",
                    received,
                    st.records.len()
                );
            }
            Err(e) => {
                warn!("Analytics poll failed: {}", e);
                st.last_error = Some(e.status());
            }
        }
        drop(st);

        self.notify();
        true
    }

    /// Freeze polling and show the built-in dataset.
    pub fn enter_demo(&self) {
        let mut st = self.lock();
        if st.demo {
            return;
        }
        st.cancel_in_flight();
        st.demo = true;
        st.loading = false;
        st.last_error = None;
        st.records = demo_records();
        drop(st);

        info!("Demo mode on for {}", self.public_id);
        self.notify();
    }

    /// Drop the demo dataset and resume live polling with an immediate poll.
    pub fn exit_demo(self: &Arc<Self>) -> PollOutcome {
        {
            let mut st = self.lock();
            if !st.demo {
                drop(st);
                return self.refresh();
            }
            st.demo = false;
            st.records.clear();
        }
        info!("Demo mode off for {}", self.public_id);
        self.notify();
        self.refresh()
    }

    /// End the session: nothing started before this may commit afterwards.
    pub fn teardown(&self) {
        let mut st = self.lock();
        if !st.alive {
            return;
        }
        st.alive = false;
        st.cancel_in_flight();
        debug!("Dashboard for {} torn down", self.public_id);
    }

    pub fn is_polling(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let st = self.lock();
        let aggregates = Aggregates::from_records(&st.records);
        DashboardSnapshot {
            public_id: self.public_id.clone(),
            records: st.records.clone(),
            aggregates,
            verdict: EngagementVerdict::from_average(aggregates.avg_watch_secs),
            loading: st.loading,
            last_error: st.last_error,
            demo: st.demo,
            view: view_status(&st),
        }
    }
}

fn view_status(st: &PollState) -> ViewStatus {
    if st.demo {
        return ViewStatus::Demo;
    }
    match st.last_error {
        Some(status) if st.records.is_empty() => ViewStatus::Blocked(status),
        Some(status) => ViewStatus::Stale(status),
        None if st.loading && st.records.is_empty() => ViewStatus::Loading,
        None => ViewStatus::Live,
    }
}

/// Owns the interval timer. Dropping it tears the session down.
pub struct PollerHandle {
    dashboard: Arc<Dashboard>,
    timer: Option<JoinHandle<()>>,
}

/// Poll immediately, then on every `every` tick until the handle goes away.
pub fn spawn_poller(dashboard: Arc<Dashboard>, every: Duration) -> PollerHandle {
    let polled = Arc::clone(&dashboard);
    let timer = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match polled.tick() {
                PollOutcome::Started(_) => debug!("Poll started for {}", polled.public_id),
                PollOutcome::Skipped(reason) => debug!("Poll skipped: {:?}", reason),
            }
        }
    });

    PollerHandle {
        dashboard,
        timer: Some(timer),
    }
}

impl PollerHandle {
    pub fn dashboard(&self) -> &Arc<Dashboard> {
        &self.dashboard
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            self.dashboard.teardown();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
