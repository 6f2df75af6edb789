//! The monitor task: one actor owning the fleet's state.
//!
//! [`Monitor::run`] drives the refresh clock, launches poll cycles, and on
//! each settled cycle aggregates the results, records history and publishes
//! a new [`FleetSnapshot`]. Everything else talks to it through a cloneable
//! [`MonitorHandle`]: snapshots and the countdown arrive over watch
//! channels, changes go in as [`MonitorCommand`]s.
//!
//! The fan-out of a cycle runs in its own task so that the clock keeps
//! ticking and commands keep being served while devices are slow to answer.
//! Its results come back over an mpsc channel and are folded in by the
//! monitor task, which is the only writer of the refresh state, registry
//! and history. History reaches the store through a [`HistoryWriter`] task,
//! one batch per settled cycle.

pub mod commands;
mod history_writer;

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, FleetSnapshot};
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::poller::{DeviceFetcher, DevicePoll, poll_fleet};
use crate::registry::DeviceRegistry;
use crate::scheduler::{Countdown, RefreshScheduler, Trigger};
use crate::settings::Settings;
use crate::storage::KeyValueStore;
use crate::timeseries::{SeriesKey, TimeSeriesSample, TimeSeriesStore};
use crate::tracing::prelude::*;
pub use commands::MonitorCommand;
use history_writer::HistoryWriter;

const COMMAND_QUEUE: usize = 16;

/// Polls of one cycle, sent back by the fan-out task.
struct CycleOutcome {
    cycle: u64,
    polls: Vec<DevicePoll>,
}

pub struct Monitor {
    config: MonitorConfig,
    store: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn DeviceFetcher>,
    settings: Settings,
    registry: DeviceRegistry,
    aggregator: Aggregator,
    history: TimeSeriesStore,
    /// Started by [`Monitor::run`].
    writer: Option<HistoryWriter>,
    scheduler: RefreshScheduler,
    /// Number of the most recently launched cycle.
    cycle: u64,
    /// The registry changed while a cycle was in flight; poll again as soon
    /// as it settles.
    rerun: bool,
    snapshot_tx: watch::Sender<FleetSnapshot>,
    countdown_tx: watch::Sender<Countdown>,
    command_rx: mpsc::Receiver<MonitorCommand>,
    done_tx: mpsc::Sender<CycleOutcome>,
    done_rx: mpsc::Receiver<CycleOutcome>,
}

impl Monitor {
    /// Load persisted state from `store` and build the monitor with its
    /// handle. Nothing is polled until [`Monitor::run`] is awaited.
    pub fn new(
        config: MonitorConfig,
        store: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn DeviceFetcher>,
    ) -> (Self, MonitorHandle) {
        let settings = Settings::new(store.clone(), &config);
        let registry = DeviceRegistry::load(store.clone(), config.duplicates);
        let history =
            TimeSeriesStore::new(store.clone(), config.history_window, config.average_window);
        let scheduler = RefreshScheduler::new(
            settings.refresh_interval(),
            config.tick,
            config.overdue_margin,
            Instant::now(),
        );

        let (snapshot_tx, snapshot_rx) = watch::channel(FleetSnapshot::default());
        let (countdown_tx, countdown_rx) = watch::channel(scheduler.countdown(Instant::now()));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (done_tx, done_rx) = mpsc::channel(1);

        let monitor = Self {
            config,
            store,
            fetcher,
            settings,
            registry,
            aggregator: Aggregator::new(),
            history,
            writer: None,
            scheduler,
            cycle: 0,
            rerun: false,
            snapshot_tx,
            countdown_tx,
            command_rx,
            done_tx,
            done_rx,
        };
        let handle = MonitorHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            countdown: countdown_rx,
        };
        (monitor, handle)
    }

    /// Run until `cancellation` fires or every handle has been dropped.
    ///
    /// A first cycle is started immediately.
    pub async fn run(mut self, cancellation: CancellationToken) {
        info!(
            devices = self.registry.len(),
            interval_ms = self.scheduler.interval().as_millis() as u64,
            "Monitor started"
        );
        let (writer, writer_task) = HistoryWriter::spawn(self.store.clone());
        self.writer = Some(writer);
        self.begin_cycle("startup");

        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    break;
                }
                _ = tick.tick() => {
                    self.on_tick();
                }
                Some(outcome) = self.done_rx.recv() => {
                    self.on_cycle_settled(outcome);
                }
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All monitor handles dropped");
                        break;
                    }
                },
            }
        }

        // Dropping the monitor closes the writer's queue; let it drain.
        drop(self);
        if let Err(e) = writer_task.await {
            error!(error = %e, "History writer failed");
        }
        info!("Monitor stopped");
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        self.countdown_tx.send_replace(self.scheduler.countdown(now));

        if let Some(trigger) = self.scheduler.tick(now) {
            trace!(?trigger, "Refresh clock fired");
            self.launch_cycle(match trigger {
                Trigger::Due => "due",
                Trigger::Overdue => "overdue",
            });
        }
    }

    /// Start a cycle unless one is in flight. Returns whether one started.
    fn begin_cycle(&mut self, reason: &'static str) -> bool {
        if !self.scheduler.try_begin() {
            debug!(reason, cycle = self.cycle, "Cycle already in flight");
            return false;
        }
        self.launch_cycle(reason);
        true
    }

    /// Spawn the fan-out. The scheduler must already be marked fetching.
    ///
    /// The registry is reread first so that devices added or removed by
    /// another process sharing the store are polled.
    fn launch_cycle(&mut self, reason: &'static str) {
        self.registry.reload();
        self.cycle += 1;
        let cycle = self.cycle;
        let addresses = self.registry.list().to_vec();
        debug!(cycle, devices = addresses.len(), reason, "Cycle started");

        self.snapshot_tx.send_modify(|snapshot| snapshot.mark_in_flight(&addresses));

        let fetcher = self.fetcher.clone();
        let done = self.done_tx.clone();
        let timeout = self.config.request_timeout;
        tokio::spawn(async move {
            let polls = poll_fleet(fetcher.as_ref(), &addresses, timeout).await;
            // The monitor may have stopped in the meantime.
            let _ = done.send(CycleOutcome { cycle, polls }).await;
        });
    }

    fn on_cycle_settled(&mut self, outcome: CycleOutcome) {
        let CycleOutcome { cycle, polls } = outcome;
        let mut snapshot = self.aggregator.settle(cycle, &polls);
        let now_ms = unix_millis();

        for row in &mut snapshot.rows {
            if let Some(status) = &row.status {
                let key = SeriesKey::device(&status.hostname, &row.address);
                let sample = self.history.append(&key, status.hash_rate, status.temp, now_ms);
                row.avg_hash_rate = Some(sample.avg_hash_rate);
            }
        }
        if let Some(hash_rate) = snapshot.summary.hash_rate {
            let sample = self
                .history
                .append(&SeriesKey::Fleet, hash_rate, snapshot.summary.temp, now_ms);
            snapshot.avg_hash_rate = Some(sample.avg_hash_rate);
        }
        if let Some(writer) = &self.writer {
            writer.write(self.history.take_dirty());
        }

        self.scheduler.finish(Instant::now());
        debug!(
            cycle,
            with_data = snapshot.devices_with_data,
            without_data = snapshot.devices_without_data,
            hashrate_gh = snapshot.summary.hash_rate,
            "Cycle settled"
        );
        self.snapshot_tx.send_replace(snapshot);

        if std::mem::take(&mut self.rerun) {
            self.begin_cycle("registry changed");
        }
    }

    fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::AddDevice { address, reply } => {
                let result = self.registry.add(&address);
                if matches!(result, Ok(true)) {
                    self.registry_changed();
                }
                let _ = reply.send(result);
            }
            MonitorCommand::RemoveDevice { address, reply } => {
                let result = self.registry.remove(&address);
                if matches!(result, Ok(n) if n > 0) {
                    self.registry_changed();
                }
                let _ = reply.send(result);
            }
            MonitorCommand::ListDevices { reply } => {
                let _ = reply.send(self.registry.list().to_vec());
            }
            MonitorCommand::RefreshInterval { reply } => {
                let _ = reply.send(self.scheduler.interval());
            }
            MonitorCommand::SetRefreshInterval { interval, reply } => {
                let result = self.settings.set_refresh_interval(interval);
                if result.is_ok() {
                    info!(interval_ms = interval.as_millis() as u64, "Refresh interval changed");
                    self.scheduler.set_interval(interval);
                }
                let _ = reply.send(result);
            }
            MonitorCommand::Refresh { reply } => {
                let _ = reply.send(self.begin_cycle("manual"));
            }
            MonitorCommand::ResetCharts { reply } => {
                // Queued behind any pending batch, so nothing written
                // before the reset survives it.
                self.history.reset();
                match &self.writer {
                    Some(writer) => writer.reset_charts(reply),
                    None => {
                        let _ = reply.send(Err(Error::MonitorStopped));
                    }
                }
            }
            MonitorCommand::History { key, reply } => {
                let _ = reply.send(self.history.series(&key).to_vec());
            }
        }
    }

    fn registry_changed(&mut self) {
        if self.scheduler.is_fetching() {
            self.rerun = true;
        } else {
            self.begin_cycle("registry changed");
        }
    }
}

fn unix_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Cloneable access to a running [`Monitor`].
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    snapshot: watch::Receiver<FleetSnapshot>,
    countdown: watch::Receiver<Countdown>,
}

impl MonitorHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> FleetSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshot.clone()
    }

    pub fn countdown(&self) -> Countdown {
        *self.countdown.borrow()
    }

    pub fn subscribe_countdown(&self) -> watch::Receiver<Countdown> {
        self.countdown.clone()
    }

    /// Wait for the first settled snapshot of a cycle later than `after`.
    pub async fn settled_after(&self, after: u64) -> Result<FleetSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| s.settled && s.cycle > after)
            .await
            .map_err(|_| Error::MonitorStopped)?;
        Ok(snapshot.clone())
    }

    pub async fn add_device(&self, address: &str) -> Result<bool> {
        let address = address.to_string();
        self.request(|reply| MonitorCommand::AddDevice { address, reply }).await?
    }

    pub async fn remove_device(&self, address: &str) -> Result<usize> {
        let address = address.to_string();
        self.request(|reply| MonitorCommand::RemoveDevice { address, reply }).await?
    }

    pub async fn devices(&self) -> Result<Vec<String>> {
        self.request(|reply| MonitorCommand::ListDevices { reply }).await
    }

    pub async fn refresh_interval(&self) -> Result<Duration> {
        self.request(|reply| MonitorCommand::RefreshInterval { reply }).await
    }

    pub async fn set_refresh_interval(&self, interval: Duration) -> Result<()> {
        self.request(|reply| MonitorCommand::SetRefreshInterval { interval, reply }).await?
    }

    /// Ask for a cycle now. Returns false if one was already in flight.
    pub async fn refresh(&self) -> Result<bool> {
        self.request(|reply| MonitorCommand::Refresh { reply }).await
    }

    pub async fn reset_charts(&self) -> Result<()> {
        self.request(|reply| MonitorCommand::ResetCharts { reply }).await?
    }

    pub async fn history(&self, key: SeriesKey) -> Result<Vec<TimeSeriesSample>> {
        self.request(|reply| MonitorCommand::History { key, reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::MonitorStopped)?;
        rx.await.map_err(|_| Error::MonitorStopped)
    }
}
