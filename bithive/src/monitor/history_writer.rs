//! Writes history to the store off the monitor task.
//!
//! The monitor hands over each settled cycle's changed series as one batch.
//! Batches and resets are applied in the order they were sent, each on the
//! blocking pool, so slow disks never stall the refresh clock.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::storage::{self, KeyValueStore};
use crate::timeseries::{self, DirtySeries};
use crate::tracing::prelude::*;

pub(super) enum WriteJob {
    Series(DirtySeries),
    /// Remove all history from the store, replying once done.
    ResetCharts(oneshot::Sender<Result<()>>),
}

#[derive(Clone)]
pub(super) struct HistoryWriter {
    jobs: mpsc::UnboundedSender<WriteJob>,
}

impl HistoryWriter {
    /// Start the writer. It stops once every [`HistoryWriter`] is dropped
    /// and the queued jobs are done.
    pub(super) fn spawn(store: Arc<dyn KeyValueStore>) -> (Self, JoinHandle<()>) {
        let (jobs, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store, rx));
        (Self { jobs }, task)
    }

    pub(super) fn write(&self, batch: DirtySeries) {
        if batch.is_empty() {
            return;
        }
        if self.jobs.send(WriteJob::Series(batch)).is_err() {
            warn!("History writer stopped, samples not persisted");
        }
    }

    pub(super) fn reset_charts(&self, reply: oneshot::Sender<Result<()>>) {
        if let Err(mpsc::error::SendError(WriteJob::ResetCharts(reply))) =
            self.jobs.send(WriteJob::ResetCharts(reply))
        {
            let _ = reply.send(Err(Error::MonitorStopped));
        }
    }
}

async fn run(store: Arc<dyn KeyValueStore>, mut jobs: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = jobs.recv().await {
        let store = store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || apply(store.as_ref(), job)).await {
            error!(error = %e, "History write panicked");
        }
    }
    trace!("History writer finished");
}

fn apply(store: &dyn KeyValueStore, job: WriteJob) {
    match job {
        WriteJob::Series(batch) => {
            for (key, samples) in &batch {
                if let Err(e) = timeseries::write_series(store, key, samples) {
                    warn!(?key, error = %e, "Failed to persist history");
                }
            }
            trace!(series = batch.len(), "History written");
        }
        WriteJob::ResetCharts(reply) => {
            let _ = reply.send(storage::reset_charts(store));
        }
    }
}
