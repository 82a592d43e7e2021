//! Batched, best-effort persistence of race progress.

use super::attempt::ProgressSnapshot;
use crate::storage::{blocking, RaceStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

enum WriterCommand {
    Record(ProgressSnapshot),
    Forget(Uuid),
}

/// Keeps the latest snapshot per attempt and flushes them on an interval.
///
/// Dropping every handle flushes what is pending and stops the task.
#[derive(Clone)]
pub struct ProgressWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl ProgressWriter {
    pub fn spawn(store: Arc<dyn RaceStore>, flush_interval: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(store, rx, flush_interval));
        (Self { tx }, handle)
    }

    /// Queue a snapshot, replacing any pending one for the same attempt.
    pub fn record(&self, snapshot: ProgressSnapshot) {
        if self.tx.send(WriterCommand::Record(snapshot)).is_err() {
            tracing::debug!("Progress writer stopped, dropping snapshot");
        }
    }

    /// Discard anything pending for an attempt that has ended.
    pub fn forget(&self, attempt_id: Uuid) {
        let _ = self.tx.send(WriterCommand::Forget(attempt_id));
    }
}

async fn run_writer(
    store: Arc<dyn RaceStore>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    flush_interval: Duration,
) {
    let mut pending: HashMap<Uuid, ProgressSnapshot> = HashMap::new();
    // First flush one interval from now
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(WriterCommand::Record(snapshot)) => {
                    pending.insert(snapshot.attempt_id, snapshot);
                }
                Some(WriterCommand::Forget(attempt_id)) => {
                    pending.remove(&attempt_id);
                }
                None => {
                    flush(&store, &mut pending).await;
                    break;
                }
            },
            _ = ticker.tick() => flush(&store, &mut pending).await,
        }
    }

    tracing::debug!("Progress writer stopped");
}

async fn flush(store: &Arc<dyn RaceStore>, pending: &mut HashMap<Uuid, ProgressSnapshot>) {
    if pending.is_empty() {
        return;
    }

    let batch: Vec<ProgressSnapshot> = pending.drain().map(|(_, snapshot)| snapshot).collect();
    let count = batch.len();
    let written = blocking(store, move |store| {
        for snapshot in &batch {
            if let Err(e) = store.save_progress(snapshot) {
                tracing::warn!("Failed to save progress for attempt {}: {}", snapshot.attempt_id, e);
            }
        }
        Ok(())
    })
    .await;

    match written {
        Ok(()) => tracing::trace!("Flushed progress for {} attempt(s)", count),
        Err(e) => tracing::warn!("Progress flush failed: {}", e),
    }
}
