//! The worker pool that fans a batch of devices out over the [Updater].
//!
//! A feeder on the blocking thread pool drains the [DeviceReader] into a
//! bounded queue, and a fixed number of worker tasks pull from that queue
//! until it is closed and empty. A failed device is logged and counted, and
//! never stops the other workers.

use std::{fmt::Display, io::Read, sync::Arc};

use tokio::{
    sync::{mpsc, Mutex},
    task::{spawn_blocking, JoinError, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{
    client::{UpdateOutcome, Updater},
    device::{DeviceId, DeviceReader},
    error::BatchError,
    payload::UpdatePayload,
};

#[cfg(test)]
mod tests;

/// Upper bound on the number of devices waiting in the queue.
const MAX_QUEUED: usize = 1024;

fn queue_capacity(workers: usize) -> usize {
    workers.clamp(1, MAX_QUEUED)
}

/// Tally of what happened over one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// Devices an update was attempted for.
    pub attempted: usize,
    pub succeeded: usize,
    pub api_errors: usize,
    pub malformed: usize,
    pub transport_errors: usize,
    /// Input rows dropped for holding an invalid device id.
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &UpdateOutcome) {
        self.attempted += 1;
        match outcome {
            UpdateOutcome::Success => self.succeeded += 1,
            UpdateOutcome::StructuredApiError { .. } => self.api_errors += 1,
            UpdateOutcome::MalformedResponse { .. } => self.malformed += 1,
            UpdateOutcome::TransportError { .. } => self.transport_errors += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.api_errors + self.malformed + self.transport_errors
    }
}

impl Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} devices updated, {} failed ({} rejected, {} unexpected responses, {} unreachable), {} rows skipped",
            self.succeeded,
            self.attempted,
            self.failed(),
            self.api_errors,
            self.malformed,
            self.transport_errors,
            self.skipped,
        )
    }
}

type Queue = Arc<Mutex<mpsc::Receiver<DeviceId>>>;
type Tally = Arc<Mutex<BatchSummary>>;

/// Runs a batch over a fixed number of concurrent workers.
pub struct Dispatcher<U> {
    updater: Arc<U>,
    workers: usize,
}

impl<U> Dispatcher<U>
where
    U: Updater + 'static,
{
    pub fn new(updater: U, workers: usize) -> Result<Self, BatchError> {
        if workers < 1 {
            return Err(BatchError::configuration(
                "Need positive number of worker threads.",
            ));
        }
        Ok(Self {
            updater: Arc::new(updater),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Attempts every device `devices` yields exactly once, and waits for all
    /// of them to finish.
    ///
    /// A structural error in the input stops feeding. Devices that were
    /// already queued are still processed, and the error is returned after.
    #[tracing::instrument(skip_all, fields(workers = self.workers))]
    pub async fn run<R>(
        &self,
        devices: DeviceReader<R>,
        payload: UpdatePayload,
    ) -> Result<BatchSummary, BatchError>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<DeviceId>(queue_capacity(self.workers));
        let queue: Queue = Arc::new(Mutex::new(rx));
        let tally: Tally = Arc::default();

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            workers.spawn(work(
                worker,
                queue.clone(),
                self.updater.clone(),
                payload.clone(),
                tally.clone(),
            ));
        }
        // Only workers may hold the receiver, so the feeder notices if they all die.
        drop(queue);

        let feeder = spawn_blocking(move || {
            let mut devices = devices;
            let fed = feed(&mut devices, tx);
            (devices.skipped(), fed)
        });

        let fed = feeder.await;
        let joined = join_all(&mut workers).await;

        let (skipped, queued) = fed?;
        let queued = queued?;
        joined?;

        let mut summary = tally.lock().await.clone();
        summary.skipped = skipped;
        debug!(queued, "All workers finished");
        Ok(summary)
    }
}

/// Pushes every device onto the queue, closing it when done.
fn feed<R: Read>(
    devices: &mut DeviceReader<R>,
    tx: mpsc::Sender<DeviceId>,
) -> Result<usize, BatchError> {
    let mut queued = 0;
    for device in devices.by_ref() {
        let device = device?;
        if tx.blocking_send(device).is_err() {
            error!("All workers have exited, no longer feeding devices");
            break;
        }
        queued += 1;
    }
    Ok(queued)
}

async fn work<U: Updater>(
    worker: usize,
    queue: Queue,
    updater: Arc<U>,
    payload: UpdatePayload,
    tally: Tally,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(device) = next else {
            break;
        };

        debug!(worker, %device, "Updating device");
        let outcome = updater.update(&device, &payload).await;
        report(&device, &outcome);
        tally.lock().await.record(&outcome);
    }
    debug!(worker, "Queue drained, worker exiting");
}

fn report(device: &DeviceId, outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Success => info!("{device} updated."),
        UpdateOutcome::StructuredApiError { .. } | UpdateOutcome::TransportError { .. } => {
            warn!("{device}: {outcome}")
        }
        UpdateOutcome::MalformedResponse { .. } => {
            error!("{device}: {outcome}. Is the fleet API address correct?")
        }
    }
}

/// Waits for every task, returning the first failure.
async fn join_all(workers: &mut JoinSet<()>) -> Result<(), JoinError> {
    let mut first_err = None;
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("Worker task failed: {e}");
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}
