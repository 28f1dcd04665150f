//! Sweep progress reporting.
//!
//! Workers push one fungible token per finished configuration through a
//! [`ProgressReporter`]. A single consumer thread counts tokens and reports
//! `completed / total`, independently of the worker pool: producers never
//! wait on the consumer or on each other.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

use xp_types::{internal_error, XpResult};

/// A running count observed by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub completed: usize,
    pub total: usize,
}

/// Create a progress channel expecting `total` tokens.
pub fn channel(total: usize) -> (ProgressReporter, ProgressMonitor) {
    let (tx, rx) = unbounded();
    (ProgressReporter { tx }, ProgressMonitor { rx, total })
}

/// Producer side; clone freely across workers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Sender<()>,
}

impl ProgressReporter {
    /// Signal that one unit of work finished.
    pub fn done(&self) {
        if self.tx.send(()).is_err() {
            debug!("Progress consumer gone, token dropped");
        }
    }
}

/// Consumer side, not yet running.
#[derive(Debug)]
pub struct ProgressMonitor {
    rx: Receiver<()>,
    total: usize,
}

impl ProgressMonitor {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Start the consumer thread, logging each update.
    pub fn spawn(self) -> XpResult<ProgressHandle> {
        self.spawn_with(|_| {})
    }

    /// Start the consumer thread, also handing each update to `observer`.
    pub fn spawn_with<F>(self, observer: F) -> XpResult<ProgressHandle>
    where
        F: FnMut(ProgressUpdate) + Send + 'static,
    {
        let Self { rx, total } = self;
        let (abort_tx, abort_rx) = bounded(1);

        let join = thread::Builder::new()
            .name("xp-progress".to_string())
            .spawn(move || consume(rx, abort_rx, total, observer))?;

        Ok(ProgressHandle { abort_tx, join })
    }
}

/// Pops tokens until `total` arrived, every reporter is gone, or an abort.
fn consume<F>(rx: Receiver<()>, abort_rx: Receiver<()>, total: usize, mut observer: F) -> usize
where
    F: FnMut(ProgressUpdate),
{
    let mut completed = 0;
    report(&mut observer, completed, total);

    while completed < total {
        select! {
            recv(rx) -> token => match token {
                Ok(()) => {
                    completed += 1;
                    report(&mut observer, completed, total);
                }
                Err(_) => {
                    debug!(completed, total, "All progress reporters dropped");
                    break;
                }
            },
            recv(abort_rx) -> _ => {
                info!(completed, total, "Progress reporting aborted");
                break;
            }
        }
    }

    completed
}

fn report<F: FnMut(ProgressUpdate)>(observer: &mut F, completed: usize, total: usize) {
    info!("{} / {}", completed, total);
    observer(ProgressUpdate { completed, total });
}

/// Handle on a running consumer.
///
/// Dropping the handle without joining aborts the consumer.
#[derive(Debug)]
pub struct ProgressHandle {
    abort_tx: Sender<()>,
    join: JoinHandle<usize>,
}

impl ProgressHandle {
    /// Wait for the consumer to finish; returns the number of tokens consumed.
    pub fn join(self) -> XpResult<usize> {
        let Self { abort_tx, join } = self;
        let consumed = join
            .join()
            .map_err(|_| internal_error!("progress consumer panicked"));
        drop(abort_tx);
        consumed
    }

    /// Stop the consumer early; returns the number of tokens consumed so far.
    pub fn abort(self) -> XpResult<usize> {
        let _ = self.abort_tx.try_send(());
        self.join()
    }
}
