//! Async driver for the kind engine
//!
//! Runs [`KindEngine::tick`] on a tokio task: after each tick it sleeps
//! until the scheduler's next deadline, or until the host wakes it after
//! queueing new notifications. Use it with [`TokioClock`] so the engine
//! and the sleeps agree on time.
//!
//! [`TokioClock`]: crate::scheduler::TokioClock

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::diagram::DiagramModel;
use crate::engine::KindEngine;

/// Engine shared between the host and the driver task
pub type SharedEngine<M> = Arc<Mutex<KindEngine<M>>>;

/// Handle to a running driver
pub struct DriverHandle {
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Tell the driver new notifications are waiting
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the driver and wait for it to exit
    pub async fn shutdown(self) {
        if let Err(e) = self.shutdown.send(true) {
            log::debug!("Kind engine driver already stopped: {}", e);
        }
        if let Err(e) = self.task.await {
            log::warn!("Kind engine driver ended abnormally: {}", e);
        }
    }
}

/// Spawn the driver on the current tokio runtime
pub fn spawn_driver<M>(engine: SharedEngine<M>) -> DriverHandle
where
    M: DiagramModel + Send + 'static,
{
    let wake = Arc::new(Notify::new());
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run(engine, wake.clone(), shutdown_rx));
    DriverHandle {
        wake,
        shutdown,
        task,
    }
}

async fn run<M: DiagramModel>(
    engine: SharedEngine<M>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::debug!("Kind engine driver started");
    loop {
        let deadline = {
            let mut engine = engine.lock();
            let report = engine.tick();
            if !report.is_empty() {
                log::debug!(
                    "Reconciled {} connections ({} failed)",
                    report.outcomes.len(),
                    report.failures.len()
                );
            }
            engine.next_deadline()
        };

        let sleep = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sleep => {}
            _ = wake.notified() => {}
            _ = shutdown.changed() => break,
        }
    }
    log::debug!("Kind engine driver stopped");
}
