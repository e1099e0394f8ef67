use super::lrp::{ConvergenceResult, LrpConvergence};
use super::task::{TaskConvergence, TaskConvergenceResult};
use crate::config::ConvergerConfig;
use crate::core::clock::as_millis_u64;
use crate::core::{DbError, Result};
use crate::models::CellSet;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// Source of the registered cells for each round.
#[async_trait]
pub trait CellRegistry: Send + Sync {
    async fn cells(&self) -> Result<CellSet>;
}

/// Receives sweep results: the auctioneer and event hub sit behind this.
#[async_trait]
pub trait ConvergenceListener: Send + Sync {
    async fn lrps_converged(&self, result: ConvergenceResult);

    async fn tasks_converged(&self, result: TaskConvergenceResult);
}

/// Drives both sweeps against one store.
pub struct Converger<D> {
    db: D,
    cells: Arc<dyn CellRegistry>,
    listener: Arc<dyn ConvergenceListener>,
    config: ConvergerConfig,
}

impl<D> Converger<D>
where
    D: LrpConvergence + TaskConvergence + Send + Sync + 'static,
{
    pub fn new(
        db: D,
        cells: Arc<dyn CellRegistry>,
        listener: Arc<dyn ConvergenceListener>,
        config: ConvergerConfig,
    ) -> Self {
        Self {
            db,
            cells,
            listener,
            config,
        }
    }

    /// One round. Skipped, returning false, when the cell registry is
    /// unreachable: converging against an empty set would fail every task.
    pub async fn converge_once(&self) -> bool {
        let cells = match self.cells.cells().await {
            Ok(cells) => cells,
            Err(err) => {
                event!(Level::ERROR, error = %err, "failed-fetching-cells");
                return false;
            }
        };

        let (lrps, tasks) = futures::join!(
            self.db.converge_lrps(&cells, &self.config.lrp),
            self.db.converge_tasks(&cells, &self.config.task),
        );
        futures::join!(
            self.listener.lrps_converged(lrps),
            self.listener.tasks_converged(tasks),
        );
        true
    }

    /// Runs rounds every `interval` until the returned handle is stopped.
    pub fn spawn(self) -> ConvergerTask {
        let interval = self.config.interval_duration().max(Duration::from_millis(10));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let join_handle = tokio::spawn(async move {
            event!(Level::INFO, interval_ms = as_millis_u64(interval), "converger-started");
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        break;
                    }
                    _ = sleep(interval) => {
                        self.converge_once().await;
                    }
                }
            }
            event!(Level::INFO, "converger-stopped");
        });

        ConvergerTask {
            stop_tx,
            join_handle: Some(join_handle),
        }
    }
}

/// Handle to a spawned converger loop.
pub struct ConvergerTask {
    stop_tx: watch::Sender<bool>,
    join_handle: Option<JoinHandle<()>>,
}

impl ConvergerTask {
    /// Signals the loop to stop and waits for the current round to finish.
    pub async fn stop(mut self) -> Result<()> {
        let _ = self.stop_tx.send(true);
        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| DbError::Unknown(format!("converger join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for ConvergerTask {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
