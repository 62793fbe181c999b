use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::aggregator::{RankingAggregator, RefreshOutcome};
use crate::error::RankingError;
use crate::model::RankingSnapshot;

/// Handle for the hub. Reads never wait on a background refresh.
#[derive(Clone)]
pub struct RankingService {
    aggregator: Arc<RankingAggregator>,
    refresh_tx: mpsc::Sender<()>,
}

impl RankingService {
    pub fn aggregator(&self) -> &Arc<RankingAggregator> {
        &self.aggregator
    }

    /// Vrátí uložený snapshot hned; starý → refresh na pozadí.
    pub async fn snapshot(&self) -> Result<RankingSnapshot, RankingError> {
        let (snapshot, stale) = self.aggregator.current().await?;
        if stale {
            info!("ranking snapshot from {} is stale, refreshing in background", snapshot.generated_at);
            self.request_refresh();
        }
        Ok(snapshot)
    }

    pub async fn force_refresh(&self) -> Result<RankingSnapshot, RankingError> {
        self.aggregator.force_refresh().await
    }

    /// Returns false when a request is already queued.
    pub fn request_refresh(&self) -> bool {
        match self.refresh_tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("ranking refresh already queued");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                error!("ranking worker is gone, refresh dropped");
                false
            }
        }
    }
}

/// Spawn the background refresh worker. Failed runs come out on the error channel.
pub fn spawn_refresh_worker(
    aggregator: Arc<RankingAggregator>,
) -> (RankingService, mpsc::Receiver<RankingError>) {
    let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(1);
    let (err_tx, err_rx) = mpsc::channel::<RankingError>(16);

    let worker = Arc::clone(&aggregator);
    tokio::spawn(async move {
        while refresh_rx.recv().await.is_some() {
            match worker.refresh(false).await {
                Ok(RefreshOutcome::Rebuilt(summary)) => {
                    debug!("background ranking refresh done: {} clubs", summary.clubs);
                }
                Ok(outcome) => debug!("background ranking refresh: {:?}", outcome),
                Err(e) => {
                    error!("background ranking refresh failed: {}", e);
                    let _ = err_tx.try_send(e);
                }
            }
        }
        debug!("ranking worker stopped");
    });

    (RankingService { aggregator, refresh_tx }, err_rx)
}
