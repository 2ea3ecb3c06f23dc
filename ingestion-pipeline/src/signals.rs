use tokio::sync::watch;

use common::error::AppError;

/// Sender half of a job's control signals, owned by the job manager.
///
/// Cancel is edge-triggered (one-shot teardown); pause is level-triggered
/// (the worker blocks while the level is high).
pub struct JobControls {
    cancel_tx: watch::Sender<bool>,
    pause_tx: watch::Sender<bool>,
}

/// Receiver half, polled by the ingestion worker at its checkpoints.
#[derive(Clone)]
pub struct JobSignals {
    cancel_rx: watch::Receiver<bool>,
    pause_rx: watch::Receiver<bool>,
}

pub fn channel() -> (JobControls, JobSignals) {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (pause_tx, pause_rx) = watch::channel(false);
    (
        JobControls {
            cancel_tx,
            pause_tx,
        },
        JobSignals {
            cancel_rx,
            pause_rx,
        },
    )
}

impl JobControls {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        // Unblock a paused worker so it can observe the cancel
        let _ = self.pause_tx.send(false);
    }

    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }
}

impl JobSignals {
    /// Checkpoint: returns `Err(Cancelled)` once cancel fires; blocks while
    /// paused, still honoring cancel during the pause.
    pub async fn check(&mut self) -> Result<(), AppError> {
        loop {
            if *self.cancel_rx.borrow() {
                return Err(AppError::Cancelled);
            }
            if !*self.pause_rx.borrow() {
                return Ok(());
            }

            tokio::select! {
                changed = self.pause_rx.changed() => {
                    if changed.is_err() {
                        // Controls dropped; treat as cancel
                        return Err(AppError::Cancelled);
                    }
                }
                changed = self.cancel_rx.changed() => {
                    if changed.is_err() {
                        return Err(AppError::Cancelled);
                    }
                }
            }
        }
    }

    /// Non-blocking probe used where a pause should not hold things up.
    pub fn cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn check_passes_when_idle() {
        let (_controls, mut signals) = channel();
        signals.check().await.expect("no signal set");
    }

    #[tokio::test]
    async fn cancel_is_edge_triggered() {
        let (controls, mut signals) = channel();
        controls.cancel();
        assert!(matches!(signals.check().await, Err(AppError::Cancelled)));
        assert!(signals.cancelled());
    }

    #[tokio::test]
    async fn pause_blocks_until_resume() {
        let (controls, mut signals) = channel();
        controls.pause();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), signals.check()).await;
        assert!(blocked.is_err(), "check must block while paused");

        controls.resume();
        tokio::time::timeout(Duration::from_millis(200), signals.check())
            .await
            .expect("resume unblocks")
            .expect("no cancel");
    }

    #[tokio::test]
    async fn cancel_unblocks_a_paused_worker() {
        let (controls, mut signals) = channel();
        controls.pause();

        let handle = tokio::spawn(async move { signals.check().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        controls.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("worker unblocked")
            .expect("join");
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
