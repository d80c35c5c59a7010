use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Latched, clonable cancellation flag shared by the run-loop and its input
/// channels. Once triggered it stays triggered for the rest of the session.
#[derive(Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the interrupt has been triggered.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Trigger on Ctrl-C. The listener fires once and then exits.
    pub fn listen_for_ctrl_c(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    debug!("Ctrl-C received");
                    this.trigger();
                }
                Err(e) => warn!("Failed to install Ctrl-C handler: {e}"),
            }
        })
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
