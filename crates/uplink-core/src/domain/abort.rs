//! Abort handle for in-flight transfers.
//!
//! `AbortHandle` を drop しても中断にはならない（明示的な `abort()` のみ）。

use tokio::sync::watch;

/// Caller side: flips the signal once.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// Transport side: observed while the transfer is running.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl AbortHandle {
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, AbortSignal { rx: Some(rx) })
    }

    pub fn abort(&self) {
        // receivers may already be gone; send_replace never fails
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once `abort()` is called. Pends forever if the handle is
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        let fired = match self.rx.as_mut() {
            Some(rx) => rx.wait_for(|aborted| *aborted).await.is_ok(),
            None => false,
        };
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::never()
    }
}
