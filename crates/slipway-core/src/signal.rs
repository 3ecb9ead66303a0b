//! Cooperative abort signalling between the scheduler and strategies.
//!
//! Aborting never kills in-flight runtime calls; strategies check the
//! signal between phases and stop at the next boundary.

use tokio::sync::watch;

use crate::error::{SlipwayError, SlipwayResult};

/// Sender half, held by the scheduler for each active order.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<Option<String>>,
}

/// Receiver half, handed to the strategy executing the order.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<String>>,
}

impl AbortHandle {
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, AbortSignal { rx })
    }

    /// Request an abort. Later requests keep the first reason.
    pub fn abort(&self, reason: &str) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.to_string());
            true
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolves once an abort is requested; pends forever if the handle
    /// is dropped without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|reason| reason.is_some()).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Return `Aborted` if an abort was requested before `stage`.
    pub fn check(&self, stage: &str) -> SlipwayResult<()> {
        match self.reason() {
            Some(reason) => Err(SlipwayError::Aborted(format!("{reason} (before {stage})"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_observes_abort() {
        let (handle, signal) = AbortHandle::new();
        assert!(signal.check("warmup").is_ok());

        handle.abort("operator cancelled");
        handle.abort("second reason ignored");
        assert!(handle.is_aborted());

        let err = signal.check("warmup").unwrap_err();
        assert!(matches!(err, SlipwayError::Aborted(ref m) if m.contains("operator cancelled")));
    }

    #[test]
    fn never_signal_stays_clear() {
        let signal = AbortSignal::never();
        assert!(signal.reason().is_none());
        assert!(signal.check("deploy").is_ok());
    }
}
