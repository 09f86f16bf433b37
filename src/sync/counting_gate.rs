use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::watch;


#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum GateError {
    #[error("the gate is already drained")]
    Drained,
    #[error("decrement below zero")]
    Underflow,
}

/// A counter that releases all waiters once it reaches zero. Reaching zero is final: the gate can
///  not be incremented again afterwards, and [CountingGate::wait] returns immediately from then on.
pub struct CountingGate {
    count: AtomicUsize,
    released: watch::Sender<bool>,
}

impl CountingGate {
    pub fn new(initial: usize) -> CountingGate {
        let (released, _) = watch::channel(initial == 0);
        CountingGate {
            count: AtomicUsize::new(initial),
            released,
        }
    }

    pub fn increment(&self) -> Result<(), GateError> {
        self.count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            if c == 0 { None } else { Some(c + 1) }
        })
            .map(|_| ())
            .map_err(|_| GateError::Drained)
    }

    pub fn decrement(&self) -> Result<(), GateError> {
        let prev = self.count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .map_err(|_| GateError::Underflow)?;
        if prev == 1 {
            self.released.send_replace(true);
        }
        Ok(())
    }

    pub fn current_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    pub async fn wait(&self) {
        let mut receiver = self.released.subscribe();
        // the sender is owned by self, so the channel can not be closed while we wait
        let _ = receiver.wait_for(|released| *released).await;
    }
}
