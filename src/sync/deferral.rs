use std::sync::{Arc, RwLock};
use tracing::warn;
use crate::error::TransportError;
use crate::sync::counting_gate::CountingGate;


#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EventOutcome<T> {
    Success(T),
    Failed(TransportError),
    Cancelled,
}

/// A one-shot notification that is 'fully handled' only after every handler that took a
///  [Deferral] released it.
///
/// The pending count starts at 1 for the publisher's own slot, so handlers that take a deferral
///  while being invoked can not race with a publisher that has no handlers at all.
pub struct DeferredEvent<T> {
    outcome: EventOutcome<T>,
    pending: Arc<CountingGate>,
}

impl <T> DeferredEvent<T> {
    pub fn new(outcome: EventOutcome<T>) -> DeferredEvent<T> {
        DeferredEvent {
            outcome,
            pending: Arc::new(CountingGate::new(1)),
        }
    }

    pub fn success(payload: T) -> DeferredEvent<T> {
        Self::new(EventOutcome::Success(payload))
    }

    pub fn failed(error: TransportError) -> DeferredEvent<T> {
        Self::new(EventOutcome::Failed(error))
    }

    pub fn cancelled() -> DeferredEvent<T> {
        Self::new(EventOutcome::Cancelled)
    }

    pub fn outcome(&self) -> &EventOutcome<T> {
        &self.outcome
    }

    pub fn payload(&self) -> Option<&T> {
        match &self.outcome {
            EventOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TransportError> {
        match &self.outcome {
            EventOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, EventOutcome::Cancelled)
    }

    /// number of outstanding deferrals, including the publisher's own
    pub fn pending(&self) -> usize {
        self.pending.current_count()
    }

    /// Handlers call this while being invoked and release the returned [Deferral] when their
    ///  (possibly asynchronous) handling is done.
    pub fn take_deferral(&self) -> Deferral {
        match self.pending.increment() {
            Ok(()) => Deferral { gate: Some(self.pending.clone()) },
            Err(_) => {
                warn!("deferral taken after the event was fully handled - ignoring");
                Deferral { gate: None }
            }
        }
    }

    /// Releases the publisher's slot and waits for all outstanding deferrals
    pub async fn signal_and_wait(self) {
        if let Err(e) = self.pending.decrement() {
            warn!("releasing the publisher's deferral failed: {}", e);
        }
        self.pending.wait().await;
    }
}

/// Releasing is idempotent, and dropping an unreleased deferral releases it
pub struct Deferral {
    gate: Option<Arc<CountingGate>>,
}

impl Deferral {
    pub fn release(&mut self) {
        if let Some(gate) = self.gate.take() {
            if let Err(e) = gate.decrement() {
                warn!("releasing deferral failed: {}", e);
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.gate.is_none()
    }
}

impl Drop for Deferral {
    fn drop(&mut self) {
        self.release();
    }
}


pub type EventHandler<T> = Arc<dyn Fn(&DeferredEvent<T>) + Send + Sync>;

/// A list of handlers for one kind of [DeferredEvent]. Publishing invokes all handlers
///  synchronously and then waits until every deferral they took is released.
pub struct EventHandlers<T> {
    handlers: RwLock<Vec<EventHandler<T>>>,
}

impl <T> Default for EventHandlers<T> {
    fn default() -> Self {
        EventHandlers {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl <T> EventHandlers<T> {
    pub fn subscribe(&self, handler: impl Fn(&DeferredEvent<T>) + Send + Sync + 'static) {
        self.handlers.write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn publish(&self, outcome: EventOutcome<T>) {
        // handlers may subscribe further handlers, so they are not called while holding the lock
        let handlers = self.handlers.read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let event = DeferredEvent::new(outcome);
        for handler in handlers {
            handler(&event);
        }
        event.signal_and_wait().await;
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;
    use super::*;

    #[tokio::test]
    async fn test_no_handlers_completes_immediately() {
        let handlers = EventHandlers::<u32>::default();
        handlers.publish(EventOutcome::Success(1)).await;

        DeferredEvent::<u32>::cancelled().signal_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_deferrals_need_two_releases() {
        let event = DeferredEvent::success("a");
        let mut d1 = event.take_deferral();
        let mut d2 = event.take_deferral();
        assert_eq!(event.pending(), 3);

        let waiter = tokio::spawn(event.signal_and_wait());

        d1.release();
        d1.release();
        sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        d2.release();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_deferral_is_released() {
        let event = DeferredEvent::<()>::failed(TransportError::StreamEnded);
        assert_eq!(event.error(), Some(&TransportError::StreamEnded));
        let deferral = event.take_deferral();
        drop(deferral);
        assert_eq!(event.pending(), 1);
        event.signal_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_waits_for_async_handlers() {
        let handlers = EventHandlers::<u32>::default();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            handlers.subscribe(move |evt| {
                let mut deferral = evt.take_deferral();
                let done = done.clone();
                let payload = *evt.payload().unwrap();
                tokio::spawn(async move {
                    sleep(Duration::from_millis(50)).await;
                    done.fetch_add(payload as usize, Ordering::SeqCst);
                    deferral.release();
                });
            });
        }
        assert_eq!(handlers.len(), 3);

        handlers.publish(EventOutcome::Success(2)).await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_handlers_see_outcome() {
        let handlers = EventHandlers::<String>::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            handlers.subscribe(move |evt| {
                let s = match evt.outcome() {
                    EventOutcome::Success(s) => s.clone(),
                    EventOutcome::Failed(e) => e.to_string(),
                    EventOutcome::Cancelled => "cancelled".to_string(),
                };
                seen.lock().unwrap().push(s);
            });
        }

        handlers.publish(EventOutcome::Success("hi".to_string())).await;
        handlers.publish(EventOutcome::Failed(TransportError::InvalidMessage("x".to_string()))).await;
        handlers.publish(EventOutcome::Cancelled).await;

        assert_eq!(*seen.lock().unwrap(), vec![
            "hi".to_string(),
            "invalid message: x".to_string(),
            "cancelled".to_string(),
        ]);
    }
}
