use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};


/// A mutual exclusion gate that can be waited for asynchronously. The [GateToken] handed out by
///  [AsyncGate::acquire] owns the gate until it is released or dropped, and it is not tied to the
///  acquiring task: it can be moved to another task and released there.
///
/// Waiters are served in FIFO order.
pub struct AsyncGate<T> {
    inner: Arc<Mutex<T>>,
}

impl <T> Clone for AsyncGate<T> {
    fn clone(&self) -> Self {
        AsyncGate {
            inner: self.inner.clone(),
        }
    }
}

impl <T: Default> Default for AsyncGate<T> {
    fn default() -> Self {
        AsyncGate::new(T::default())
    }
}

impl <T> AsyncGate<T> {
    pub fn new(value: T) -> AsyncGate<T> {
        AsyncGate {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    pub async fn acquire(&self) -> GateToken<T> {
        GateToken {
            guard: Some(self.inner.clone().lock_owned().await),
        }
    }

    pub fn try_acquire(&self) -> Option<GateToken<T>> {
        self.inner.clone().try_lock_owned()
            .ok()
            .map(|guard| GateToken { guard: Some(guard) })
    }
}

pub struct GateToken<T> {
    guard: Option<OwnedMutexGuard<T>>,
}

impl <T> GateToken<T> {
    /// access to the protected value, `None` after the token was released
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.guard.as_deref_mut()
    }

    /// Releasing is idempotent, only the first call actually frees the gate.
    pub fn release(&mut self) {
        self.guard.take();
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use super::*;

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let gate = AsyncGate::new(0usize);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                let mut token = gate.acquire().await;
                let value = *token.get_mut().unwrap();
                tokio::task::yield_now().await;
                *token.get_mut().unwrap() = value + 1;
                token.release();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut token = gate.acquire().await;
        assert_eq!(*token.get_mut().unwrap(), 50);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let gate = AsyncGate::new(());
        let mut token = gate.acquire().await;
        assert!(gate.try_acquire().is_none());

        token.release();
        assert!(token.is_released());
        assert!(token.get_mut().is_none());
        token.release();

        let mut second = gate.try_acquire().unwrap();
        // releasing the first token again must not free the gate held by the second
        token.release();
        assert!(gate.try_acquire().is_none());
        second.release();
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_from_other_task() {
        let gate = AsyncGate::new(());
        let mut token = gate.acquire().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _token = gate.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tokio::spawn(async move {
            token.release();
        }).await.unwrap();

        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let gate = AsyncGate::new(());
        {
            let _token = gate.acquire().await;
            assert!(gate.try_acquire().is_none());
        }
        assert!(gate.try_acquire().is_some());
    }
}
