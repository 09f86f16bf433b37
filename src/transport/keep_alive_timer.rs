use std::sync::Mutex;
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BusyReason {
    Reading,
    Writing,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimerState {
    /// no I/O in progress, the timer fires at `deadline` unless there is activity before that
    Idle { deadline: Instant },
    Busy,
    Closed,
}

#[derive(Default)]
struct Activity {
    reading: bool,
    writing: bool,
    closed: bool,
}

/// Idle detection for a single connection. Reads and writes mark the timer busy for their
///  duration, and the end of the last concurrent activity rearms it with a fresh deadline. The
///  timer only expires while it stays idle for the full timeout.
pub struct KeepAliveTimer {
    timeout: Duration,
    activity: Mutex<Activity>,
    state: watch::Sender<TimerState>,
}

impl KeepAliveTimer {
    /// the timer starts armed
    pub fn new(timeout: Duration) -> KeepAliveTimer {
        let (state, _) = watch::channel(TimerState::Idle { deadline: Instant::now() + timeout });
        KeepAliveTimer {
            timeout,
            activity: Default::default(),
            state,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> TimerState {
        *self.state.borrow()
    }

    pub fn begin(&self, reason: BusyReason) {
        let mut activity = self.activity.lock()
            .unwrap_or_else(|e| e.into_inner());
        if activity.closed {
            return;
        }
        match reason {
            BusyReason::Reading => activity.reading = true,
            BusyReason::Writing => activity.writing = true,
        }
        self.state.send_replace(TimerState::Busy);
    }

    /// Rearms the timer if this ends the last activity in progress. Ending an activity that was
    ///  not begun has no effect.
    pub fn end(&self, reason: BusyReason) {
        let mut activity = self.activity.lock()
            .unwrap_or_else(|e| e.into_inner());
        if activity.closed {
            return;
        }
        let flag = match reason {
            BusyReason::Reading => &mut activity.reading,
            BusyReason::Writing => &mut activity.writing,
        };
        if !*flag {
            return;
        }
        *flag = false;

        if !activity.reading && !activity.writing {
            self.state.send_replace(TimerState::Idle { deadline: Instant::now() + self.timeout });
        }
    }

    /// returns `true` for the call that actually closed the timer
    pub fn close(&self) -> bool {
        let mut activity = self.activity.lock()
            .unwrap_or_else(|e| e.into_inner());
        if activity.closed {
            return false;
        }
        activity.closed = true;
        self.state.send_replace(TimerState::Closed);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TimerState::Closed
    }

    /// Waits until the timer fires (`true`) or is closed (`false`). The timer is not rearmed by
    ///  firing: it stays expired until the next activity begins and ends.
    pub async fn expired(&self) -> bool {
        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                TimerState::Closed => return false,
                TimerState::Busy => {
                    if state.changed().await.is_err() {
                        return false;
                    }
                }
                TimerState::Idle { deadline } => {
                    select! {
                        _ = sleep_until(deadline) => {
                            if *state.borrow() == current {
                                return true;
                            }
                        }
                        r = state.changed() => {
                            if r.is_err() {
                                return false;
                            }
                        }
                    }
                }
            }
        }
    }
}
