//! Single-use hand-off slot for the downstream handler's response.
//!
//! The handler produces exactly one response per upload, but the HTTP
//! transaction that should carry it may not be attached when the handler
//! returns. The slot decouples the two: the handler task `set`s, and
//! whichever transaction is entitled to the response `take`s — immediately
//! if it is already waiting, or later from an append or offset-retrieval.

use std::sync::Mutex;

use tokio::sync::Notify;

enum SlotState<T> {
    Empty,
    Ready(T),
    /// Taken, or closed before a value arrived. Either way nothing more
    /// will come out.
    Spent,
}

pub struct ResponseSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> ResponseSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store the value. Fails (returning the value) if the slot was already
    /// filled or closed — e.g. the upload was cancelled while the handler
    /// was still running.
    pub fn set(&self, value: T) -> Result<(), T> {
        let mut state = self.lock();
        match *state {
            SlotState::Empty => {
                *state = SlotState::Ready(value);
                drop(state);
                self.notify.notify_waiters();
                Ok(())
            }
            _ => Err(value),
        }
    }

    /// Close the slot: waiters wake with `None` and later `set`s fail.
    /// Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        if matches!(*state, SlotState::Empty) {
            *state = SlotState::Spent;
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Take the value if one is ready, without waiting.
    pub fn try_take(&self) -> Option<T> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SlotState::Spent) {
            SlotState::Ready(value) => Some(value),
            SlotState::Empty => {
                *state = SlotState::Empty;
                None
            }
            SlotState::Spent => None,
        }
    }

    /// Whether a value is ready to be taken.
    pub fn is_ready(&self) -> bool {
        matches!(
            *self.lock(),
            SlotState::Ready(_)
        )
    }

    /// Wait until the slot is filled or closed, then take. Returns `None`
    /// only if the slot was closed (or a racing taker got there first).
    pub async fn take(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                match std::mem::replace(&mut *state, SlotState::Spent) {
                    SlotState::Ready(value) => return Some(value),
                    SlotState::Spent => return None,
                    SlotState::Empty => {
                        *state = SlotState::Empty;
                    }
                }
            }
            notified.await;
        }
    }
}

impl<T> Default for ResponseSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
