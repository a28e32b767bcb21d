/*
 * completion.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! A single-assignment, shareable, cancellable result handle.
//!
//! `Completion<T>` is the public return type of both session creation and every
//! command execution. The engine resolves it exactly once from whichever thread owns
//! the socket; callers wait on it from any thread, blocking or with a timeout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Error, ErrorKind};

enum State<T> {
    Pending,
    Value(T),
    Error(Error),
    Cancelled,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// A shared, single-assignment future. Clones refer to the same underlying state;
/// any clone can be waited on, and only the first resolution among `set_value`,
/// `set_error`, or `cancel` has effect.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Completion { inner: self.inner.clone() }
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Completion {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending),
                notify: Notify::new(),
            }),
        }
    }

    fn resolve(&self, new_state: State<T>) {
        let mut guard = self.inner.state.lock().unwrap();
        if matches!(*guard, State::Pending) {
            *guard = new_state;
            drop(guard);
            self.inner.notify.notify_waiters();
        }
    }

    /// Resolve with a value. A no-op if already resolved.
    pub fn set_value(&self, value: T) {
        self.resolve(State::Value(value));
    }

    /// Resolve with an error. A no-op if already resolved.
    pub fn set_error(&self, error: Error) {
        self.resolve(State::Error(error));
    }

    /// Resolve with `Cancelled`. Returns whether this call was the one that resolved
    /// it (`true`) or it was already resolved (`false`).
    pub fn cancel(&self) -> bool {
        let mut guard = self.inner.state.lock().unwrap();
        if matches!(*guard, State::Pending) {
            *guard = State::Cancelled;
            drop(guard);
            self.inner.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.inner.state.lock().unwrap(), State::Pending)
    }

    /// Block (asynchronously) until resolved, returning the value or re-raising the
    /// error. A cancelled completion re-raises `ErrorKind::Cancelled`.
    pub async fn wait(&self) -> Result<T, Error>
    where
        T: Clone,
    {
        loop {
            // Register interest in the next notification *before* checking state: a
            // `Notified` created after the check could miss a `resolve()` that lands
            // in between, leaving this call waiting on a wakeup that already happened.
            let notified = self.inner.notify.notified();
            {
                let guard = self.inner.state.lock().unwrap();
                match &*guard {
                    State::Pending => {}
                    State::Value(v) => return Ok(v.clone()),
                    State::Error(e) => return Err(clone_error(e)),
                    State::Cancelled => return Err(Error::new(ErrorKind::Cancelled)),
                }
            }
            notified.await;
        }
    }

    /// As `wait`, but fails with `ErrorKind::Timeout` if not resolved within `timeout`.
    pub async fn wait_for(&self, timeout: Duration) -> Result<T, Error>
    where
        T: Clone,
    {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(Error::new(ErrorKind::Timeout)),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `Error` intentionally has no derived `Clone` (it may carry a boxed source); a
/// completion that has already failed still needs to hand that failure to every
/// waiter, so reconstruct an equivalent `Error` without the original source chain.
fn clone_error(e: &Error) -> Error {
    let mut clone = Error::new(e.kind);
    if let Some(id) = e.session_id {
        clone = clone.with_session(id, e.session_context.as_deref());
    }
    if let Some(msg) = &e.message {
        clone = clone.with_message(msg.clone());
    }
    clone
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_with_value() {
        let c: Completion<i32> = Completion::new();
        c.set_value(42);
        assert_eq!(c.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn resolves_with_error() {
        let c: Completion<i32> = Completion::new();
        c.set_error(Error::new(ErrorKind::ChannelTimeout));
        let err = c.wait().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChannelTimeout);
    }

    #[tokio::test]
    async fn second_set_value_is_a_no_op() {
        let c: Completion<i32> = Completion::new();
        c.set_value(1);
        c.set_value(2);
        assert_eq!(c.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_reports_whether_it_won_the_race() {
        let c: Completion<i32> = Completion::new();
        assert!(c.cancel());
        assert!(!c.cancel());
        assert_eq!(c.wait().await.unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn wait_for_times_out_when_never_resolved() {
        let c: Completion<i32> = Completion::new();
        let err = c.wait_for(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn clone_shares_the_same_state() {
        let c: Completion<i32> = Completion::new();
        let c2 = c.clone();
        c2.set_value(7);
        assert_eq!(c.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn multiple_waiters_are_all_woken() {
        let c: Completion<i32> = Completion::new();
        let c1 = c.clone();
        let c2 = c.clone();
        let h1 = tokio::spawn(async move { c1.wait().await });
        let h2 = tokio::spawn(async move { c2.wait().await });
        tokio::task::yield_now().await;
        c.set_value(9);
        assert_eq!(h1.await.unwrap().unwrap(), 9);
        assert_eq!(h2.await.unwrap().unwrap(), 9);
    }
}
