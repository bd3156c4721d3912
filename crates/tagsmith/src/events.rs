// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error listeners.
//!
//! Failures never cross the public API as panics. They are turned into a
//! [`TemplateError`] and handed to every listener registered for
//! [`EventKind::Error`], synchronously, at the point of failure.

use crate::error::TemplateError;
use crate::settings::Mode;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Event types a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A compile, render or resolution failure.
    Error,
}

/// Handle returned by [`Reporter::on`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A registered error handler.
pub type Listener = Arc<dyn Fn(&TemplateError) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next: u64,
    entries: Vec<(ListenerId, EventKind, Listener)>,
}

/// Shared listener registry.
///
/// Clones share the same registry, so a renderer built earlier still reaches
/// listeners added later.
#[derive(Clone, Default)]
pub struct Reporter {
    listeners: Arc<Mutex<Listeners>>,
}

impl Reporter {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&TemplateError) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.next += 1;
        let id = ListenerId(listeners.next);
        listeners.entries.push((id, kind, Arc::new(handler)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _, _)| *entry != id);
        listeners.entries.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .map(|l| l.entries.len())
            .unwrap_or_default()
    }

    /// Returns `true` if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `error` to every error listener.
    ///
    /// Outside [`Mode::Unit`] the error is also logged.
    pub fn emit(&self, error: &TemplateError, mode: Mode) {
        if mode != Mode::Unit {
            tracing::error!(kind = error.kind(), "{}", error);
        }

        // Handlers may add or remove listeners, so call them unlocked
        let handlers: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners
                .entries
                .iter()
                .filter(|(_, kind, _)| *kind == EventKind::Error)
                .map(|(_, _, handler)| handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(error);
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> TemplateError {
        TemplateError::MissingTemplate {
            name: "nav".to_string(),
        }
    }

    #[test]
    fn test_listeners_receive_errors() {
        let reporter = Reporter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        reporter.on(EventKind::Error, move |err| {
            assert_eq!(err.kind(), "missing-template");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reporter.emit(&sample(), Mode::Unit);
        reporter.clone().emit(&sample(), Mode::Unit);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let reporter = Reporter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let a = seen.clone();
        let b = seen.clone();
        let first = reporter.on(EventKind::Error, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        reporter.on(EventKind::Error, move |_| {
            b.fetch_add(10, Ordering::SeqCst);
        });

        assert!(reporter.off(first));
        assert!(!reporter.off(first));
        reporter.emit(&sample(), Mode::Unit);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_handler_may_register_listeners() {
        let reporter = Reporter::new();
        let inner = reporter.clone();
        reporter.on(EventKind::Error, move |_| {
            inner.on(EventKind::Error, |_| {});
        });
        reporter.emit(&sample(), Mode::Unit);
        assert_eq!(reporter.len(), 2);
    }
}
