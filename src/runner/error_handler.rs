//! Process-wide error handling installed around a run.
//!
//! The runner registers a temporary handler before the container exists and
//! swaps in the container's handler once it is built.

use std::backtrace::Backtrace;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};

pub trait ErrorHandler: Send + Sync {
    fn register(&self, debug: bool);

    fn unregister(&self);

    fn is_registered(&self) -> bool;
}

/// Routes panics to `tracing` through the process panic hook.
#[derive(Debug)]
pub struct PanicHookErrorHandler {
    name: &'static str,
    registered: AtomicBool,
}

impl PanicHookErrorHandler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registered: AtomicBool::new(false),
        }
    }

    /// Handler used before the container is available.
    pub fn temporary() -> Self {
        Self::new("temporary")
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Default for PanicHookErrorHandler {
    fn default() -> Self {
        Self::new("application")
    }
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl ErrorHandler for PanicHookErrorHandler {
    fn register(&self, debug: bool) {
        let handler = self.name;
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_default();
            if debug {
                tracing::error!(
                    handler,
                    location = %location,
                    backtrace = %Backtrace::force_capture(),
                    "Panic: {}",
                    panic_message(info)
                );
            } else {
                tracing::error!(handler, location = %location, "Panic: {}", panic_message(info));
            }
        }));
        self.registered.store(true, Ordering::SeqCst);
        let with_backtrace = debug;
        tracing::debug!(handler, with_backtrace, "Error handler registered");
    }

    fn unregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            // Restores the default hook.
            drop(panic::take_hook());
            tracing::debug!(handler = self.name, "Error handler unregistered");
        }
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}
