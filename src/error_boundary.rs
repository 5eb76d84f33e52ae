//! Catches failures of a unit of UI work and switches it to a fallback.

use crate::notifications::NotificationCenter;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ReloadHook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum Rendered<T> {
    Content(T),
    Fallback { message: String },
}

#[derive(Default)]
pub struct ErrorBoundary {
    error: Option<String>,
    on_error: Option<ErrorCallback>,
    on_reload: Option<ReloadHook>,
}

impl ErrorBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_reload(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reload = Some(Box::new(hook));
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Runs `work` unless the boundary already tripped. Panics and errors
    /// both trip it.
    pub fn run<T, E, F>(&mut self, work: F) -> Rendered<T>
    where
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(message) = &self.error {
            return Rendered::Fallback {
                message: message.clone(),
            };
        }

        let message = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => return Rendered::Content(value),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        error!(error = %message, "Error boundary caught a failure");

        if let Some(callback) = &self.on_error {
            callback(&message);
        }
        self.error = Some(message.clone());

        Rendered::Fallback { message }
    }

    /// Clears the error so the next `run` tries again.
    pub fn retry(&mut self) {
        self.error = None;
    }

    pub fn reload(&mut self) {
        self.error = None;
        if let Some(hook) = &self.on_reload {
            hook();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unexpected error".to_string()
    }
}

/// Runs one command body behind a fresh boundary. A failure or panic is
/// pushed to `notifications` under `title` and its message is returned.
pub fn guard_command<T, E, F>(
    notifications: &NotificationCenter,
    title: &str,
    work: F,
) -> Result<T, String>
where
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    match ErrorBoundary::new().run(work) {
        Rendered::Content(value) => Ok(value),
        Rendered::Fallback { message } => {
            notifications.error(title, &message);
            Err(message)
        }
    }
}
