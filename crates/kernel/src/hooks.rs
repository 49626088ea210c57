//! Lifecycle hooks fired around saves and rollbacks.
//!
//! A hook that returns an error or panics is logged and skipped. It never
//! changes the outcome of the operation that fired it.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use revlog_common::TimelineKey;
use revlog_persist::{Content, HistoryEntry, Snapshot};
use serde::{Deserialize, Serialize};

/// Points in the save/rollback lifecycle that hooks can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    BeforeSave,
    AfterSave,
    BeforeRollback,
    AfterRollback,
}

impl HookEvent {
    pub const ALL: [HookEvent; 4] = [
        Self::BeforeSave,
        Self::AfterSave,
        Self::BeforeRollback,
        Self::AfterRollback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeSave => "before_save",
            Self::AfterSave => "after_save",
            Self::BeforeRollback => "before_rollback",
            Self::AfterRollback => "after_rollback",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only data handed to hooks.
#[derive(Debug, Clone, Copy)]
pub enum HookPayload<'a> {
    BeforeSave {
        key: &'a TimelineKey,
        content: &'a Content,
    },
    AfterSave {
        entry: &'a HistoryEntry,
        snapshot: &'a Snapshot,
    },
    BeforeRollback {
        key: &'a TimelineKey,
        target_version: u64,
    },
    AfterRollback {
        entry: &'a HistoryEntry,
        target_version: u64,
    },
}

impl HookPayload<'_> {
    pub fn event(&self) -> HookEvent {
        match self {
            Self::BeforeSave { .. } => HookEvent::BeforeSave,
            Self::AfterSave { .. } => HookEvent::AfterSave,
            Self::BeforeRollback { .. } => HookEvent::BeforeRollback,
            Self::AfterRollback { .. } => HookEvent::AfterRollback,
        }
    }
}

/// Failure reported by a hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A subscriber to lifecycle events.
pub trait Hook: Send + Sync {
    fn call(&self, payload: &HookPayload<'_>) -> Result<(), HookError>;
}

impl<F> Hook for F
where
    F: Fn(&HookPayload<'_>) -> Result<(), HookError> + Send + Sync,
{
    fn call(&self, payload: &HookPayload<'_>) -> Result<(), HookError> {
        self(payload)
    }
}

/// Per-event hook lists, invoked in registration order.
#[derive(Default)]
pub struct HookDispatcher {
    slots: [RwLock<Vec<Arc<dyn Hook>>>; 4],
}

impl fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for event in HookEvent::ALL {
            map.entry(&event.as_str(), &self.hook_count(event));
        }
        map.finish()
    }
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for `event`.
    pub fn register<F>(&self, event: HookEvent, hook: F)
    where
        F: Fn(&HookPayload<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register_hook(event, Arc::new(hook));
    }

    pub fn register_hook(&self, event: HookEvent, hook: Arc<dyn Hook>) {
        self.slots[event.slot()].write().push(hook);
    }

    pub fn hook_count(&self, event: HookEvent) -> usize {
        self.slots[event.slot()].read().len()
    }

    /// Invoke every hook registered for the payload's event. Returns how many
    /// of them failed.
    pub fn dispatch(&self, payload: &HookPayload<'_>) -> usize {
        let event = payload.event();
        // Snapshot the list so hooks may register further hooks.
        let hooks: Vec<Arc<dyn Hook>> = self.slots[event.slot()].read().clone();

        let mut failures = 0;
        for (index, hook) in hooks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| hook.call(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    tracing::warn!(event = event.as_str(), hook = index, error = %err, "hook failed");
                }
                Err(panic) => {
                    failures += 1;
                    tracing::warn!(
                        event = event.as_str(),
                        hook = index,
                        panic = panic_message(&*panic),
                        "hook panicked"
                    );
                }
            }
        }
        failures
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}
