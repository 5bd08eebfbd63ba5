//! Invocation contract between the session and a compression engine.
//!
//! An engine receives a [`CompressionRequest`] and a set of
//! [`EngineCallbacks`]. `compress` must return without waiting for the work;
//! the engine later reports through the callbacks. Completion consumes the
//! callbacks, so it fires at most once and nothing can follow it.

pub mod images;
pub mod lopdf_engine;

use std::fmt;
use std::path::PathBuf;

use crate::error::EngineError;
use crate::objects::ObjectUrl;

pub use lopdf_engine::LopdfEngine;

/// Built once per `start`, handed to the engine and never kept.
#[derive(Debug, Clone)]
pub struct CompressionRequest {
    pub input: ObjectUrl,
}

/// Where the compressed bytes can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Temporary registry object; released once its bytes are copied out.
    Object(ObjectUrl),
    File(PathBuf),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Object(url) => write!(f, "{}", url),
            Locator::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultDescriptor {
    pub output: Locator,
}

/// One opaque progress data point.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Count(u64),
    Text(String),
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Count(n) => write!(f, "{}", n),
            Datum::Text(s) => f.write_str(s),
        }
    }
}

/// Engine-internal lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDescriptor {
    pub phase: String,
    pub detail: Option<String>,
}

impl StatusDescriptor {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

type CompleteFn = Box<dyn FnOnce(ResultDescriptor) + Send + Sync>;
type ProgressFn = Box<dyn Fn(Vec<Datum>) + Send + Sync>;
type StatusFn = Box<dyn Fn(StatusDescriptor) + Send + Sync>;
type AbandonFn = Box<dyn FnOnce() + Send + Sync>;

/// The three callback channels of one engine invocation.
pub struct EngineCallbacks {
    on_complete: Option<CompleteFn>,
    on_progress: ProgressFn,
    on_status: StatusFn,
    on_abandon: Option<AbandonFn>,
}

impl EngineCallbacks {
    pub fn new(
        on_complete: impl FnOnce(ResultDescriptor) + Send + Sync + 'static,
        on_progress: impl Fn(Vec<Datum>) + Send + Sync + 'static,
        on_status: impl Fn(StatusDescriptor) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_complete: Some(Box::new(on_complete)),
            on_progress: Box::new(on_progress),
            on_status: Box::new(on_status),
            on_abandon: None,
        }
    }

    /// Runs when the callbacks are dropped without completing.
    pub fn on_abandon(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_abandon = Some(Box::new(f));
        self
    }

    pub fn complete(mut self, descriptor: ResultDescriptor) {
        self.on_abandon = None;
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(descriptor);
        }
    }

    pub fn progress(&self, data: Vec<Datum>) {
        (self.on_progress)(data)
    }

    pub fn status(&self, status: StatusDescriptor) {
        (self.on_status)(status)
    }
}

impl Drop for EngineCallbacks {
    fn drop(&mut self) {
        if let Some(on_abandon) = self.on_abandon.take() {
            on_abandon();
        }
    }
}

impl fmt::Debug for EngineCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCallbacks")
            .field("completed", &self.on_complete.is_none())
            .finish()
    }
}

pub trait CompressionEngine: Send + Sync {
    /// Starts compressing `request`. Must not block on the work itself; an
    /// `Err` means the engine refused the request and no callback will fire.
    fn compress(
        &self,
        request: CompressionRequest,
        callbacks: EngineCallbacks,
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting() -> (EngineCallbacks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let completed = Arc::new(AtomicUsize::new(0));
        let abandoned = Arc::new(AtomicUsize::new(0));
        let c = completed.clone();
        let a = abandoned.clone();
        let callbacks = EngineCallbacks::new(
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
            |_| {},
        )
        .on_abandon(move || {
            a.fetch_add(1, Ordering::SeqCst);
        });
        (callbacks, completed, abandoned)
    }

    #[test]
    fn complete_does_not_report_abandon() {
        let (callbacks, completed, abandoned) = counting();
        callbacks.complete(ResultDescriptor {
            output: Locator::File(PathBuf::from("/tmp/out.pdf")),
        });
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(abandoned.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_without_completion_reports_abandon() {
        let (callbacks, completed, abandoned) = counting();
        callbacks.status(StatusDescriptor::new("loading"));
        drop(callbacks);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert_eq!(abandoned.load(Ordering::SeqCst), 1);
    }
}
