//! Single-file PDF compression sessions.
//!
//! A [`CompressionSession`] owns the selected file, hands it to a
//! [`CompressionEngine`], turns the engine's callbacks into state transitions
//! and keeps the downloadable result alive until the next selection.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod file;
pub mod objects;
pub mod session;
pub mod state;
pub mod telemetry;

pub use engine::{CompressionEngine, LopdfEngine};
pub use error::{EngineError, SessionError};
pub use fetcher::{ObjectFetcher, ResultFetcher};
pub use file::{FileHandle, RawFile};
pub use objects::{ObjectRegistry, ObjectUrl};
pub use session::{CompressionSession, Download, SessionUpdate};
pub use state::{Generation, SessionState, StateKind};
