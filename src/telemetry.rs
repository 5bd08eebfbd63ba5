use log::{debug, info};

use crate::engine::{Datum, StatusDescriptor};
use crate::state::Generation;

/// Receives the engine's progress and status channels. Nothing written here
/// may influence session state.
pub trait TelemetrySink: Send + Sync {
    fn progress(&self, generation: Generation, data: &[Datum]);
    fn status(&self, generation: Generation, status: &StatusDescriptor);
}

/// Forwards telemetry to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn progress(&self, generation: Generation, data: &[Datum]) {
        let points: Vec<String> = data.iter().map(ToString::to_string).collect();
        debug!("{} progress: [{}]", generation, points.join(", "));
    }

    fn status(&self, generation: Generation, status: &StatusDescriptor) {
        match &status.detail {
            Some(detail) => info!("{} status: {} ({})", generation, status.phase, detail),
            None => info!("{} status: {}", generation, status.phase),
        }
    }
}
