//! In-process engine: shrinks a PDF by downsizing and re-encoding its images.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use log::{debug, info, warn};
use lopdf::Document;
use rayon::prelude::*;

use super::images::{self, Recompressed};
use super::{
    CompressionEngine, CompressionRequest, Datum, EngineCallbacks, Locator, ResultDescriptor,
    StatusDescriptor,
};
use crate::config::{JPEG_QUALITY, MAX_IMAGE_DIMENSION, PDF_CONTENT_TYPE, PDF_MAGIC};
use crate::error::EngineError;
use crate::objects::ObjectRegistry;

/// Reads its input from, and publishes its output to, an [`ObjectRegistry`].
/// The output is a temporary object the receiver is expected to revoke.
#[derive(Debug, Clone)]
pub struct LopdfEngine {
    registry: ObjectRegistry,
    quality: u8,
    max_dim: u32,
}

impl LopdfEngine {
    pub fn new(registry: ObjectRegistry) -> Self {
        Self {
            registry,
            quality: JPEG_QUALITY,
            max_dim: MAX_IMAGE_DIMENSION,
        }
    }
}

impl CompressionEngine for LopdfEngine {
    fn compress(
        &self,
        request: CompressionRequest,
        callbacks: EngineCallbacks,
    ) -> Result<(), EngineError> {
        let blob = self
            .registry
            .resolve(&request.input)
            .ok_or_else(|| EngineError::MissingInput(request.input.clone()))?;
        if !blob.bytes.starts_with(PDF_MAGIC) {
            return Err(EngineError::NotPdf);
        }

        let registry = self.registry.clone();
        let (quality, max_dim) = (self.quality, self.max_dim);
        rayon::spawn(move || {
            let outcome = guarded(|| shrink(&blob.bytes, quality, max_dim, &callbacks));
            finish(&registry, blob.bytes, outcome, callbacks);
        });
        Ok(())
    }
}

/// Runs `work`, turning a panic into an error. A panic escaping a job on the
/// global rayon pool aborts the process.
fn guarded<T>(work: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("engine panicked: {}", message))
        }
    }
}

/// Publishes the smaller of `input` and the compressed output and completes.
fn finish(
    registry: &ObjectRegistry,
    input: Bytes,
    outcome: Result<Vec<u8>>,
    callbacks: EngineCallbacks,
) {
    let output = match outcome {
        Ok(out) if out.len() < input.len() => {
            info!(
                "compressed {} -> {} bytes ({:.1}%)",
                input.len(),
                out.len(),
                out.len() as f64 * 100.0 / input.len() as f64
            );
            Bytes::from(out)
        }
        Ok(out) => {
            let detail = format!("{} bytes is not smaller than {}", out.len(), input.len());
            callbacks.status(StatusDescriptor::new("unchanged").with_detail(detail));
            input
        }
        Err(e) => {
            warn!("compression failed, keeping original: {:#}", e);
            callbacks.status(StatusDescriptor::new("unchanged").with_detail(format!("{:#}", e)));
            input
        }
    };

    let url = registry.create(output, PDF_CONTENT_TYPE);
    callbacks.status(StatusDescriptor::new("done"));
    callbacks.complete(ResultDescriptor {
        output: Locator::Object(url),
    });
}

fn shrink(
    input: &[u8],
    quality: u8,
    max_dim: u32,
    callbacks: &EngineCallbacks,
) -> Result<Vec<u8>> {
    callbacks.status(StatusDescriptor::new("loading"));
    let mut doc = Document::load_mem(input).context("failed to load PDF")?;

    if doc.is_encrypted() {
        callbacks.status(StatusDescriptor::new("decrypting"));
        // Most protected files only restrict permissions; images may still decode.
        if let Err(e) = doc.decrypt(b"") {
            warn!("failed to decrypt with empty password: {:?}", e);
        }
    }

    let jobs = images::collect_jobs(&doc);
    let total = jobs.len() as u64;
    callbacks.status(StatusDescriptor::new("recompressing").with_detail(format!("{} images", total)));

    let done = AtomicU64::new(0);
    let rewritten: Vec<Recompressed> = jobs
        .par_iter()
        .filter_map(|job| {
            let outcome = images::recompress(job, quality, max_dim);
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            callbacks.progress(vec![Datum::Count(n), Datum::Count(total)]);
            match outcome {
                Ok(Some(out)) => {
                    debug!("image {}: {}", job.id.0, out.summary());
                    Some(out)
                }
                Ok(None) => {
                    debug!("image {}: re-encoding would not shrink it, kept", job.id.0);
                    None
                }
                Err(e) => {
                    warn!("failed to process image {}: {:?}", job.id.0, e);
                    None
                }
            }
        })
        .collect();

    let count = rewritten.len();
    for out in rewritten {
        images::apply(&mut doc, out);
    }

    callbacks.status(
        StatusDescriptor::new("saving").with_detail(format!("{} of {} images rewritten", count, total)),
    );
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).context("failed to save PDF")?;
    Ok(buffer)
}
