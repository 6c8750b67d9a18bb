//! Annotation step: inference overlay plus timestamp banner.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use sightline_common::clock::{Clock, SystemClock};
use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::Frame;

use crate::compositor::{draw_timestamp_banner, BannerStyle};

/// Produces an annotated copy of a frame (boxes, labels, masks).
///
/// Implementations must be stateless across calls. A returned error or a
/// panic fails the export job with `InferenceFailure`.
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &str;

    fn annotate_raw(&self, frame: &Frame) -> anyhow::Result<Frame>;
}

/// Engine that returns the frame unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEngine;

impl InferenceEngine for PassthroughEngine {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn annotate_raw(&self, frame: &Frame) -> anyhow::Result<Frame> {
        Ok(frame.clone())
    }
}

/// Runs the inference engine and burns the timestamp banner into the result.
#[derive(Clone)]
pub struct Annotator {
    engine: Arc<dyn InferenceEngine>,
    clock: Arc<dyn Clock>,
    banner: BannerStyle,
}

impl Annotator {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            clock: Arc::new(SystemClock),
            banner: BannerStyle::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_banner(mut self, banner: BannerStyle) -> Self {
        self.banner = banner;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Annotate one frame. The result always has the input's dimensions.
    pub fn annotate(&self, frame: &Frame) -> SightlineResult<Frame> {
        let engine = Arc::clone(&self.engine);
        let raw = catch_unwind(AssertUnwindSafe(|| engine.annotate_raw(frame)))
            .map_err(|payload| {
                SightlineError::inference(format!(
                    "{} panicked: {}",
                    self.engine.name(),
                    panic_message(payload.as_ref())
                ))
            })?
            .map_err(|e| SightlineError::inference(format!("{}: {e:#}", self.engine.name())))?;

        let (width, height) = frame.dimensions();
        let mut annotated = if raw.dimensions() == (width, height) {
            raw
        } else {
            tracing::warn!(
                engine = self.engine.name(),
                got = ?raw.dimensions(),
                expected = ?(width, height),
                "Overlay size differs from frame, resizing"
            );
            imageops::resize(&raw, width, height, FilterType::Triangle)
        };

        draw_timestamp_banner(&mut annotated, &self.clock.display_stamp(), &self.banner);
        Ok(annotated)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
