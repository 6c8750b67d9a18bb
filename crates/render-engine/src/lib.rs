//! Sightline Render Engine
//!
//! Runs an export job: frames are pulled from a source, annotated by the
//! inference engine, stamped with a timestamp banner, and handed to a sink.
//!
//! # Pipeline Architecture
//!
//! ```text
//! image / video ──> FrameSource
//!                        │
//!                        ├── InferenceEngine::annotate_raw
//!                        │
//!                        ├── Timestamp banner (compositor)
//!                        │
//!                        ▼
//!                    FrameSink ──┬── SingleImage   -> result.jpg
//!                                ├── SingleVideo   -> result.mp4 (via temp sibling)
//!                                └── FrameSequence -> dir/frames/frame_000000.jpg ...
//! ```
//!
//! [`ExportJob::run`] drives this synchronously on the calling thread;
//! [`ExportSession`] runs it on a blocking worker and streams events back.

pub mod annotate;
pub mod compositor;
pub mod export;
pub mod session;
pub mod sink;

pub use annotate::*;
pub use compositor::BannerStyle;
pub use export::*;
pub use session::*;
pub use sink::{FinalizeMode, FrameSink};
