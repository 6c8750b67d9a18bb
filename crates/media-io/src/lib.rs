//! Sightline Media I/O
//!
//! Everything that touches encoded media:
//! - [`source`]: sequential frame sources over still images and videos
//! - [`backend`]: the decode/encode seam ([`MediaBackend`], [`VideoWriter`])
//! - [`ffmpeg`]: the production backend, driving `ffmpeg`/`ffprobe` child processes
//! - [`probe`]: disposable trial encodes that discover usable codecs

pub mod backend;
pub mod ffmpeg;
pub mod probe;
pub mod source;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::*;
pub use probe::*;
pub use source::*;
