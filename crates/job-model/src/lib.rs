//! Sightline Job Model
//!
//! Defines the data contracts shared by the export pipeline:
//! - **Geometry:** frame dimensions, rate, and count read at source open
//! - **Job:** what to export (source), how (sink kind), where (output target),
//!   and the job status state machine
//! - **Events:** progress updates, the terminal outcome, and the record a
//!   persistence layer stores for completed exports

pub mod event;
pub mod geometry;
pub mod job;

pub use event::*;
pub use geometry::*;
pub use job::*;
