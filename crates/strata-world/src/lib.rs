//! Procedural height-map generation for the Strata streaming core.
//!
//! Height maps are computed on a worker pool in three gated phases and then
//! streamed to GPU textures through the copy engine a band of rows at a time.

pub mod config;
pub mod error;
pub mod job;
pub mod normals;
pub mod streaming;
pub mod tiles;

pub use config::HeightMapConfig;
pub use error::{Result, WorldError};
pub use job::{HeightMapJob, JobState};
pub use streaming::{HeightMapStreamer, StreamProgress};
pub use tiles::{TileLayout, TileRect};

/// World seed for procedural generation.
pub type WorldSeed = u64;
