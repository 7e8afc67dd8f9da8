//! Run-Tracker: experiment-tracking boundary for leaderboard runs
//!
//! The orchestrator only ever talks to a tracking backend through the
//! [`Tracker`] capability: create a run, attach artifacts, log named values
//! and finish. This crate defines that capability and ships two backends.
//!
//! ## Key Components
//!
//! - `Tracker`: async backend-agnostic trait
//! - `FsTracker`: directory-backed runs with versioned, content-digested artifacts
//! - `fakes::MemoryTracker`: in-memory backend for tests

mod error;
pub mod fakes;
pub mod fs_tracker;
pub mod tracker;

pub use error::TrackerError;
pub use fs_tracker::FsTracker;
pub use tracker::{
    ArtifactRecord, ArtifactSpec, ContentDigest, HistoryEntry, RunHandle, RunId, RunRecord,
    RunSpec, RunStatus, Tracker, TrackerResult,
};
