//! sbom-batch-merge library crate.
//!
//! The primary interface is the `sbom-merge` binary. The library exposes the
//! batch-merge engine so integration tests (and other tools) can drive it
//! with their own [`invoker::MergeEngine`] and [`progress::ProgressReporter`].
//!
//! A run discovers SBOM fragments, splits them into fixed-size chunks, merges
//! each chunk on a bounded worker pool, and reduces the per-chunk results
//! into one `final_merged.xml`. See [`pipeline`] for the flow.

pub mod artifact;
pub mod chunk;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod invoker;
pub mod pipeline;
pub mod progress;
pub mod reducer;
pub mod report;
pub mod resume;
pub mod scheduler;

// `format` and `telemetry` live in the binary.
