//! This crate publishes aggregate event statistics under a k-anonymity style disclosure policy.
//!
//! It has two halves that share nothing but a file.
//!
//! * An offline aggregation job ([aggregator]) reads raw events from Parquet files, groups them
//!   by event type and UTC calendar date, and computes the number of events and the mean value of
//!   each group. Groups with fewer events than the minimum group size (K, 15 by default) are
//!   suppressed. Every surviving group is tagged with a compliance tag and the result is written
//!   atomically to a Parquet artifact ([artifact]).
//! * A read-only query service ([app]) loads the artifact once at startup and serves it over
//!   HTTP. It never sees raw events, so it cannot disclose a group smaller than K.
//!
//! The service is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON response data.
//! * [Parquet](parquet) reads raw events and reads and writes the disclosure artifact.
//! * [Rayon](rayon) optionally aggregates input files in parallel.

pub mod aggregator;
pub mod app;
pub mod app_state;
pub mod artifact;
pub mod catalog;
pub mod cli;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod server;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validated_query;
