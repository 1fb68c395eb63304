//! Scheduler, worker pipelines, and upstream/push clients for the
//! notification backend. Processes built on this crate (`patrol-server`)
//! wire these modules to one of three roles: admin API stub, scheduler, or
//! a per-queue worker pool.

pub mod dedup;
pub mod error;
pub mod lock;
pub mod model;
pub mod push;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod upstream;
pub mod watcher_match;
pub mod worker;
