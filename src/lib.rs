//! # Task Execution Core
//!
//! A distributed task execution service: user-submitted scripts are placed
//! on a durable priority queue, dispatched to a pool of worker agents, run
//! in a sandboxed, resource- and security-limited container per task, and
//! retried or dead-lettered on failure under an exponential-backoff policy.
//!
//! ## Architecture
//!
//! Four subsystems, composed leaves-first at startup:
//! - **Queue trio** ([`queue`]): main, retry, and dead-letter queues backed
//!   by an ordered key-value store ([`store`]), with visibility-timeout
//!   based at-least-once delivery.
//! - **Concurrency gate** ([`concurrency`]): bounds global and per-user
//!   parallelism with stale-slot eviction.
//! - **Sandbox executor** ([`executor`]): creates, supervises, and tears
//!   down a hardened container per task, with a container-runtime-free
//!   mock fallback, guarded by the [`security`] validator and tracked for
//!   cleanup by [`cleanup`].
//! - **Worker pool** ([`worker`]): owns the workers that dequeue, acquire a
//!   slot, execute, and record the outcome.
//!
//! Task and execution metadata are treated as owned by an external
//! [`repository`]; the core only reads and writes the fields the data model
//! enumerates.

/// Cancellation token shared by every long-running background task.
pub mod cancel;
/// Container cleanup tracking and orphan reaping.
pub mod cleanup;
/// Per-user and global concurrency admission.
pub mod concurrency;
/// Environment-driven configuration.
pub mod config;
/// System-wide defaults not meant to be operator-tunable.
pub mod constants;
/// Error taxonomy and retryability policy.
pub mod error;
/// Sandbox and mock task executors.
pub mod executor;
/// Health aggregation across subsystems.
pub mod monitoring;
/// Core data model: messages, slots, containers, tasks, executions.
pub mod models;
/// The three queues and the manager that composes them.
pub mod queue;
/// Task/execution metadata storage boundary.
pub mod repository;
/// Script, image, and container-config validation.
pub mod security;
/// Ordered key-value store client.
pub mod store;
/// Workers and the pool that owns them.
pub mod worker;

pub use error::{CoreError, Result};
