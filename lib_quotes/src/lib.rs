//! # lib_quotes
//!
//! Building blocks of the quote propagation pipeline.
//!
//! A write is accepted into the [`backends::JobQueue`], leased by a worker from
//! [`core::worker`], and committed by the [`core::coordinator::WriteCoordinator`]
//! into the durable store, the cache and the event bus. Reads go through the
//! cache-aside [`core::reader::ReadPath`]. Change events are fanned out to live
//! clients by the [`core::dispatcher::Dispatcher`]. The
//! [`ingestors::price_poller::PricePoller`] refreshes tracked symbols from an
//! external feed behind a [`core::circuit_breaker::CircuitBreaker`].
//!
//! Every shared resource is reached through a trait in [`backends`], with an
//! in-process implementation in [`backends::memory`] and the Redis/Postgres
//! implementations in [`connections`] (feature `connections`).

#![forbid(unsafe_code)]

pub mod backends;
pub mod configs;
pub mod core;
pub mod error;
pub mod ingestors;
pub mod loggers;
pub mod model;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use error::{ErrorKind, QuoteError, QuoteResult};
pub use model::{ChangeEvent, CommitOutcome, FailedJob, Job, Record, TrackedSymbol};
