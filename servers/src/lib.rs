//! # servers
//!
//! HTTP, WebSocket and worker front-ends for the quote pipeline. The binaries
//! `server_quotes` and `worker_quotes` are thin wrappers around [`quote_logic`].

#![forbid(unsafe_code)]

pub mod quote_logic;
