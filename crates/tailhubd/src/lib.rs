//! tailhub daemon - file monitors, log registry and local query server
//!
//! This crate provides the core of the tailhub daemon:
//! - `monitor` - One thread per tracked file or glob pattern
//! - `registry` - Per-log buffers, subscription fan-out and the query bridge
//! - `server` - Unix socket server for client connections
//! - `session` - Remembering tracked logs across restarts
//! - `config` - TOML configuration with environment overrides
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      tailhubd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  DaemonServer   │────▶│  RegistryActor (OS thread)  │    │
//! │  │ (Unix socket)   │     │  LogRegistry                │    │
//! │  └────────┬────────┘     └──────────────▲──────────────┘    │
//! │           │                             │ Delta             │
//! │           │ connections                 │                   │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐    │
//! │  │ConnectionHandler│     │ PathMonitor / Wildcard      │    │
//! │  │ + forwarders    │     │ (one thread per log)        │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod session;
