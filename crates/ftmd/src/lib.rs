//! FTM Daemon - Fasting timer lifecycle and broadcast server
//!
//! This crate provides the daemon side of the fasting timer:
//! - `store` - Durable key-value storage for the running fast and history
//! - `history` - Newest-first log of finished fasts
//! - `timer` - Background timer actor producing wall-clock ticks
//! - `lifecycle` - Session lifecycle actor (start, stop, expiry, reconciliation)
//! - `notify` - Warning/completion notification scheduling and push relay
//! - `server` - Unix socket server for client connections
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          ftmd                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────────┐      ┌──────────────────────────────┐   │
//! │  │  DaemonServer   │─────▶│     LifecycleManager         │   │
//! │  │ (Unix Socket)   │      │  (owns the running fast)     │   │
//! │  └────────┬────────┘      └───┬──────────┬───────────┬───┘   │
//! │           │                   │          │           │       │
//! │           │ connections       │ ticks    │ alerts    │ kv    │
//! │           ▼                   ▼          ▼           ▼       │
//! │  ┌─────────────────┐   ┌───────────┐ ┌─────────┐ ┌────────┐  │
//! │  │ConnectionHandler│   │TimerActor │ │Scheduler│ │ Store  │  │
//! │  └─────────────────┘   └───────────┘ └─────────┘ └────────┘  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod clock;
pub mod config;
pub mod daemon;
pub mod history;
pub mod lifecycle;
pub mod notify;
pub mod server;
pub mod store;
pub mod timer;
