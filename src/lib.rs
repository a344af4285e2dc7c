//! # Index Sync
//!
//! Keeps a search index in step with a linked-data repository.
//!
//! The repository announces every resource creation, modification and
//! deletion as a change notification. Index Sync consumes those
//! notifications, fetches the current representation of each admitted
//! resource, reduces it to the fields the index mapping declares (plus
//! completion suggestions), and writes or deletes the corresponding search
//! document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ EventSource  │──▶│ SyncService │──▶│ EventRouter  │
//! │ webhook/jsonl│   │  run loop   │   │ filter+route │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!                     ┌───────────────────────┤
//!                     ▼                       ▼
//!              ┌──────────────┐        ┌──────────────┐
//!              │  Repository  │──raw──▶│  normalize   │
//!              │  GET (LDP)   │        │ + completion │
//!              └──────────────┘        └──────┬───────┘
//!                                             ▼
//!                                      ┌──────────────┐
//!                                      │ ElasticIndex │
//!                                      │ POST/DELETE  │
//!                                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! index-sync schema                         # show the index fields
//! index-sync serve                          # accept webhook deliveries
//! index-sync replay ./notifications.jsonl   # process a recorded stream
//! index-sync doc-id http://fcrepo:8080/fcrepo/rest/grants/1
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`events`] | Notification decoding and event sources |
//! | [`router`] | Admission filter and per-action dispatch |
//! | [`repository`] | Repository gateway |
//! | [`schema`] | Index schema derived from the mapping |
//! | [`normalize`] | Raw resource → search document |
//! | [`completion`] | Completion suggestion generation |
//! | [`index`] | Search engine gateway and document ids |
//! | [`service`] | Startup, consume loop, shutdown |
//! | [`server`] | HTTP webhook event source |
//! | [`error`] | Typed gateway and lifecycle errors |

pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod models;
pub mod normalize;
pub mod repository;
pub mod router;
pub mod schema;
pub mod server;
pub mod service;
