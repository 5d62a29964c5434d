//! # Postbox - Short Message Board Core
//!
//! Postbox lets clients post short text messages to a public feed or to a
//! registered recipient. This crate holds the two pieces with real invariants:
//!
//! - **Admission control** ([`admission`]): a per-client state machine that gates
//!   writes with a cooldown, a rolling window and a daily cap.
//! - **Durable store** ([`storage`]): messages and users held in memory and
//!   mirrored to one atomically replaced JSON snapshot on every mutation.
//!
//! [`service::MessageService`] composes them on the write path. Transport, session
//! tokens and rendering live outside this crate and call in through these types.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use postbox::admission::AdmissionController;
//! use postbox::config::Config;
//! use postbox::service::{MessageService, PostOutcome};
//! use postbox::storage::Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = Arc::new(Store::open(&config.storage).await?);
//!     let admission = Arc::new(AdmissionController::new(config.admission.clone()));
//!     let service = MessageService::new(admission, store);
//!
//!     match service.post_public("198.51.100.4", "hello", Utc::now()).await? {
//!         PostOutcome::Accepted { message, .. } => println!("stored #{}", message.id),
//!         other => println!("declined: {:?}", other),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`admission`] - quota gates and idle-state sweeping
//! - [`storage`] - snapshot store, schema and atomic file replacement
//! - [`service`] - write-path composition
//! - [`ingest`] - batch posting from line input
//! - [`config`] - TOML configuration
//! - [`validation`] - caller-side input checks
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - single-line log previews of user content

pub mod admission;
pub mod config;
pub mod ingest;
pub mod logutil;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod validation;
