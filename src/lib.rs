#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Bulk Core Rust
//!
//! Engine that applies one action to a large, dynamically discovered set of
//! records, with bounded memory and transactional granularity, without
//! blocking the caller.
//!
//! ## Overview
//!
//! A caller builds a [`BulkCommand`] naming an action and a query. The
//! dispatcher scrolls the query result, groups the identifiers into fixed-size
//! buckets and publishes them on a partitioned channel keyed by command id.
//! Workers consume buckets, slice each into batches, and apply the action one
//! batch per transaction. The status tracker folds every batch outcome into the
//! command status, which turns `completed` (or `completed_with_errors`) once the
//! scroll is over and every scrolled identifier has been processed.
//!
//! ## Module Organization
//!
//! - [`command`] - Validated, immutable command and its builder
//! - [`scroll`] - Query and generic scrollers behind one cursor contract
//! - [`bucket`] / [`batch`] - Bucketizer and batcher
//! - [`messaging`] - Partitioned bucket channel with ack/nack
//! - [`dispatcher`] - Scroll loops feeding the channel
//! - [`worker`] - Bucket executor and per-partition consumers
//! - [`status`] - Command status tracker
//! - [`action`] / [`transaction`] - Collaborator contracts
//! - [`service`] - Caller-facing entry point
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`events`] - Status event broadcast
//! - [`testing`] - In-memory collaborators
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests, including property tests
//! ```

pub mod action;
pub mod batch;
pub mod bucket;
pub mod command;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod scroll;
pub mod service;
pub mod status;
pub mod testing;
pub mod transaction;
pub mod worker;

pub use action::{ActionDescriptor, ActionRegistry, BulkAction};
pub use command::{BulkCommand, BulkCommandBuilder, CommandId};
pub use config::{BulkConfig, ConfigLoader};
pub use error::{BulkError, Result};
pub use scroll::{Scroller, ScrollerRegistry};
pub use service::BulkService;
pub use status::{BulkStatus, CommandState};
