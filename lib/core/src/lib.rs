//! Core domain types and utilities for the autoflow engine.
//!
//! This crate provides the strongly-typed identifiers and the shared
//! `Result` alias used by every other autoflow crate.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, UserId, WorkflowId, WorkflowRunId};
