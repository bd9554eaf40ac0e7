//! Flowdesk shared types and helpers
//!
//! Common building blocks used by every Flowdesk crate:
//! - Strongly typed ID wrappers (`UserId`, `ConnectionId`)
//! - `Money` as integer cents with checked arithmetic
//! - Database pool construction

pub mod db;
pub mod types;

pub use db::{create_pool, DEFAULT_MAX_CONNECTIONS};
pub use types::{ConnectionId, Money, UserId};
