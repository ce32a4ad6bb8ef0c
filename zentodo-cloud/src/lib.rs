//! `ZenTodo` hosted task store.
//!
//! Holds task documents for many users, enforces owner-only access, and
//! pushes owner-scoped snapshots to subscribed clients over WebSocket.

pub mod collection;
pub mod config;
pub mod server;
