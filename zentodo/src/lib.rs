//! `ZenTodo` — personal task tracker with an optional cloud-synchronized store.

pub mod cli;
pub mod config;
pub mod identity;
pub mod session;
pub mod store;
pub mod tasks;
pub mod view;
