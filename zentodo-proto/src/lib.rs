//! Shared task model and wire protocol for `ZenTodo`.

pub mod task;
pub mod wire;
