/// Shared helpers for shell invocations and polling
pub mod command;
pub mod polling;
