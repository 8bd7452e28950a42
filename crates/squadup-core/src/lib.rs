// Library root: re-exports all modules so the CLI and integration tests can
// reach the crate's public API.

pub mod config;
pub mod draft;
pub mod role;
pub mod roster;
pub mod service;
pub mod session;
pub mod solver;
pub mod store;
