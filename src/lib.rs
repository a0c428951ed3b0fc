//! zbr-agent Library
//!
//! Test run reporting agent: correlates a test runner's callbacks with a
//! reporting backend's runs, tests and sessions. The binary entry point is
//! in main.rs.

pub mod api;
pub mod attachments;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reporter;
pub mod rerun;
pub mod runner;
pub mod sdk;
pub mod state;
