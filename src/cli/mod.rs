//! Server entry point
//!
//! This module is only available when the "server" feature is enabled.

mod backend_factory;
mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, run, Cli, CliBackend, CliLogFormat};
