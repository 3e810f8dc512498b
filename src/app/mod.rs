//! Process-wide plumbing: configuration, state, errors and startup.

pub mod app_error;
pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod swagger;
