//! Workflow execution on a remote desktop driven by a computer-use agent

// Agent sessions (Anthropic Messages API)
pub mod agent;

// CLI argument definitions and handlers
pub mod cli;
pub mod commands;

// Configuration loading
pub mod config;

// SQLite persistence
pub mod database;

// Virtual desktop bridge
pub mod desktop;

// Execution controller
pub mod executor;

// In-memory stores
pub mod memory;

// Workflow and keychain service
pub mod store;

pub use cuse_quickstart_sdk as sdk;
