//! Smartmarks: a personal bookmark manager client with a live, newest-first
//! bookmark list reconciled from a snapshot and a realtime change feed.
//!
//! This library crate exposes all modules for use by the binary and integration tests.

pub mod app;
pub mod database;
pub mod logging;
pub mod managers;
pub mod platform;
pub mod rpc_handler;
pub mod services;
pub mod types;
