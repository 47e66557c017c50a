//! Offline-resilient sync core for a donations and expenses tracker.
//!
//! Reads are served from a local cache and refreshed from the remote store
//! when online; additive writes made offline wait in a durable queue and are
//! replayed in order when the connection comes back.

pub mod app;
pub mod auth;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod finance;
pub mod queue;
pub mod sync;
