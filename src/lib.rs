//! Linkmirror: a client-side replica of one user's saved links.
//!
//! A session bulk-loads the user's collection from a backend, then keeps the
//! in-memory copy current by applying the backend's change stream. Writes go
//! to the backend only and come back as change events.
//!
//! This library crate exposes all modules for use by the binary and integration tests.

pub mod app;
pub mod database;
pub mod managers;
pub mod platform;
pub mod rpc_handler;
pub mod services;
pub mod telemetry;
pub mod types;
