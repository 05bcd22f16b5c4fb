//! Fee Portal: student fee management with live payment status.
//!
//! Students register, log in, and pay their fees; every successful payment is
//! persisted (Sled) and then pushed to all connected clients over WebSocket so
//! open rosters update without a refresh.
//!
//! This lib exposes the store, the auth and payment services, the HTTP router,
//! and the client-side session and roster used by the CLI.

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod payments;
// REST + WebSocket surface (Axum)
pub mod rest;
// Client-side roster reducer; no I/O of its own
pub mod roster;
pub mod storage;
pub mod telemetry;
