//! Peach backend library
//!
//! Provisions per-assignment coding environments on Kubernetes and relays
//! browser WebSocket sessions to them.

pub mod api;
pub mod auth;
pub mod course;
pub mod db;
pub mod environment;
pub mod pod;
pub mod relay;
pub mod terminal;
pub mod workspace;
