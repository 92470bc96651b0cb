//! # Wallet Sync Library
//!
//! Durable job queue, vendor drivers and worker that keep Google Wallet loyalty
//! objects and Apple Wallet passes in step with loyalty balances, plus the small
//! HTTP surface used to trigger and observe it.

pub mod auth;
pub mod config;
pub mod db;
pub mod drivers;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod repositories;
pub mod server;
pub mod sync_worker;
pub mod telemetry;
pub use migration;
