//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the wallet
//! sync tables.

pub mod wallet_job;
pub mod wallet_registration;

pub use wallet_job::WalletJobQueue;
pub use wallet_registration::{NewRegistration, WalletRegistrationLedger};
