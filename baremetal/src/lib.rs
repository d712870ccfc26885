//! Bare-metal `Provider` backends: a Tinkerbell-family workflow-engine
//! driver and a plain-SSH driver. Both satisfy `machine_provider::Provider`
//! so the reconciler dispatches to them exactly like any IaaS backend.

pub mod error;
pub mod netmask;
pub mod ssh;
pub mod tinkerbell;
pub mod types;

pub use error::DriverError;
pub use ssh::{SshConnectionPool, SshDriver, SshRunner};
pub use tinkerbell::TinkerbellProvider;
