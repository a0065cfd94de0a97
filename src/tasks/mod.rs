//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: Removes entries that outlived their TTL plus a grace period

mod sweep;

pub use sweep::spawn_sweep_task;
