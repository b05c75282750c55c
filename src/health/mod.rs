//! Mountpoint health monitoring
//!
//! A single background loop ticks at a fixed interval. Each tick it:
//!
//! - tears down records idle past their grace period
//! - checks live endpoints (relay state query plus upstream probe)
//! - attempts recovery of `RECOVERING` records whose retry time has come
//!
//! ```text
//! ACTIVE ──fail──> DEGRADED ──fail──> RECOVERING ──budget spent──> FAILED
//!    ^                 │                   │
//!    └────success──────┴─────recreated─────┘
//! ```

pub mod backoff;
pub mod monitor;

pub use backoff::BackoffPolicy;
pub use monitor::HealthMonitor;
