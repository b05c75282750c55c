//! Mountpoint registry
//!
//! The registry is the single owner of all mountpoint records. It is a map
//! from device id to a per-device async mutex; the map is the arena and the
//! device id is the index.
//!
//! ```text
//!                          Registry
//!                 ┌───────────────────────────┐
//!                 │ records: RwLock<HashMap<  │
//!                 │   device_id,              │
//!                 │   Arc<Mutex<Record>>,     │
//!                 │ >>                        │
//!                 └─────────────┬─────────────┘
//!                               │ per-device lock
//!         ┌─────────────────────┼─────────────────────┐
//!         │                     │                     │
//!         ▼                     ▼                     ▼
//!     acquire()             release()          health monitor
//!  ensure + attach           detach          check / recover / teardown
//! ```
//!
//! Nothing outside the crate gets a reference into the map; callers see
//! [`HealthSnapshot`]s.

pub mod record;
pub mod store;

pub use record::{HealthSnapshot, MountState, MountpointRecord, SubscriptionId};
pub use store::{RecordGuard, Registry};
