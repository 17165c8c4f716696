//! Port Pool: the bounded set of ports instances may bind, and the durable
//! mapping from project identity to allocated port and process.

pub mod conflict;
pub mod pool;
pub mod store;

pub use conflict::{PortConflict, ProcessInfo};
pub use pool::{PortPool, PortPoolState, PortRecord, Reservation};
pub use store::{
    JsonPortStore, MemoryPortStore, NoopPortStore, PersistedPool, PersistedRecord,
    PersistedReservation, PortStore, StoreLock,
};
