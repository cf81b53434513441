//! Reports exchanged with other instances: the store holding what they
//! told us, the frame format, and the listener receiving them.

pub mod listener;
pub mod protocol;
pub mod store;

pub use listener::{QUEUE_CAPACITY, RemoteListener};
pub use protocol::{MAX_PAYLOAD, RemoteReport};
pub use store::{RemoteEntry, RemoteSnapshot, RemoteStateStore};
