//! Remote InstrumentDB backend.
//!
//! [`RemoteBackend`] implements [`insdb_core::Backend`] over the REST API:
//! objects are fetched on demand, cached by UUID for the lifetime of the
//! backend, and invalidated after each successful mutation. The cache is
//! guarded by a mutex, so one backend can be shared between threads.

pub mod backend;
pub mod cache;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod transport;
pub mod wire;

pub use backend::RemoteBackend;
pub use cache::{CacheStats, ObjectCache};
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryTransport;
pub use transport::{status_error, HttpTransport, Transport};
