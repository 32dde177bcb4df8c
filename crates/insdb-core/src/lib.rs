//! InstrumentDB query engine.
//!
//! Resolves slash paths and UUIDs to catalog objects over two interchangeable
//! backends:
//!
//! ```text
//!   shell / API caller
//!          │
//!          ▼
//!   path resolver ──► Backend ──┬──► LocalBackend  (snapshot in memory)
//!                               └──► RemoteBackend (insdb-remote, cached HTTP)
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod model;
pub mod path;
pub mod snapshot;
pub mod tracking;

pub use backend::{kind_mismatch, Attributes, Backend, Capabilities};
pub use config::ConnectionConfig;
pub use error::{InsDbError, Result};
pub use local::LocalBackend;
pub use model::{
    ChildEntry, ChildKind, DataFile, Entity, FormatSpecification, Object, ObjectKind, Quantity,
    Release,
};
pub use path::{Location, PathSpec};
pub use tracking::Tracking;
