pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod inventory;
pub mod logger;
pub mod migration;
pub mod observer;
pub mod remap;
pub mod session;
pub mod xenapi;

pub use error::{Failure, PreflightError};
pub use migration::{
    CheckReport, Feasibility, MigrationCheck, MigrationRemap, MigrationTarget, sweep_hosts,
};

pub type Result<T> = std::result::Result<T, PreflightError>;

// Convenience re-exports for implementing a connection
pub use cache::{ObjectCache, XenObject};
pub use connection::{ApiResult, Connection};
pub use observer::{CheckEvent, CheckObserver, CheckState, RecordingObserver, TracingObserver};
pub use session::{Negotiation, negotiate};
pub use xenapi::{OpaqueRef, ReceiveMapping, VdiMap, VifMap};
