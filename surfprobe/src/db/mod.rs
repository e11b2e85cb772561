#[macro_use]
mod common;
pub use common::{DBErrorInfo, Error, Result};

pub mod models;
pub mod schema;
pub mod store;

pub use models::{ActivityInfo, PermissionRow};
pub use store::{Database, ProbeStore, StoredLevels};
