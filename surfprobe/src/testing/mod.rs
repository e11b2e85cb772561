mod adb;
mod context;
mod mocks;
mod temp;

pub use adb::*;
pub use context::*;
pub use mocks::*;
pub use temp::*;
