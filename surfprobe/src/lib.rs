pub mod manifest;
pub use manifest::Manifest;

pub mod source;
pub use source::{open_source, ManifestSource};

pub mod context;
pub use context::{Context, DefaultContext};

pub mod config;
pub use config::ProbeConfig;

pub mod errors;
pub use errors::{Error, Result};

pub mod adb;

pub mod command;
pub use command::run_cmd;

pub mod exported;
pub use exported::Exported;

pub mod model;
pub use model::{ActivityRecord, DataSpec, IntentFilter};

pub mod normalize;
pub use normalize::{normalize, normalize_activity_name};

pub mod classify;
pub use classify::{classify, ExportPolicy, ProtectionLookup, Verdict};

pub mod intent;
pub use intent::{build_commands, CommandBuilder, ProbeCommand, VariantKind};

pub mod dispatch;
pub use dispatch::{dispatch, CommandExecutor, Outcome, ProbeResult};

pub mod db;
pub use db::{Database, ProbeStore};

pub mod report;
pub use report::{open_report, ReportSink};

pub mod tasks;

pub mod utils;

pub mod version;
pub use version::{Version, VERSION};

#[cfg(test)]
pub mod testing;
