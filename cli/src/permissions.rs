use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use clap::{self, Args, Subcommand};

use crate::printer::{color, Printer};
use crate::utils::open_store;
use surfprobe::adb::ExecAdb;
use surfprobe::tasks::import_permissions;
use surfprobe::{Context, Database, DefaultContext};

#[derive(Args)]
pub struct Permissions {
    /// Database path, overriding the configured one
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import every permission known to the connected device
    #[command()]
    Import,

    /// Record the protection level of a single permission
    #[command()]
    Set {
        /// Fully qualified permission name
        name: String,
        /// Protection level, such as `normal` or `signature|privileged`
        level: String,
    },

    /// List the stored permissions
    #[command()]
    List,
}

impl Permissions {
    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        let store = open_store(ctx, self.db.as_deref())?;
        match &self.command {
            Command::Import => {
                let cfg = ctx.get_config()?;
                let adb = ExecAdb::new(ctx, &cfg.adb).context("locating adb")?;
                let count = import_permissions(&adb, &store)?;
                Printer::new().println(format!("Imported {} permissions", count));
            }
            Command::Set { name, level } => {
                store.upsert_permission(name, Some(level.as_str()))?;
            }
            Command::List => {
                let printer = Printer::new();
                for perm in store.get_permissions()? {
                    printer.print_colored(&perm.name, color::CYAN);
                    match perm.protection_level.as_deref() {
                        Some(lvl) => printer.println(format!(" {}", lvl)),
                        None => printer.println_colored(" (unknown)", color::GREY),
                    }
                }
            }
        }
        Ok(())
    }
}
