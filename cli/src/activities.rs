use std::path::PathBuf;

use clap::{self, Args};

use crate::printer::{color, Printer};
use crate::utils::open_store;
use surfprobe::{Database, DefaultContext};

#[derive(Args)]
pub struct Activities {
    /// Package whose stored activities are listed
    package: String,

    /// Only list attack surface activities
    #[arg(short, long)]
    surface_only: bool,

    /// Database path, overriding the configured one
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Activities {
    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        let store = open_store(ctx, self.db.as_deref())?;
        let rows = store.get_activities_by_package(&self.package)?;
        let printer = Printer::new();

        if rows.is_empty() {
            printer.println_colored(
                format!("Nothing stored for {}", self.package),
                color::GREY,
            );
            return Ok(());
        }

        for row in rows {
            let verdict = row.verdict();
            let is_surface = verdict.as_ref().map(|v| v.is_surface);
            if self.surface_only && is_surface != Some(true) {
                continue;
            }

            let c = match is_surface {
                Some(true) => color::INTERESTING,
                Some(false) => color::GREY,
                None => color::CYAN,
            };
            printer.println_colored(&row.activity_name, c);
            printer.println(format!("  exported: {}", row.exported()));
            if let Some(perm) = &row.permission {
                let level = verdict
                    .as_ref()
                    .and_then(|v| v.protection_level.as_deref())
                    .unwrap_or("unknown");
                printer.println(format!("  permission: {} ({})", perm, level));
            }
            let filters = row.get_intent_filters()?;
            if !filters.is_empty() {
                printer.println(format!("  intent filters: {}", filters.len()));
            }
            if verdict.is_none() {
                printer.println_colored("  not classified yet", color::GREY);
            }
        }
        Ok(())
    }
}
