use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as AnyhowContext};
use clap::{self, Args};

use crate::monitor::PrintMonitor;
use crate::printer::{color, Printer};
use crate::utils::{open_store, parse_secs, task_canceller};
use surfprobe::adb::ExecAdb;
use surfprobe::dispatch::{DryRunExecutor, ShellExecutor};
use surfprobe::tasks::analyze::{analyze, Options, Summary};
use surfprobe::{CommandExecutor, Context, Database, DefaultContext, ExportPolicy, Outcome};

pub const DEFAULT_OUTPUT: &str = "analysis_result.xlsx";

#[derive(Args)]
pub struct Analyze {
    /// The APK to analyze, a text AndroidManifest.xml or an apktool output
    /// directory also work
    #[arg(short, long)]
    apk: PathBuf,

    /// Report location, `.xlsx` or `.csv`
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// URL delivered to every surfaced activity
    #[arg(short = 'u', long = "url")]
    payload_url: Option<String>,

    /// How many probes may run at once
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: Option<u16>,

    /// Seconds to wait between starting probes
    #[arg(short, long, value_parser = parse_secs)]
    interval: Option<Duration>,

    /// Give up on a probe after this many seconds
    #[arg(short, long, value_parser = parse_secs)]
    timeout: Option<Duration>,

    /// Treat activities with intent filters as exported when the attribute
    /// is missing
    #[arg(long)]
    legacy_export: bool,

    /// Build every probe but only log it
    #[arg(long)]
    dry_run: bool,

    /// Don't read or write the activity database
    #[arg(long)]
    no_store: bool,

    /// Database path, overriding the configured one
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Analyze {
    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        if !self.apk.exists() {
            bail!("package {} does not exist", self.apk.display());
        }

        let opts = self.options(ctx)?;
        let source = surfprobe::open_source(ctx, &self.apk)
            .with_context(|| format!("reading manifest from {}", self.apk.display()))?;

        let store = if self.no_store {
            None
        } else {
            Some(open_store(ctx, self.db.as_deref())?)
        };

        let executor: Arc<dyn CommandExecutor> = if self.dry_run {
            Arc::new(DryRunExecutor)
        } else {
            Arc::new(ShellExecutor::new(opts.dispatch.timeout))
        };

        let (_sigs, cancel) = task_canceller()?;
        let (mon, join) = PrintMonitor::start(cancel.clone());
        let res = analyze(
            source.as_ref(),
            store.as_ref().map(|s| s as &dyn Database),
            executor,
            &mon,
            &cancel,
            &opts,
        );
        drop(mon);
        _ = join.join();

        let summary = res?;
        self.print_summary(&summary);
        Ok(())
    }

    fn options(&self, ctx: &dyn Context) -> anyhow::Result<Options> {
        let cfg = ctx.get_config().context("loading config")?;
        let mut opts = Options::from_config(cfg, self.output.clone());

        if let Some(url) = &self.payload_url {
            opts.payload_url = url.clone();
        }
        if let Some(n) = self.concurrency {
            opts.dispatch.concurrency = usize::from(n);
        }
        if let Some(v) = self.interval {
            opts.dispatch.interval = v;
        }
        if self.timeout.is_some() {
            opts.dispatch.timeout = self.timeout;
        }
        if self.legacy_export {
            opts.export_policy = ExportPolicy::Legacy;
        }

        opts.command_builder = match ExecAdb::new(ctx, &cfg.adb) {
            Ok(adb) => adb.command_builder(),
            Err(e) if self.dry_run => {
                log::warn!("no usable adb ({}), dry run commands use plain `adb`", e);
                ExecAdb::default().command_builder()
            }
            Err(e) => return Err(e).context("locating adb"),
        };
        Ok(opts)
    }

    fn print_summary(&self, summary: &Summary) {
        let printer = Printer::new();
        if summary.activities.is_empty() {
            printer.println_colored(
                format!("No activities found in {}, no report written", summary.package),
                color::INTERESTING,
            );
            return;
        }

        let failed = summary
            .results
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .count();
        printer.println(format!(
            "{}: {} activities, {} attack surface, {} probes ({} failed)",
            summary.package,
            summary.activities.len(),
            summary.surface_count(),
            summary.results.len(),
            failed,
        ));
        if summary.cancelled {
            printer.println_colored(
                "The run was cancelled, unsent probes are marked as failed",
                color::INTERESTING,
            );
        }
        if !summary.results.is_empty() && !self.dry_run {
            printer.println_colored(
                "Launching an activity doesn't mean the payload loaded, check the device",
                color::GREY,
            );
        }
    }
}
