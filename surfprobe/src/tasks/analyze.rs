use std::path::PathBuf;
use std::sync::Arc;

use crate::classify::{classify_with_policy, declared_permissions, ChainedLookup};
use crate::db::{Database, StoredLevels};
use crate::dispatch::{dispatch_with, CommandExecutor, DispatchEvent, DispatchOptions};
use crate::intent::CommandBuilder;
use crate::normalize::normalize_with_resolver;
use crate::report::open_report;
use crate::tasks::{EventMonitor, TaskCancelCheck};
use crate::utils::path_str;
use crate::{
    ActivityRecord, ExportPolicy, ManifestSource, ProbeConfig, ProbeResult, ProtectionLookup,
    Verdict,
};

pub struct Options {
    pub payload_url: String,
    pub export_policy: ExportPolicy,
    pub dispatch: DispatchOptions,
    pub command_builder: CommandBuilder,
    /// `.xlsx` or `.csv` report location
    pub output: PathBuf,
}

impl Options {
    pub fn from_config(cfg: &ProbeConfig, output: PathBuf) -> Self {
        Self {
            payload_url: cfg.payload_url.clone(),
            export_policy: cfg.export_policy,
            dispatch: DispatchOptions {
                concurrency: cfg.concurrency,
                interval: cfg.interval,
                timeout: cfg.timeout,
            },
            command_builder: CommandBuilder::default(),
            output,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Normalized { package: String, activities: usize },
    Classified { surfaces: usize },
    ProbesBuilt { commands: usize },
    Dispatch(DispatchEvent),
    ReportSaved { path: PathBuf },
}

/// What an analysis run found and did
pub struct Summary {
    pub package: String,
    pub activities: Vec<(ActivityRecord, Verdict)>,
    pub results: Vec<ProbeResult>,
    /// Where the report went, `None` if there was nothing to report
    pub report: Option<PathBuf>,
    pub cancelled: bool,
}

impl Summary {
    pub fn surface_count(&self) -> usize {
        self.activities.iter().filter(|(_, v)| v.is_surface).count()
    }
}

struct DispatchForwarder<'a>(&'a dyn EventMonitor<Event>);

impl<'a> EventMonitor<DispatchEvent> for DispatchForwarder<'a> {
    fn on_event(&self, evt: DispatchEvent) {
        self.0.on_event(Event::Dispatch(evt))
    }
}

struct AnalyzeTask<'a> {
    source: &'a dyn ManifestSource,
    store: Option<&'a dyn Database>,
    executor: Arc<dyn CommandExecutor>,
    mon: &'a dyn EventMonitor<Event>,
    cancel: &'a TaskCancelCheck,
    opts: &'a Options,
}

/// Run the whole analysis of one package
///
/// The manifest is normalized and classified, rows go to `store` (if any)
/// and the report, and every surfaced activity is probed with `executor`.
pub fn analyze(
    source: &dyn ManifestSource,
    store: Option<&dyn Database>,
    executor: Arc<dyn CommandExecutor>,
    mon: &dyn EventMonitor<Event>,
    cancel: &TaskCancelCheck,
    opts: &Options,
) -> crate::Result<Summary> {
    let task = AnalyzeTask {
        source,
        store,
        executor,
        mon,
        cancel,
        opts,
    };
    task.run()
}

impl<'a> AnalyzeTask<'a> {
    fn run(self) -> crate::Result<Summary> {
        let manifest = self.source.manifest();
        let resolver = self.source.resolver();
        let package = self.source.package_name();

        let records = normalize_with_resolver(manifest, &package, resolver);
        log::info!("found {} activities in {}", records.len(), package);
        self.mon.on_event(Event::Normalized {
            package: package.clone(),
            activities: records.len(),
        });

        let mut summary = Summary {
            package,
            activities: Vec::new(),
            results: Vec::new(),
            report: None,
            cancelled: false,
        };

        if records.is_empty() {
            log::warn!("no activities in {}, nothing to report", summary.package);
            return Ok(summary);
        }

        self.cancel.check()?;

        let declared = declared_permissions(manifest, resolver);
        let stored = self.store.map(StoredLevels::load).transpose()?;
        let mut lookups: Vec<&dyn ProtectionLookup> = Vec::with_capacity(2);
        if let Some(stored) = stored.as_ref() {
            lookups.push(stored);
        }
        lookups.push(&declared);
        let lookup = ChainedLookup::new(lookups);

        for record in records {
            let verdict = classify_with_policy(&record, &lookup, self.opts.export_policy);
            if let Some(store) = self.store {
                store.upsert_activity(&summary.package, &record, Some(&verdict))?;
            }
            summary.activities.push((record, verdict));
        }

        let surfaces = summary.surface_count();
        log::info!("{} of {} activities are reachable", surfaces, summary.activities.len());
        self.mon.on_event(Event::Classified { surfaces });

        let mut report = open_report(&self.opts.output)?;
        for (record, verdict) in &summary.activities {
            report.write_analysis(record, verdict)?;
        }

        let commands: Vec<_> = summary
            .activities
            .iter()
            .flat_map(|(record, verdict)| {
                self.opts.command_builder.build(
                    record,
                    verdict,
                    &summary.package,
                    &self.opts.payload_url,
                )
            })
            .collect();
        self.mon.on_event(Event::ProbesBuilt {
            commands: commands.len(),
        });

        if commands.is_empty() {
            log::info!("no attack surface in {}, skipping probes", summary.package);
        } else {
            summary.results = dispatch_with(
                commands,
                &self.opts.dispatch,
                Arc::clone(&self.executor),
                self.cancel,
                &DispatchForwarder(self.mon),
            );
            summary.cancelled = self.cancel.was_cancelled();
            for res in &summary.results {
                report.write_probe_result(res)?;
            }
        }

        report.save()?;
        log::info!("report saved to {}", path_str(&self.opts.output));
        self.mon.on_event(Event::ReportSaved {
            path: self.opts.output.clone(),
        });
        summary.report = Some(self.opts.output.clone());

        Ok(summary)
    }
}
