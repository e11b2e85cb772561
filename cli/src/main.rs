use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use flexi_logger::{FileSpec, LevelFilter, LogSpecification, Logger, LoggerHandle, WriteMode};

use surfprobe::DefaultContext;

mod activities;
use activities::Activities;

mod analyze;
use analyze::Analyze;

mod permissions;
use permissions::Permissions;

mod monitor;
mod printer;
mod utils;

const SIMPLE_VERSION_STRING: &str = include!(concat!(env!("OUT_DIR"), "/simple_version_string"));
const VERSION_STRING: &str = include!(concat!(env!("OUT_DIR"), "/version_string"));

const DEFAULT_LOG_FILE: &str = "surfprobe.log";

#[derive(Parser)]
#[command(name = "surfprobe")]
#[command(version(SIMPLE_VERSION_STRING))]
#[command(long_version(VERSION_STRING))]
struct Cli {
    /// `-e`, `--log-stderr`: Send logs to `stderr` instead of the log file
    #[arg(short = 'e', long, help = "Log to stderr instead of a file", action = clap::ArgAction::SetTrue, default_value_t = false)]
    log_stderr: bool,

    /// `-f`, `--log-file`: Where logs go, `surfprobe.log` in the working
    /// directory by default
    #[arg(short = 'f', long, help = "Send log output to the given file")]
    log_file: Option<PathBuf>,

    /// `-s`, `--log-spec`: A [flexi_logger](https://docs.rs/flexi_logger/latest/flexi_logger/struct.LogSpecification.html)
    /// log specification, overriding `--log-level`
    #[arg(short = 's', long, help = "Log spec for flexi_logger")]
    log_spec: Option<String>,

    /// `-l`, `--log-level`: Set the desired log verbosity. Defaults to 0, all values are listed
    /// below:
    ///
    /// | Value | Log Level |
    /// | ----- | --------- |
    /// | **0** | **Warn** |
    /// | 1 | Info |
    /// | 2 | Debug |
    /// | 3 | Trace |
    #[arg(
        short = 'l',
        long,
        help = "Set the log level, 0 = warn, 1 = info, etc",
        long_help = None,
        default_value_t = 0
    )]
    log_level: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the full version string and exit
    #[command()]
    Version,

    /// Find the activities of a package that outside apps can launch and
    /// send each of them the payload URL
    #[command()]
    Analyze(Analyze),

    /// Manage the permission protection levels used for classification
    #[command()]
    Permissions(Permissions),

    /// Show what the database recorded for a package
    #[command()]
    Activities(Activities),
}

impl Cli {
    fn log_level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn configure_loggers(&self) -> anyhow::Result<LoggerHandle> {
        let log_spec = match &self.log_spec {
            Some(s) => {
                LogSpecification::parse(s).with_context(|| format!("parsing log spec {}", s))?
            }
            None => LogSpecification::builder()
                .module("surfprobe", self.log_level_filter())
                .build(),
        };

        let mut logger = Logger::with(log_spec);

        if !self.log_stderr {
            let path = match &self.log_file {
                Some(v) if v.is_absolute() => Cow::Borrowed(v),
                Some(v) => Cow::Owned(std::env::current_dir()?.join(v)),
                None => Cow::Owned(std::env::current_dir()?.join(DEFAULT_LOG_FILE)),
            };

            logger = logger
                .log_to_file(FileSpec::try_from(path.as_ref()).with_context(|| "creating filespec")?)
                .append()
                .write_mode(WriteMode::BufferAndFlush);
        }

        logger.start().with_context(|| "starting logger")
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = &cli.command {
        println!("{}", VERSION_STRING);
        return Ok(());
    }

    let log_handle = cli.configure_loggers()?;
    log::info!("surfprobe {}", surfprobe::VERSION);

    let ctx = DefaultContext::new();

    let res = match &cli.command {
        Commands::Analyze(c) => c.run(&ctx),
        Commands::Permissions(c) => c.run(&ctx),
        Commands::Activities(c) => c.run(&ctx),

        Commands::Version => unreachable!(),
    };

    if let Err(e) = &res {
        log::error!("{:#}", e);
    }
    log_handle.flush();
    res
}
