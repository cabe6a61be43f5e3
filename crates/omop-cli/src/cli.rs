//! CLI argument definitions for the OMOP ETL.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{ColorChoice, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colorchoice_clap::Color;
use tracing::level_filters::LevelFilter;

use crate::logging::{LogConfig, LogFormat};

#[derive(Parser)]
#[command(
    name = "omop-etl",
    version,
    about = "Load ICU source data into an OMOP CDM v5.4 database",
    long_about = "Load ICU source data into an OMOP CDM v5.4 database.\n\n\
                  Pipeline settings come from the environment (HOSPITAL_SHAK_CODE,\n\
                  DEPARTMENT_SHAK_CODE, ETL_RUN_STEP, MERGE_SCHEMAS, ...)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for debug, -vv for trace, -q for warnings).
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "verbosity", value_enum, global = true, ignore_case = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the ETL for one site.
    RunEtl(RunArgs),

    /// Merge the per-site schemas named in MERGE_SCHEMAS.
    RunMerge(RunArgs),

    /// List the steps of a run with their ordinals.
    Steps(StepsArgs),
}

#[derive(Parser)]
pub struct RunArgs {
    /// JSON connection file: {dbms, server, port, dbname, user, password}.
    #[arg(
        long = "conn-file",
        alias = "conn_file",
        value_name = "PATH",
        required_unless_present = "dry_run"
    )]
    pub conn_file: Option<PathBuf>,

    /// Generate the SQL script without connecting to a database.
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Parser)]
pub struct StepsArgs {
    /// List the merge steps instead of the site ETL steps.
    #[arg(long = "merge")]
    pub merge: bool,
}

/// Log levels accepted by `--verbosity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevelArg {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING", alias = "WARN")]
    Warning,
    #[value(name = "ERROR")]
    Error,
}

impl LogLevelArg {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Warning => LevelFilter::WARN,
            LogLevelArg::Error => LevelFilter::ERROR,
        }
    }
}

/// CLI log format choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl Cli {
    /// Logging configuration from the flags, `--verbosity` taking
    /// precedence over `-v/-q`.
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig {
            level_filter: self.verbose.tracing_level_filter(),
            ..LogConfig::default()
        };
        config.use_env_filter = !(self.verbose.is_present() || self.log_level.is_some());
        if let Some(level) = self.log_level {
            config.level_filter = level.level_filter();
        }
        config.format = match self.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        };
        config.log_file = self.log_file.clone();
        config.with_ansi = match self.color.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => self.log_file.is_none() && io::stderr().is_terminal(),
        };
        config
    }
}
