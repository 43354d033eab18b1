//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use limitrange_common::kube_utils::create_client;
use limitrange_common::telemetry::{init_logging, LogFormat};

use crate::config::{validate_namespace_prefix, ConformanceConfig};
use crate::{scenario, Error, Result};

/// LimitRange conformance - verify LimitRange defaulting and admission
#[derive(Parser, Debug)]
#[command(name = "limitrange-conformance", version, about, long_about = None)]
pub struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, default_value = "text", value_parser = parse_log_format)]
    pub log_format: LogFormat,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scenario once against the current cluster
    ///
    /// Creates a uniquely named namespace, runs every step, prints a PASS/FAIL
    /// summary, and deletes the namespace again.
    Run(RunArgs),
}

/// Arguments for `run`
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Kubeconfig to use instead of the inferred one
    #[arg(long, env = "LIMITRANGE_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// YAML file overriding timings and fixture parameters
    #[arg(short = 'f', long = "config")]
    pub config_file: Option<PathBuf>,

    /// Namespace name prefix (the run id is appended)
    #[arg(long, value_parser = parse_namespace_prefix)]
    pub namespace_prefix: Option<String>,

    /// Leave the namespace in place after the run, for debugging
    #[arg(long)]
    pub keep_namespace: bool,
}

impl RunArgs {
    /// Defaults, overlaid with the config file, overlaid with flags
    pub fn resolve_config(&self) -> Result<ConformanceConfig> {
        let mut config = match &self.config_file {
            Some(path) => ConformanceConfig::load(path)?,
            None => ConformanceConfig::default(),
        };
        if let Some(prefix) = &self.namespace_prefix {
            config.namespace_prefix = prefix.clone();
        }
        if self.keep_namespace {
            config.keep_namespace = true;
        }
        config.validate()?;
        Ok(config)
    }
}

impl Cli {
    /// Install logging and run the selected command
    pub async fn run(self) -> Result<()> {
        init_logging(self.log_format)?;
        match self.command {
            Commands::Run(args) => run(args).await,
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.resolve_config()?;
    info!(
        kubeconfig = ?args.kubeconfig,
        namespace_prefix = %config.namespace_prefix,
        keep_namespace = config.keep_namespace,
        "Resolved configuration"
    );
    let client = create_client(args.kubeconfig.as_deref()).await?;
    scenario::run(client, &config).await
}

fn parse_log_format(s: &str) -> std::result::Result<LogFormat, String> {
    s.parse::<LogFormat>().map_err(|e: Error| e.to_string())
}

fn parse_namespace_prefix(s: &str) -> std::result::Result<String, String> {
    validate_namespace_prefix(s)
        .map(|()| s.to_string())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_flags() {
        let cli = Cli::try_parse_from([
            "limitrange-conformance",
            "--log-format",
            "json",
            "run",
            "--namespace-prefix",
            "lr-ci",
            "--keep-namespace",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Run(args) = cli.command;
        assert_eq!(args.namespace_prefix.as_deref(), Some("lr-ci"));
        assert!(args.keep_namespace);
    }

    #[test]
    fn test_invalid_prefix_rejected_at_parse_time() {
        let result = Cli::try_parse_from([
            "limitrange-conformance",
            "run",
            "--namespace-prefix",
            "Bad_Prefix",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let result = Cli::try_parse_from(["limitrange-conformance", "--log-format", "xml", "run"]);
        assert!(result.is_err());
    }

    /// Story: Flags win over defaults without a config file
    #[test]
    fn story_flags_override_defaults() {
        let args = RunArgs {
            namespace_prefix: Some("lr-flag".to_string()),
            keep_namespace: true,
            ..Default::default()
        };
        let config = args.resolve_config().unwrap();
        assert_eq!(config.namespace_prefix, "lr-flag");
        assert!(config.keep_namespace);
        assert_eq!(config.watch_timeout_secs, 120);
    }

    #[test]
    fn test_missing_config_file_is_config_error() {
        let args = RunArgs {
            config_file: Some(PathBuf::from("/nonexistent/limitrange.yaml")),
            ..Default::default()
        };
        assert!(matches!(args.resolve_config(), Err(Error::Config { .. })));
    }
}
