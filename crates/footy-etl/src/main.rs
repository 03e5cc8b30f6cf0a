//! Footy ETL - football open data pipeline

use anyhow::Result;
use clap::{ArgGroup, Parser};
use footy_common::logging::{init_logging, LogConfig, LogLevel};
use footy_etl::config::EtlConfig;
use footy_etl::models::RunMode;
use footy_etl::pipeline::Pipeline;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "footy-etl")]
#[command(author, version, about = "Football open data ETL")]
#[command(group(ArgGroup::new("mode").required(true).args(["update", "no_update"])))]
struct Cli {
    /// Only refresh competitions and matches changed since the last run
    #[arg(long)]
    update: bool,

    /// Extract and load everything in scope
    #[arg(long)]
    no_update: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.update {
            RunMode::Update
        } else {
            RunMode::Full
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("footy-etl")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = EtlConfig::load()?;
    let mode = cli.mode();
    info!(%mode, data_dir = %config.data_dir.display(), "Starting ETL");

    let report = Pipeline::from_config(config)?.run(mode).await?;

    if report.is_clean() {
        info!(matches = report.match_ids.len(), "End of the ETL");
    } else {
        for failure in &report.failures {
            warn!(%failure, "Recorded failure");
        }
        warn!(failures = report.failures.len(), completed = report.completed, "End of the ETL with failures");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flag_is_required() {
        assert!(Cli::try_parse_from(["footy-etl"]).is_err());
        assert!(Cli::try_parse_from(["footy-etl", "--update", "--no-update"]).is_err());
    }

    #[test]
    fn test_mode_selection() {
        let cli = Cli::try_parse_from(["footy-etl", "--update"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Update);

        let cli = Cli::try_parse_from(["footy-etl", "--no-update", "-v"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Full);
        assert!(cli.verbose);
    }
}
