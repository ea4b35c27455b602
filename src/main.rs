//! IP List Validator CLI.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_ip_list_validator::prepare::{self, CleanOptions};
use zentinel_ip_list_validator::providers::abuseipdb::AbuseIPDBProvider;
use zentinel_ip_list_validator::providers::ReputationChecker;
use zentinel_ip_list_validator::throttle::Throttle;
use zentinel_ip_list_validator::{Config, ValidationRun};

#[derive(Parser, Debug)]
#[command(name = "zentinel-ip-list-validator")]
#[command(about = "Re-validate a malicious IP list against AbuseIPDB and prune addresses whose score dropped to zero")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ip-list-validator.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Clean, deduplicate and strip reserved ranges from the list, then exit
    #[arg(long)]
    clean: bool,

    /// Report malformed or duplicate lines in the list without changing it
    #[arg(long)]
    check_list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        let keys = config.credentials()?;
        info!(keys = keys.len(), "Configuration is valid");
        return Ok(());
    }

    // Handle --check-list
    if args.check_list {
        let issues = prepare::check_file(&config.paths.list)?;
        for issue in &issues {
            println!("{}", issue);
        }
        if !issues.is_empty() {
            anyhow::bail!(
                "{} problem(s) found in {}",
                issues.len(),
                config.paths.list.display()
            );
        }
        println!("{}: no problems found", config.paths.list.display());
        return Ok(());
    }

    // Handle --clean
    if args.clean {
        let options = CleanOptions::from(&config.prepare);
        let report = prepare::clean_file(
            &config.paths.list,
            &options,
            config.prepare.reserved_report.as_deref(),
        )?;
        println!(
            "Cleaned {}: kept {}, dropped {} duplicates, {} reserved, {} invalid",
            config.paths.list.display(),
            report.addresses.len(),
            report.duplicates,
            report.reserved.len(),
            report.invalid
        );
        if let Some(backup) = &report.backup {
            println!("Original saved to {}", backup.display());
        }
        return Ok(());
    }

    let provider = AbuseIPDBProvider::new(&config.abuseipdb)?;
    let checker = ReputationChecker::new(
        provider,
        Throttle::new(config.abuseipdb.request_interval()),
    );

    let mut run = ValidationRun::new(
        config.run_paths(),
        config.credentials()?,
        config.abuseipdb.max_per_key,
        checker,
    );

    let summary = run.execute().await?;
    println!("{}", summary);

    Ok(())
}
