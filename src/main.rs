//! LUN Reconciler
//!
//! Reads a desired-state parameter document, converges the storage
//! controller on it and prints the result document as JSON on stdout.
//! Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lun_reconciler::{ConnectionConfig, LunParams, Reconciler, ReconcilerConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LUN Reconciler - declarative LUN management for ONTAP controllers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Parameter document (YAML or JSON)
    #[arg(long, env = "LUN_PARAMS")]
    params: std::path::PathBuf,

    /// Controller hostname or address
    #[arg(long, env = "NETAPP_HOSTNAME")]
    hostname: String,

    /// Controller username
    #[arg(long, env = "NETAPP_USERNAME", default_value = "admin")]
    username: String,

    /// Controller password
    #[arg(long, env = "NETAPP_PASSWORD", hide_env_values = true)]
    password: String,

    /// Use HTTPS
    #[arg(long, env = "NETAPP_HTTPS", default_value = "true", action = clap::ArgAction::Set)]
    https: bool,

    /// Verify the controller certificate
    #[arg(long, env = "NETAPP_VALIDATE_CERTS", default_value = "true", action = clap::ArgAction::Set)]
    validate_certs: bool,

    /// Port override
    #[arg(long, env = "NETAPP_PORT")]
    port: Option<u16>,

    /// ONTAPI version announced in ZAPI requests
    #[arg(long, env = "NETAPP_ONTAPI_VERSION", default_value = "1.110")]
    ontapi_version: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "NETAPP_TIMEOUT_SECS", default_value = "60")]
    timeout_secs: u64,

    /// Decide without changing anything
    #[arg(long, env = "CHECK_MODE")]
    check_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting LUN Reconciler");
    info!("  Version: {}", lun_reconciler::VERSION);
    info!("  Controller: {}", args.hostname);
    info!("  Check mode: {}", args.check_mode);

    match run(&args).await {
        Ok(document) => println!("{}", document),
        Err(e) => {
            error!("Reconciliation failed: {:#}", e);
            let failure = serde_json::json!({
                "failed": true,
                "changed": false,
                "msg": format!("{:#}", e),
            });
            println!("{}", failure);
            std::process::exit(1);
        }
    }
}

async fn run(args: &Args) -> anyhow::Result<String> {
    let desired = LunParams::from_file(&args.params)
        .with_context(|| format!("reading parameters from {}", args.params.display()))?
        .into_desired()?;

    let connection = ConnectionConfig {
        hostname: args.hostname.clone(),
        port: args.port,
        https: args.https,
        validate_certs: args.validate_certs,
        username: args.username.clone(),
        password: args.password.clone(),
        timeout_secs: args.timeout_secs,
    };
    let config = ReconcilerConfig {
        check_mode: args.check_mode,
        ..Default::default()
    };

    let reconciler = Reconciler::connect(config, &connection, &args.ontapi_version, &desired)
        .context("connecting to the storage controller")?;
    let outcome = reconciler.reconcile(&desired).await?;

    Ok(serde_json::to_string(&outcome)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
