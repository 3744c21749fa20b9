//! es-migrate CLI - copy an index between Elasticsearch-compatible clusters.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use es_migrate::{
    health_check, Config, MigrateError, MigrationController, MigrationResult, Session, StopHandle,
};
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "es-migrate")]
#[command(about = "Migrate documents between Elasticsearch-compatible clusters")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds to wait for writers to drain after a stop signal
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the source index into the destination index
    Migrate {
        /// Override source cluster URL
        #[arg(long)]
        source_url: Option<String>,

        /// Override source index
        #[arg(long)]
        source_index: Option<String>,

        /// Override destination cluster URL
        #[arg(long)]
        dest_url: Option<String>,

        /// Override destination user
        #[arg(long)]
        dest_user: Option<String>,

        /// Override destination password
        #[arg(long)]
        dest_password: Option<String>,

        /// Override destination index
        #[arg(long)]
        dest_index: Option<String>,

        /// Maximum number of documents to copy (0 = all)
        #[arg(long)]
        limit: Option<u64>,

        /// Override number of bulk writers
        #[arg(long)]
        workers: Option<usize>,

        /// Override documents per bulk request
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override number of source slices
        #[arg(long)]
        slices: Option<u32>,

        /// Override documents per cursor page
        #[arg(long)]
        page_size: Option<usize>,

        /// Override retries for transient failures
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Test connectivity to both clusters
    HealthCheck,
}

/// Values given on the command line win over the configuration file.
#[derive(Default)]
struct Overrides {
    source_url: Option<String>,
    source_index: Option<String>,
    dest_url: Option<String>,
    dest_user: Option<String>,
    dest_password: Option<String>,
    dest_index: Option<String>,
    limit: Option<u64>,
    workers: Option<usize>,
    batch_size: Option<usize>,
    slices: Option<u32>,
    page_size: Option<usize>,
    max_retries: Option<u32>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.source_url {
            config.source.url = url;
        }
        if let Some(index) = self.source_index {
            config.migration.source_index = index;
        }
        if let Some(url) = self.dest_url {
            config.destination.url = url;
        }
        if let Some(user) = self.dest_user {
            config.destination.user = user;
        }
        if let Some(password) = self.dest_password {
            config.destination.password = password;
        }
        if let Some(index) = self.dest_index {
            config.migration.dest_index = index;
        }
        if let Some(limit) = self.limit {
            config.migration.item_budget = limit;
        }
        if let Some(w) = self.workers {
            config.migration.workers = Some(w);
            // Keep the writer buffer in step with an explicit worker count
            config.migration.write_buffer = None;
        }
        if let Some(size) = self.batch_size {
            config.migration.batch_size = size;
        }
        if let Some(slices) = self.slices {
            config.migration.slices = slices;
        }
        if let Some(size) = self.page_size {
            config.migration.page_size = size;
        }
        if let Some(retries) = self.max_retries {
            config.migration.max_retries = retries;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = load_config(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Migrate {
            source_url,
            source_index,
            dest_url,
            dest_user,
            dest_password,
            dest_index,
            limit,
            workers,
            batch_size,
            slices,
            page_size,
            max_retries,
        } => {
            Overrides {
                source_url,
                source_index,
                dest_url,
                dest_user,
                dest_password,
                dest_index,
                limit,
                workers,
                batch_size,
                slices,
                page_size,
                max_retries,
            }
            .apply(&mut config);
            config.validate()?;
            let config = config.with_auto_tuning();

            let session = Session::from_config(&config)?;
            let controller = MigrationController::new(session, config.to_job());
            let stop = controller.stop_handle();
            setup_signal_handler(stop.clone());

            let outcome = run_until_drained(&controller, &stop, cli.shutdown_timeout).await;
            let result = match outcome {
                Ok(result) => result,
                Err(MigrateError::JobFailed { result }) => {
                    print_result(&result, cli.output_json)?;
                    return Err(MigrateError::JobFailed { result });
                }
                Err(e) => return Err(e),
            };
            print_result(&result, cli.output_json)?;
        }

        Commands::HealthCheck => {
            config.validate()?;
            let result = health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for (label, health) in [("Source", &result.source), ("Destination", &result.destination)] {
                    println!(
                        "  {} ({}): {} ({}ms)",
                        label,
                        health.endpoint,
                        if health.connected { "OK" } else { "FAILED" },
                        health.latency_ms
                    );
                    if let Some(ref version) = health.version {
                        println!("    Version: {}", version);
                    }
                    if let Some(ref err) = health.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                let failed = if result.source.connected {
                    &result.destination
                } else {
                    &result.source
                };
                return Err(MigrateError::connectivity(
                    failed.endpoint.clone(),
                    failed.error.clone().unwrap_or_else(|| "health check failed".into()),
                ));
            }
        }
    }

    Ok(())
}

/// Read the configuration file; a missing or unreadable file is a configuration error.
fn load_config(path: &Path) -> Result<Config, MigrateError> {
    Config::load_unvalidated(path).map_err(|e| match e {
        MigrateError::Io(io) => {
            MigrateError::Config(format!("cannot read {}: {}", path.display(), io))
        }
        other => other,
    })
}

/// Run the migration; after a stop signal, give it `shutdown_timeout` seconds to drain.
async fn run_until_drained(
    controller: &MigrationController,
    stop: &StopHandle,
    shutdown_timeout: u64,
) -> Result<MigrationResult, MigrateError> {
    let migrate = controller.migrate();
    tokio::pin!(migrate);
    let stopped = stop.token();

    tokio::select! {
        result = &mut migrate => result,
        _ = stopped.cancelled() => {
            match tokio::time::timeout(Duration::from_secs(shutdown_timeout), &mut migrate).await {
                Ok(result) => result,
                Err(_) => Err(MigrateError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("writers did not drain within {}s of the stop request", shutdown_timeout),
                ))),
            }
        }
    }
}

fn print_result(result: &MigrationResult, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    println!("\nMigration {}!", result.status);
    println!("  Run ID: {}", result.run_id);
    println!("  Stop reason: {}", result.stop_reason);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Documents: {} scrolled, {} written, {} errored (estimated {})",
        result.scrolled, result.written, result.errored, result.estimated_total
    );
    println!("  Throughput: {:.0} docs/sec", result.docs_per_second);
    for failure in result.failures.iter().take(10) {
        println!("  Rejected: {}", failure);
    }
    for error in &result.errors {
        println!("  Error: {}", error);
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so that --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Route SIGINT (Ctrl-C) and SIGTERM (container shutdown) to the job's stop entry point.
#[cfg(unix)]
fn setup_signal_handler(stop: StopHandle) {
    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Stopping and draining writers...", name);
            stop.stop(format!("interrupted by {}", name));
        });
    }
}

/// Ctrl-C only outside unix.
#[cfg(not(unix))]
fn setup_signal_handler(stop: StopHandle) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Stopping and draining writers...");
        stop.stop("interrupted by Ctrl-C");
    });
}
