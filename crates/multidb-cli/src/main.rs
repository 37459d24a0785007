//! multidb CLI - inspect and exercise a multidb configuration.

use clap::{Parser, Subcommand};
use multidb::{
    Config, ConnectionFactory, ConnectionTarget, DataError, Database, DriverConnector,
    EntityMetadata, ProviderIdentity, ProviderServiceRegistry, SkipReason, SyntaxProvider,
    TableCreation, TenancyMode, TenancyResolver,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "multidb")]
#[command(about = "Multi-dialect data access: providers, tenancy and table generation")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "multidb.yaml", global = true)]
    config: PathBuf,

    /// Output JSON to stdout
    #[arg(long, global = true)]
    json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in providers and their capabilities
    Providers,

    /// Load and validate the configuration file
    Validate,

    /// Show the connection targets of a handle (passwords masked)
    Resolve {
        /// Logical instance name
        handle: String,
    },

    /// Print CREATE TABLE statements for a handle's provider
    Ddl {
        /// Logical instance name
        handle: String,

        /// Entity metadata YAML file
        #[arg(short, long)]
        entity: PathBuf,
    },

    /// Create a table on every target of a handle unless it exists
    CreateTable {
        /// Logical instance name
        handle: String,

        /// Entity metadata YAML file
        #[arg(short, long)]
        entity: PathBuf,
    },

    /// Connect to every configured target and run a probe query
    HealthCheck,
}

#[derive(Serialize)]
struct ProviderReport {
    name: String,
    engine: &'static str,
    capabilities: Vec<&'static str>,
    connectable: bool,
}

#[derive(Serialize)]
struct TargetReport {
    key: Option<String>,
    provider: String,
    connection_string: String,
}

#[derive(Serialize)]
struct ResolveReport {
    handle: String,
    mode: &'static str,
    targets: Vec<TargetReport>,
}

#[derive(Serialize)]
struct CreateTableReport {
    database: String,
    outcome: String,
}

#[derive(Serialize)]
struct TargetHealth {
    database: String,
    provider: String,
    connected: bool,
    latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
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

async fn run() -> Result<(), DataError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(DataError::Config)?;

    let registry = Arc::new(ProviderServiceRegistry::with_builtins());

    // Listing providers needs no configuration file
    if let Commands::Providers = cli.command {
        return list_providers(&registry, cli.json);
    }

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    let resolver = TenancyResolver::from_config(&config)?;

    match cli.command {
        Commands::Providers => unreachable!(), // Handled above

        Commands::Validate => {
            let handles = resolver.handles();
            if cli.json {
                println!(
                    "{}",
                    to_json(&serde_json::json!({
                        "valid": true,
                        "instances": handles,
                        "default_instance": resolver.default_handle(),
                    }))?
                );
            } else {
                println!("Configuration is valid");
                println!("  Instances: {}", handles.join(", "));
                if let Some(default) = resolver.default_handle() {
                    println!("  Default: {}", default);
                }
            }
        }

        Commands::Resolve { handle } => {
            let descriptor = resolver.descriptor(&handle)?;
            let shards = resolver.shards(&handle)?;
            let distributed = descriptor.mode() == TenancyMode::Distributed;
            let report = ResolveReport {
                handle: handle.clone(),
                mode: descriptor.mode().as_str(),
                targets: shards
                    .into_iter()
                    .map(|shard| TargetReport {
                        key: distributed.then_some(shard.key),
                        provider: shard.target.provider().to_string(),
                        connection_string: shard.target.masked(),
                    })
                    .collect(),
            };

            if cli.json {
                println!("{}", to_json(&report)?);
            } else {
                println!("{} ({})", report.handle, report.mode);
                for target in &report.targets {
                    match &target.key {
                        Some(key) => println!(
                            "  [{}] {}: {}",
                            key, target.provider, target.connection_string
                        ),
                        None => println!("  {}: {}", target.provider, target.connection_string),
                    }
                }
            }
        }

        Commands::Ddl { handle, entity } => {
            let entity = load_entity(&entity)?;
            let mut providers: Vec<ProviderIdentity> = Vec::new();
            for shard in resolver.shards(&handle)? {
                if !providers.contains(shard.target.provider()) {
                    providers.push(shard.target.provider().clone());
                }
            }

            for provider in &providers {
                let syntax = registry.get_service::<dyn SyntaxProvider>(provider)?;
                if providers.len() > 1 {
                    println!("-- {}", provider);
                }
                for statement in syntax.create_table_sql(&entity) {
                    println!("{};", statement);
                }
            }
        }

        Commands::CreateTable { handle, entity } => {
            let entity = load_entity(&entity)?;
            let connector = DriverConnector::new();
            let databases = match resolver.descriptor(&handle)?.mode() {
                TenancyMode::Single => {
                    vec![Database::open(&handle, &resolver, registry.clone(), &connector).await?]
                }
                TenancyMode::Distributed => {
                    Database::open_shards(&handle, &resolver, registry.clone(), &connector).await?
                }
            };

            let mut reports = Vec::with_capacity(databases.len());
            for db in &databases {
                let outcome = db.try_create_table(Some(&entity)).await?;
                info!("{}: {}", db.handle(), describe_creation(&outcome));
                reports.push(CreateTableReport {
                    database: db.handle().to_string(),
                    outcome: describe_creation(&outcome),
                });
                db.close().await?;
            }

            if cli.json {
                println!("{}", to_json(&reports)?);
            } else {
                for report in &reports {
                    println!("  {}: {}", report.database, report.outcome);
                }
            }
        }

        Commands::HealthCheck => {
            let connector = DriverConnector::new();
            let mut results = Vec::new();
            for handle in resolver.handles() {
                let distributed =
                    resolver.descriptor(&handle)?.mode() == TenancyMode::Distributed;
                for shard in resolver.shards(&handle)? {
                    let name = if distributed {
                        format!("{}/{}", handle, shard.key)
                    } else {
                        handle.clone()
                    };
                    results.push(
                        probe(name, shard.target, registry.clone(), &connector).await,
                    );
                }
            }

            let healthy = results.iter().all(|r| r.connected);
            if cli.json {
                println!(
                    "{}",
                    to_json(&serde_json::json!({
                        "healthy": healthy,
                        "targets": results,
                    }))?
                );
            } else {
                println!("Health Check Results:");
                for result in &results {
                    println!(
                        "  {} ({}): {} ({}ms)",
                        result.database,
                        result.provider,
                        if result.connected { "OK" } else { "FAILED" },
                        result.latency_ms
                    );
                    if let Some(ref err) = result.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(DataError::connection(
                    "health check",
                    "one or more targets are unreachable",
                ));
            }
        }
    }

    Ok(())
}

fn list_providers(registry: &ProviderServiceRegistry, json: bool) -> Result<(), DataError> {
    let connectable = DriverConnector::engines();
    let reports: Vec<ProviderReport> = registry
        .providers()
        .into_iter()
        .map(|provider| ProviderReport {
            name: provider.name().to_string(),
            engine: provider.engine().name(),
            capabilities: registry
                .dispatch()
                .get(&provider)
                .map(|set| set.capability_names())
                .unwrap_or_default(),
            connectable: connectable.contains(&provider.engine()),
        })
        .collect();

    if json {
        println!("{}", to_json(&reports)?);
    } else {
        println!("Providers:");
        for report in &reports {
            println!(
                "  {:<14} {:<11} {}{}",
                report.name,
                report.engine,
                report.capabilities.join(", "),
                if report.connectable { "" } else { " (dialect only)" }
            );
        }
    }
    Ok(())
}

async fn probe(
    name: String,
    target: ConnectionTarget,
    registry: Arc<ProviderServiceRegistry>,
    connector: &DriverConnector,
) -> TargetHealth {
    let provider = target.provider().to_string();
    let result = match connector.connect(&target).await {
        Ok(connection) => {
            let db = Database::new(name.clone(), target, registry, connection);
            let latency = db.ping().await;
            let _ = db.close().await;
            latency
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(latency) => TargetHealth {
            database: name,
            provider,
            connected: true,
            latency_ms: latency.as_millis() as u64,
            error: None,
        },
        Err(e) => {
            warn!("{} is unreachable: {}", name, e);
            TargetHealth {
                database: name,
                provider,
                connected: false,
                latency_ms: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

fn load_entity(path: &Path) -> Result<EntityMetadata, DataError> {
    let entity = EntityMetadata::load(path)?;
    info!("Loaded entity {} from {:?}", entity.full_name(), path);
    Ok(entity)
}

fn describe_creation(outcome: &TableCreation) -> String {
    match outcome {
        TableCreation::Created { statements } => {
            format!("created ({} statements)", statements.len())
        }
        TableCreation::AlreadyExists => "already exists".to_string(),
        TableCreation::Skipped(SkipReason::NoMetadata) => "skipped: no metadata".to_string(),
        TableCreation::Skipped(SkipReason::NoSyntaxProvider) => {
            "skipped: provider has no syntax helper".to_string()
        }
        TableCreation::Skipped(SkipReason::NoColumns) => "skipped: no columns".to_string(),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DataError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| DataError::Config(format!("JSON output failed: {}", e)))
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so `--json` output stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    result.map_err(|e| format!("failed to install logger: {}", e))
}
