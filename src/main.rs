//! CLI entry point: wires the gateway's collaborators together and
//! either serves HTTP, resolves a single plan, or validates a plan file
//! read from disk.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};

use gateway::admission::AdmissionPipeline;
use gateway::api::{self, AppState};
use gateway::auth::JwtTokenVerifier;
use gateway::cache::Cache;
use gateway::circuit_breaker::CircuitBreakerTable;
use gateway::config::GatewayConfig;
use gateway::executors::http::{GatewayStepExecutor, HttpDownstreamClient};
use gateway::orchestrator::Orchestrator;
use gateway::planner::RuleBasedPlanner;
use gateway::protocol::Principal;
use gateway::quota::QuotaKeeper;
use gateway::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "AI-assisted API gateway: admits, plans, and executes intents.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the HTTP server.
    Serve {
        #[arg(long, default_value = "8080")]
        port: u16,
        #[arg(long, default_value = "false")]
        otel: bool,
        #[arg(long)]
        otel_endpoint: Option<String>,
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },
    /// Resolves a plan for an intent without executing it, and prints it
    /// to stdout as JSON.
    PlanOnly {
        #[arg(long)]
        intent: String,
        #[arg(long, default_value = "cli-user")]
        user_id: String,
    },
    /// Validates a plan JSON file against invariant I1 (step ordering).
    ValidatePlan {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, otel, otel_endpoint, silent, verbose } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level =
                if silent { Level::ERROR } else if verbose { Level::DEBUG } else { Level::INFO };
            if otel {
                telemetry_config.otlp_endpoint =
                    otel_endpoint.or(telemetry_config.otlp_endpoint).or_else(|| Some("http://localhost:4317".to_string()));
            }
            if let Err(e) = init_telemetry(telemetry_config) {
                if !silent {
                    eprintln!("Warning: failed to initialize telemetry: {e}");
                }
                let _ =
                    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
            }

            serve(port).await;
            shutdown_telemetry();
        }
        Commands::PlanOnly { intent, user_id } => {
            let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
            let orchestrator = build_orchestrator(&GatewayConfig::from_env());
            let principal = Principal { user_id, roles: vec![] };
            match orchestrator.plan(&intent, &principal).await {
                Ok(plan) => println!("{}", serde_json::to_string_pretty(&plan).expect("plan always serializes")),
                Err(e) => {
                    error!(error = %e, "failed to resolve plan");
                    std::process::exit(1);
                }
            }
        }
        Commands::ValidatePlan { file } => {
            let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
            let plan = match gateway::loader::load_plan_from_file(&file) {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "failed to load plan");
                    std::process::exit(1);
                }
            };
            match gateway::validation::validate_plan(&plan) {
                Ok(()) => println!("plan is valid"),
                Err(errors) => {
                    error!("plan validation failed with {} error(s):", errors.len());
                    for err in &errors {
                        error!("  - {err}");
                    }
                    std::process::exit(1);
                }
            }
        }
    }
}

fn build_orchestrator(config: &GatewayConfig) -> Orchestrator {
    let client = Arc::new(HttpDownstreamClient::new(config.service_urls.clone()));
    let breaker = Arc::new(CircuitBreakerTable::default());
    let mut executor = GatewayStepExecutor::new(client, breaker);
    for (service, policy) in &config.resilience.service_policies {
        executor = executor.with_service_policy(service.clone(), policy.clone());
    }
    let cache = Arc::new(Cache::with_limits(config.cache.plan_ttl, config.cache.max_entries, config.cache.max_bytes));
    let audit = Arc::new(gateway::audit::InMemoryAuditSink::new());

    Orchestrator::new(Arc::new(RuleBasedPlanner::new()), Arc::new(executor), cache, audit)
}

async fn serve(port: u16) {
    let config = GatewayConfig::from_env();

    let token_verifier =
        Arc::new(JwtTokenVerifier::new(&config.auth.secret_key, &config.auth.issuer, &config.auth.audience));
    let daily_limit = if config.rate_limit.enabled { config.rate_limit.daily_limit } else { u32::MAX };
    let quota = Arc::new(QuotaKeeper::new(daily_limit));
    let audit = Arc::new(gateway::audit::InMemoryAuditSink::new());
    let admission = Arc::new(AdmissionPipeline::new(token_verifier, quota, audit));

    let orchestrator = Arc::new(build_orchestrator(&config));
    let state = Arc::new(AppState { admission, orchestrator });
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "gateway listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind address");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
    }
}
