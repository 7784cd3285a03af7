//! SACCO Suite — multi-tenant back office for cooperative
//! savings-and-loan organizations.
//!
//! Main entry point: loads configuration, opens the system database,
//! wires the tenancy subsystem, and starts the API server.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};

use sacco_api::{ApiServer, ApiState, SessionManager};
use sacco_core::config::AppConfig;
use sacco_quota::{log_notifier, ResourceQuotaTracker};
use sacco_storage::{demo_tenants, ConnectionRouter, ProtectedTableRegistry, SqliteSystemStore};
use sacco_tenancy::{ContextAuditTrail, ContextOrchestrator, TenantDirectory, TenantResolver};

#[derive(Parser, Debug)]
#[command(name = "sacco-suite")]
#[command(about = "Multi-tenant back office for cooperative savings-and-loan organizations")]
#[command(version)]
struct Cli {
    /// Instance identifier (overrides config)
    #[arg(long, env = "SACCO_SUITE__INSTANCE_ID")]
    instance_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "SACCO_SUITE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Apex domain tenants hang off of (overrides config)
    #[arg(long, env = "SACCO_SUITE__TENANCY__MAIN_DOMAIN")]
    main_domain: Option<String>,

    /// Directory holding the system and tenant databases
    #[arg(long, env = "SACCO_SUITE__DATA_DIR")]
    data_dir: Option<String>,

    /// Keep every database in memory (development and demos)
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Seed demo cooperatives and staff credentials on startup
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("SACCO Suite starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(instance_id) = cli.instance_id {
        config.instance_id = instance_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(domain) = cli.main_domain {
        config.tenancy.main_domain = domain;
    }
    if let Some(dir) = cli.data_dir {
        config.database.system_url = format!("sqlite://{dir}/sacco-system.db?mode=rwc");
        config.database.tenant_data_dir = Some(format!("{dir}/tenants"));
    }
    if cli.in_memory {
        config.database.system_url = "sqlite::memory:".to_string();
        config.database.tenant_data_dir = None;
    }

    info!(
        instance_id = %config.instance_id,
        http_port = config.api.http_port,
        main_domain = %config.tenancy.main_domain,
        system_db = %config.database.system_url,
        "Configuration loaded"
    );

    if let Some(dir) = &config.database.tenant_data_dir {
        std::fs::create_dir_all(dir)?;
    }

    // System database: tenant directory and metered usage.
    let store = Arc::new(SqliteSystemStore::bootstrap(&config.database).await?);

    let sessions = Arc::new(SessionManager::new(&config.security));
    if cli.seed_demo {
        let tenants = seed_demo(&store).await?;
        sessions.seed_demo_credentials(&tenants);
        info!(tenants = tenants.len(), "Demo cooperatives and staff credentials ready");
    }

    // Tenancy subsystem: resolver, directory, router, audit.
    let router = Arc::new(ConnectionRouter::new(
        config.database.clone(),
        Arc::new(ProtectedTableRegistry::standard()),
        store.pool().clone(),
    ));
    let orchestrator = Arc::new(ContextOrchestrator::new(
        TenantResolver::from_config(&config.tenancy),
        TenantDirectory::new(store.clone()),
        router,
        Arc::new(ContextAuditTrail::new()),
        config.security.clone(),
    ));

    let tracker = Arc::new(ResourceQuotaTracker::new(
        store.clone(),
        log_notifier(),
        config.quota.notify_denials,
    ));

    let state = ApiState {
        orchestrator,
        tracker,
        sessions,
        instance_id: config.instance_id.clone(),
        start_time: Instant::now(),
    };
    let api_server = ApiServer::new(config, state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("SACCO Suite is ready to serve traffic");

    // HTTP server blocks until shutdown.
    api_server.start_http().await?;

    Ok(())
}

/// Insert the demo cooperatives, skipping any that already exist so a
/// restarted instance does not fail on duplicate slugs.
async fn seed_demo(store: &SqliteSystemStore) -> anyhow::Result<Vec<sacco_core::types::Tenant>> {
    use sacco_storage::TenantStore;

    let mut seeded = Vec::new();
    for tenant in demo_tenants() {
        match store.find_by_slug(&tenant.slug).await? {
            Some(existing) => seeded.push(existing),
            None => {
                store.insert(&tenant).await?;
                info!(slug = %tenant.slug, "Seeded demo cooperative");
                seeded.push(tenant);
            }
        }
    }
    Ok(seeded)
}
