use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `SACCO_SUITE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tenancy: TenancyConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    /// Apex domain of the deployment. Requests to exactly this host
    /// resolve to system context; `<slug>.<main_domain>` resolves to a
    /// tenant.
    #[serde(default = "default_main_domain")]
    pub main_domain: String,
    /// Hostname prefix convention for local development,
    /// e.g. `tenant-acme.localhost`.
    #[serde(default = "default_dev_host_prefix")]
    pub dev_host_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL of the system database (tenants, usage, audit).
    #[serde(default = "default_system_url")]
    pub system_url: String,
    /// Directory holding one SQLite file per tenant. `None` switches to
    /// named in-memory databases (tests, demos).
    #[serde(default = "default_tenant_data_dir")]
    pub tenant_data_dir: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Sessions older than this are flagged insecure.
    #[serde(default = "default_max_session_age_hours")]
    pub max_session_age_hours: i64,
    /// Failed-attempt count above which a session is flagged insecure.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    /// Logins older than this clear the `recent_login` flag.
    #[serde(default = "default_recent_login_days")]
    pub recent_login_days: i64,
    /// Hard expiry applied to sessions issued by the dev login.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Emit a notification event when a quota check denies access.
    #[serde(default = "default_notify_denials")]
    pub notify_denials: bool,
}

// Default functions
fn default_instance_id() -> String {
    "sacco-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_main_domain() -> String {
    "localhost".to_string()
}
fn default_dev_host_prefix() -> String {
    "tenant-".to_string()
}
fn default_system_url() -> String {
    "sqlite://data/sacco-system.db?mode=rwc".to_string()
}
fn default_tenant_data_dir() -> Option<String> {
    Some("data/tenants".to_string())
}
fn default_max_connections() -> u32 {
    5
}
fn default_acquire_timeout_ms() -> u64 {
    3000
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_max_session_age_hours() -> i64 {
    24
}
fn default_max_login_attempts() -> u32 {
    5
}
fn default_recent_login_days() -> i64 {
    30
}
fn default_session_ttl_minutes() -> i64 {
    480
}
fn default_notify_denials() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            main_domain: default_main_domain(),
            dev_host_prefix: default_dev_host_prefix(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            system_url: default_system_url(),
            tenant_data_dir: default_tenant_data_dir(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_session_age_hours: default_max_session_age_hours(),
            max_login_attempts: default_max_login_attempts(),
            recent_login_days: default_recent_login_days(),
            session_ttl_minutes: default_session_ttl_minutes(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            notify_denials: default_notify_denials(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            tenancy: TenancyConfig::default(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("SACCO_SUITE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
