use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub native_symbol: String,
    pub rpc_endpoints: Vec<String>,
    pub multicall_address: String,
    #[serde(default = "default_log_chunk_size")]
    pub log_chunk_size: u64,
    #[serde(default = "default_scanner_concurrency")]
    pub scanner_concurrency: usize,
    pub discovery_start_block: Option<u64>,
    pub explorer_api_url: Option<String>,
}

fn default_log_chunk_size() -> u64 {
    2_000
}

fn default_scanner_concurrency() -> usize {
    4
}

/// Cache & single-flight tunables, §4.7.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_hard_expiry_secs")]
    pub hard_expiry_secs: u64,
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

fn default_ttl_secs() -> u64 {
    60
}
fn default_hard_expiry_secs() -> u64 {
    30 * 60
}
fn default_stuck_threshold_secs() -> u64 {
    5 * 60
}
fn default_sweep_interval_secs() -> u64 {
    10 * 60
}
fn default_build_timeout_secs() -> u64 {
    90
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            hard_expiry_secs: default_hard_expiry_secs(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

/// Provider pool tunables, §4.1.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

fn default_timeout_ms() -> u64 {
    4_000
}
fn default_unhealthy_threshold() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_probe_interval_secs() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
            cooldown_secs: default_cooldown_secs(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

/// Discovery pipeline + head scanner tunables, §4.5 / §4.9.
#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_phase2_threshold")]
    pub phase2_min_tokens: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_catchup")]
    pub max_catchup_blocks: u64,
    #[serde(default = "default_reorg_depth")]
    pub reorg_depth: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_soft_log_cap")]
    pub soft_log_cap: usize,
}

fn default_phase2_threshold() -> usize {
    3
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_max_catchup() -> u64 {
    200
}
fn default_reorg_depth() -> u64 {
    32
}
fn default_refresh_interval_secs() -> u64 {
    60
}
fn default_soft_log_cap() -> usize {
    10_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            phase2_min_tokens: default_phase2_threshold(),
            poll_interval_secs: default_poll_interval_secs(),
            max_catchup_blocks: default_max_catchup(),
            reorg_depth: default_reorg_depth(),
            refresh_interval_secs: default_refresh_interval_secs(),
            soft_log_cap: default_soft_log_cap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_global_permits")]
    pub global_build_permits: usize,
}

fn default_global_permits() -> usize {
    100
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global_build_permits: default_global_permits(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_cors_origin() -> String {
    "*".to_string()
}
fn default_request_deadline_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            request_deadline_secs: default_request_deadline_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Layer a handful of operational env vars over the TOML file, per §6
    /// Environment. TOML stays the source of truth for chain topology; env
    /// vars only tune the numbers an operator needs to adjust without a
    /// redeploy.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PGURL") {
            self.database.url = url;
        }
        if let Some(v) = env_u32("PG_MAX_CONNECTIONS") {
            self.database.max_connections = v;
        }
        if let Some(v) = env_u64("CACHE_TTL_SECONDS") {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env_u64("CLEANUP_INTERVAL_MINUTES") {
            self.cache.sweep_interval_secs = v * 60;
        }
        if let Some(v) = env_u64("BACKGROUND_REFRESH_INTERVAL_SECONDS") {
            self.discovery.refresh_interval_secs = v;
        }
        if let Some(v) = env_u64("RPC_TIMEOUT_MS") {
            self.provider.timeout_ms = v;
        }
        if let Ok(origin) = std::env::var("CORS_ORIGIN") {
            self.http.cors_origin = origin;
        }
        for chain in &mut self.chains {
            let env_key = format!("{}_RPC_URL", chain.name.to_uppercase());
            if let Ok(urls) = std::env::var(&env_key) {
                chain.rpc_endpoints = urls.split(',').map(|s| s.trim().to_string()).collect();
            }
        }
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.chains.is_empty() {
            return Err(eyre::eyre!("At least one chain must be configured"));
        }
        for chain in &self.chains {
            if chain.rpc_endpoints.is_empty() {
                return Err(eyre::eyre!(
                    "Chain '{}' must have at least one RPC endpoint configured",
                    chain.name
                ));
            }
            if !chain.multicall_address.starts_with("0x") || chain.multicall_address.len() != 42 {
                return Err(eyre::eyre!(
                    "Invalid multicall address '{}' for chain '{}'",
                    chain.multicall_address,
                    chain.name
                ));
            }
        }
        Ok(())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
[database]
url = "postgres://localhost/test"
max_connections = 5

[[chains]]
name = "ethereum"
chain_id = 1
native_symbol = "ETH"
rpc_endpoints = ["http://localhost:8545"]
multicall_address = "0xcA11bde05977b3631167028862bE2a173976CA11"
"#
    }

    #[test]
    fn test_parse_config_with_defaults() {
        let config: Config = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].chain_id, 1);
        assert_eq!(config.chains[0].log_chunk_size, 2_000);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.hard_expiry_secs, 1_800);
        assert_eq!(config.discovery.phase2_min_tokens, 3);
        assert_eq!(config.discovery.reorg_depth, 32);
    }

    #[test]
    fn test_validate_empty_chains() {
        let config = Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
                max_connections: 5,
            },
            chains: vec![],
            cache: CacheConfig::default(),
            provider: ProviderConfig::default(),
            discovery: DiscoveryConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            http: HttpConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_multicall_address() {
        let mut config: Config = toml::from_str(sample_toml()).unwrap();
        config.chains[0].multicall_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }
}
