use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub log_dir: String,
    pub listen_addr: String,
    pub domain: String,
    pub network_passphrase: String,
    pub horizon_url: String,
    pub distribution_account: String,
    pub base_url: String,
    pub interactive_base_url: String,
    pub jwt_secret: String,
    pub jwt_ttl_secs: u64,
    pub challenge_ttl_secs: u64,
    pub signing_seed: String,
    pub observer_start_cursor: String,
    pub observer_initial_backoff_ms: u64,
    pub observer_max_backoff_ms: u64,
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("log_dir", "log")?
        .set_default("listen_addr", "0.0.0.0:8000")?
        .set_default("domain", "localhost:8000")?
        .set_default("network_passphrase", "Test SDF Network ; September 2015")?
        .set_default("horizon_url", "https://horizon-testnet.stellar.org")?
        .set_default("distribution_account", "")?
        .set_default("base_url", "http://localhost:8000")?
        .set_default("interactive_base_url", "")?
        .set_default("jwt_secret", "")?
        .set_default("jwt_ttl_secs", 86400i64)?
        .set_default("challenge_ttl_secs", 300i64)?
        .set_default("signing_seed", "")?
        .set_default("observer_start_cursor", "now")?
        .set_default("observer_initial_backoff_ms", 1000i64)?
        .set_default("observer_max_backoff_ms", 60000i64)?
        // Add configuration from a file
        .add_source(File::with_name("config/anchor.yaml").required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("ANCHOR"))
        .build()?;

    s.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = load_config().unwrap();
        assert_eq!(cfg.challenge_ttl_secs, 300);
        assert_eq!(cfg.jwt_ttl_secs, 86400);
        assert_eq!(cfg.observer_start_cursor, "now");
        assert_eq!(cfg.observer_initial_backoff_ms, 1000);
        assert_eq!(cfg.observer_max_backoff_ms, 60000);
    }
}
