mod validation;

use serde::Deserialize;

pub use validation::ConfigReport;

/// Top-level process configuration, loaded from a YAML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub redis_conn: String,
    pub delay_test_url: String,
    pub server_addr: String,
    pub proxy_pool_start_port: u16,
    pub soft_delete: bool,
    pub auth_user: String,
    pub auth_pass: String,
    pub secret: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            redis_conn: "redis://127.0.0.1:6379/0".into(),
            delay_test_url: "http://www.gstatic.com/generate_204".into(),
            server_addr: "0.0.0.0:9999".into(),
            proxy_pool_start_port: 40001,
            soft_delete: false,
            auth_user: String::new(),
            auth_pass: String::new(),
            secret: String::new(),
        }
    }
}

impl PoolConfig {
    /// Validate the configuration and return a report of warnings and errors.
    pub fn validate(&self) -> ConfigReport {
        validation::validate(self)
    }

    pub fn from_file(file_name: &str) -> Result<Self, config::ConfigError> {
        let built = config::Config::builder()
            .add_source(config::File::new(file_name, config::FileFormat::Yaml).required(false))
            .build()?;

        built.try_deserialize()
    }

    pub fn from_file_or_default(file_name: &str) -> Self {
        match Self::from_file(file_name) {
            Ok(cfg) => {
                let report = cfg.validate();
                if report.has_errors() {
                    eprintln!("⚠️  Invalid config in '{file_name}':");
                    eprintln!("{}", report.format());
                    eprintln!("➡️  Using default config (in-memory)...");
                    PoolConfig::default()
                } else {
                    if !report.warnings().is_empty() {
                        eprintln!("⚠️  Config warnings in '{file_name}':");
                        eprintln!("{}", report.format());
                    }
                    cfg
                }
            }
            Err(e) => {
                eprintln!("⚠️  Error reading config '{file_name}': {e}");
                eprintln!("➡️  Using default config (in-memory)...");
                PoolConfig::default()
            }
        }
    }

    pub fn print(&self) {
        println!("================ PROXYPOOL CONFIG ================");
        println!("  redis_conn            = {}", self.redis_conn);
        println!("  delay_test_url        = {}", self.delay_test_url);
        println!("  server_addr           = {}", self.server_addr);
        println!("  proxy_pool_start_port = {}", self.proxy_pool_start_port);
        println!("  soft_delete           = {}", self.soft_delete);
        println!(
            "  auth_user             = {}",
            if self.auth_user.is_empty() { "<none>" } else { &self.auth_user }
        );
        println!(
            "  secret                = {}",
            if self.secret.is_empty() { "<none>" } else { "***" }
        );
        println!("===================================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_with_only_warnings() {
        let cfg = PoolConfig::default();
        let report = cfg.validate();
        assert!(!report.has_errors());
    }

    #[test]
    fn empty_redis_conn_is_an_error() {
        let mut cfg = PoolConfig::default();
        cfg.redis_conn.clear();
        assert!(cfg.validate().has_errors());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = PoolConfig::from_file_or_default("/nonexistent/proxypool.yaml");
        assert_eq!(cfg.proxy_pool_start_port, 40001);
    }
}
