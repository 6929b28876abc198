use crate::PoolConfig;

/// Validation output for a loaded pool configuration.
#[derive(Debug, Default)]
pub struct ConfigReport {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ConfigReport {
    /// Returns true when no errors were found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true when at least one error was found.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Render warnings and errors into a readable, multi-line string.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if !self.errors.is_empty() {
            out.push_str("Errors:\n");
            for err in &self.errors {
                out.push_str("  - ");
                out.push_str(err);
                out.push('\n');
            }
        }
        if !self.warnings.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Warnings:\n");
            for warn in &self.warnings {
                out.push_str("  - ");
                out.push_str(warn);
                out.push('\n');
            }
        }
        out
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Validate a pool configuration and return a report of issues.
pub fn validate(cfg: &PoolConfig) -> ConfigReport {
    let mut report = ConfigReport::default();

    if cfg.redis_conn.trim().is_empty() {
        report.error("redis_conn must not be empty");
    }

    if cfg.delay_test_url.trim().is_empty() {
        report.error("delay_test_url must not be empty");
    } else if !cfg.delay_test_url.starts_with("http://") && !cfg.delay_test_url.starts_with("https://")
    {
        report.warn(format!(
            "delay_test_url '{}' does not look like an http(s) URL",
            cfg.delay_test_url
        ));
    }

    if cfg.server_addr.parse::<std::net::SocketAddr>().is_err() {
        report.warn(format!(
            "server_addr '{}' is not a socket address; binding may fail",
            cfg.server_addr
        ));
    }

    if cfg.proxy_pool_start_port < 1024 {
        report.warn(format!(
            "proxy_pool_start_port {} is below 1024; low ports may require privileges",
            cfg.proxy_pool_start_port
        ));
    }

    let has_user = !cfg.auth_user.is_empty();
    let has_pass = !cfg.auth_pass.is_empty();
    if has_user != has_pass {
        report.warn("auth_user and auth_pass should both be set or both be empty");
    }

    if cfg.secret.is_empty() {
        report.warn("secret is empty; the control API will accept unauthenticated requests");
    }

    report
}
