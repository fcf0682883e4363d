//! Server configuration, assembled from defaults, the `WWW_*`
//! environment knobs and builder-style overrides.

use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub workers: usize,
    pub request_timeout: Duration,
    pub reuse_port: bool,
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            debug: false,
            workers: 1,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reuse_port: false,
            max_request_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the `WWW_HOST`, `WWW_PORT`, `WWW_DEBUG`
    /// and `WWW_REQUEST_TIMEOUT` environment variables. Unparseable
    /// values fall back to the default. Debug is on unless
    /// `WWW_DEBUG=f`: an unset variable means debug mode.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("WWW_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("WWW_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        config.debug = match std::env::var("WWW_DEBUG") {
            Ok(value) => value != "f",
            Err(_) => true,
        };
        if let Ok(timeout) = std::env::var("WWW_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                config.request_timeout = Duration::from_secs(secs);
            }
        }
        config
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reuse_port(mut self, reuse_port: bool) -> Self {
        self.reuse_port = reuse_port;
        self
    }

    pub fn with_max_request_size(mut self, max: usize) -> Self {
        self.max_request_size = max;
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert!(!config.debug);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = ServerConfig::new()
            .with_host("0.0.0.0")
            .with_port(9000)
            .with_debug(true)
            .with_request_timeout(Duration::from_millis(250));
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert!(config.debug);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn workers_are_clamped_to_at_least_one() {
        assert_eq!(ServerConfig::new().with_workers(0).workers, 1);
    }

    // The only test touching the WWW_* variables; both phases live in
    // one test so parallel runs cannot interleave.
    #[test]
    fn from_env_reads_the_www_knobs() {
        std::env::remove_var("WWW_HOST");
        std::env::remove_var("WWW_PORT");
        std::env::remove_var("WWW_DEBUG");
        std::env::remove_var("WWW_REQUEST_TIMEOUT");

        // Unset debug knob means debug mode.
        let config = ServerConfig::from_env();
        assert!(config.debug);
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");

        std::env::set_var("WWW_HOST", "0.0.0.0");
        std::env::set_var("WWW_PORT", "9100");
        std::env::set_var("WWW_DEBUG", "f");
        std::env::set_var("WWW_REQUEST_TIMEOUT", "3");
        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr(), "0.0.0.0:9100");
        assert!(!config.debug);
        assert_eq!(config.request_timeout, Duration::from_secs(3));

        std::env::remove_var("WWW_HOST");
        std::env::remove_var("WWW_PORT");
        std::env::remove_var("WWW_DEBUG");
        std::env::remove_var("WWW_REQUEST_TIMEOUT");
    }
}
