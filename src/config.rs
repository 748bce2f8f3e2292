use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the proxy
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// The backend the proxy forwards API traffic to
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Port the proxy listens on (default: 8088)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Path prefix that is proxied to the backend; everything else is
    /// served from `static_root` (default: "/api/")
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Directory the non-API paths are served from (default: ".")
    #[serde(default = "default_static_root")]
    pub static_root: String,

    /// Timeout in seconds for a single proxied request (default: 10)
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            api_prefix: default_api_prefix(),
            static_root: default_static_root(),
            proxy_timeout_secs: default_proxy_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }
}

/// Configuration for the single backend target.
///
/// When `manage` is false the backend is assumed to be running already and
/// only `host`/`port` are used. When `manage` is true the proxy spawns
/// `command` and owns the process until shutdown.
///
/// # Security Warning
///
/// The `command` and `args` fields allow arbitrary command execution.
/// Configuration files must be protected with appropriate file permissions.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Host the backend listens on (default: localhost)
    #[serde(default = "default_backend_host")]
    pub host: String,

    /// Port the backend listens on (default: 5000)
    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// Whether the proxy spawns and supervises the backend process
    #[serde(default)]
    pub manage: bool,

    /// Command to execute to start the backend (required when `manage`)
    pub command: Option<String>,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the command
    pub working_dir: Option<String>,

    /// Environment variables to set for the backend process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Health check endpoint path (default: "/api/health")
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Maximum number of health probes before giving up (default: 20)
    #[serde(default = "default_health_max_attempts")]
    pub health_max_attempts: u32,

    /// Minimum spacing between consecutive health probes in milliseconds
    /// (default: 2000)
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,

    /// Delay after spawning before the first health probe in milliseconds
    /// (default: 500)
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Grace period in seconds between SIGTERM and SIGKILL (default: 10)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            manage: false,
            command: None,
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            health_path: default_health_path(),
            health_max_attempts: default_health_max_attempts(),
            health_interval_ms: default_health_interval(),
            settle_delay_ms: default_settle_delay(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl BackendConfig {
    /// Base URL of the backend, without a trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full URL of the health check endpoint
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health_path)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            )
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }

        if self.server.api_prefix.is_empty() || !self.server.api_prefix.starts_with('/') {
            return Err(format!(
                "server.api_prefix must start with '/', got '{}'",
                self.server.api_prefix
            ));
        }

        if self.backend.port == 0 {
            return Err("backend.port must be greater than 0".to_string());
        }

        if self.backend.manage && self.backend.command.is_none() {
            return Err("backend.manage requires the 'command' field".to_string());
        }

        if self.backend.manage {
            if !self.backend.health_path.starts_with('/') {
                return Err(format!(
                    "backend.health_path must start with '/', got '{}'",
                    self.backend.health_path
                ));
            }
            if self.backend.health_max_attempts == 0 {
                return Err("backend.health_max_attempts must be greater than 0".to_string());
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    8088
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_prefix() -> String {
    "/api/".to_string()
}

fn default_static_root() -> String {
    ".".to_string()
}

fn default_proxy_timeout() -> u64 {
    10 // 10 seconds max for the backend to respond
}

fn default_backend_host() -> String {
    "localhost".to_string()
}

fn default_backend_port() -> u16 {
    5000
}

fn default_health_path() -> String {
    "/api/health".to_string()
}

fn default_health_max_attempts() -> u32 {
    20
}

fn default_health_interval() -> u64 {
    2000 // 2 seconds between probes
}

fn default_settle_delay() -> u64 {
    500 // let the process come up before the first probe
}

fn default_shutdown_grace() -> u64 {
    10 // 10 seconds between SIGTERM and SIGKILL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.api_prefix, "/api/");
        assert_eq!(config.server.static_root, ".");
        assert_eq!(config.server.proxy_timeout(), Duration::from_secs(10));

        assert_eq!(config.backend.host, "localhost");
        assert_eq!(config.backend.port, 5000);
        assert!(!config.backend.manage);
        assert_eq!(config.backend.health_max_attempts, 20);
        assert_eq!(config.backend.health_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
port = 9000
bind = "0.0.0.0"
api_prefix = "/v1/"
static_root = "./public"
proxy_timeout_secs = 30

[backend]
host = "127.0.0.1"
port = 5001
manage = true
command = "dotnet"
args = ["run", "--configuration", "Release"]
working_dir = "../api"
health_path = "/api/values"
health_max_attempts = 30
health_interval_ms = 1000
settle_delay_ms = 2000
shutdown_grace_secs = 5

[backend.env]
ASPNETCORE_ENVIRONMENT = "Development"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.api_prefix, "/v1/");
        assert_eq!(config.server.proxy_timeout(), Duration::from_secs(30));

        assert_eq!(config.backend.command, Some("dotnet".to_string()));
        assert_eq!(config.backend.args.len(), 3);
        assert_eq!(config.backend.working_dir, Some("../api".to_string()));
        assert_eq!(
            config.backend.env.get("ASPNETCORE_ENVIRONMENT"),
            Some(&"Development".to_string())
        );
        assert_eq!(config.backend.health_max_attempts, 30);
        assert_eq!(config.backend.settle_delay(), Duration::from_millis(2000));
        assert_eq!(config.backend.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.backend.port, 5000);
    }

    #[test]
    fn test_backend_urls() {
        let backend = BackendConfig::default();

        assert_eq!(backend.base_url(), "http://localhost:5000");
        assert_eq!(backend.health_url(), "http://localhost:5000/api/health");
    }

    #[test]
    fn test_validate_rejects_zero_ports() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut config = Config::default();
        config.server.api_prefix = "api/".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("api_prefix"));
    }

    #[test]
    fn test_validate_manage_requires_command() {
        let mut config = Config::default();
        config.backend.manage = true;
        let err = config.validate().unwrap_err();
        assert!(err.contains("command"));

        config.backend.command = Some("dotnet".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_manage_checks_health_settings() {
        let mut config = Config::default();
        config.backend.manage = true;
        config.backend.command = Some("dotnet".to_string());
        config.backend.health_path = "health".to_string();
        assert!(config.validate().is_err());

        config.backend.health_path = "/health".to_string();
        config.backend.health_max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
