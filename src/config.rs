//! Command-line arguments for the gateway binary
//!
//! Everything about routing lives in the YAML file; the command line only says where that file
//! is, optionally overrides the bind address, and controls the metrics server.
use anyhow::anyhow;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The routing configuration file.
    #[arg(short = 'c', long, env = "ROUTER_CONFIG", default_value = "router.yaml")]
    pub config: PathBuf,

    /// Overrides `router.bind_host` from the configuration file.
    #[arg(long)]
    pub host: Option<String>,

    /// Overrides `router.bind_port` from the configuration file.
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, default_value_t = false)]
    pub metrics: bool,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "waypoint")]
    pub metrics_prefix: String,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if !self.config.exists() {
            return Err(anyhow!(
                "Config file '{}' does not exist",
                self.config.display()
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["waypoint"]);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.metrics_prefix, "waypoint");
        assert!(!config.metrics);
        assert!(config.host.is_none());
        assert!(config.port.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse_from([
            "waypoint", "-c", "/etc/router.yaml", "--host", "0.0.0.0", "-p", "8080", "-m",
        ]);
        assert_eq!(config.config, PathBuf::from("/etc/router.yaml"));
        assert_eq!(config.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.port, Some(8080));
        assert!(config.metrics);
    }

    #[test]
    fn test_missing_config_file_is_rejected() {
        let config = Config::parse_from(["waypoint", "-c", "/definitely/not/here.yaml"]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }

    #[test]
    fn test_existing_config_file_is_accepted() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = Config::parse_from(["waypoint", "-c", file.path().to_str().unwrap()]);
        assert!(config.validate().is_ok());
    }
}
