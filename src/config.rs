// ============================================================================
// src/config.rs – strict config loader
// ============================================================================

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commands {
    #[serde(default = "default_version_cmd")]
    pub version: String,
    #[serde(default = "default_uptime_cmd")]
    pub uptime: String,
    #[serde(default = "default_status_cmd")]
    pub status: String,
    #[serde(default = "default_restart_cmd")]
    pub restart: String,
    #[serde(default = "default_reload_cmd")]
    pub reload: String,
    #[serde(default = "default_config_test_cmd")]
    pub config_test: String,
    #[serde(default = "default_enable_site_cmd")]
    pub enable_site: String,
    #[serde(default = "default_disable_site_cmd")]
    pub disable_site: String,
    #[serde(default = "default_connections_cmd")]
    pub connections: String,
    /// Must print one RSS value (kB) per line.
    #[serde(default = "default_memory_cmd")]
    pub memory: String,
    #[serde(default = "default_sudo_check_cmd")]
    pub sudo_check: String,
}

fn default_version_cmd() -> String {
    "apache2 -v".to_string()
}
fn default_uptime_cmd() -> String {
    "uptime".to_string()
}
fn default_status_cmd() -> String {
    "systemctl is-active apache2".to_string()
}
fn default_restart_cmd() -> String {
    "sudo systemctl restart apache2".to_string()
}
fn default_reload_cmd() -> String {
    "sudo systemctl reload apache2".to_string()
}
fn default_config_test_cmd() -> String {
    "sudo apache2ctl configtest".to_string()
}
fn default_enable_site_cmd() -> String {
    "sudo a2ensite".to_string()
}
fn default_disable_site_cmd() -> String {
    "sudo a2dissite".to_string()
}
fn default_connections_cmd() -> String {
    "netstat -an".to_string()
}
fn default_memory_cmd() -> String {
    "ps -C apache2 -o rss=".to_string()
}
fn default_sudo_check_cmd() -> String {
    "sudo -n true".to_string()
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            version: default_version_cmd(),
            uptime: default_uptime_cmd(),
            status: default_status_cmd(),
            restart: default_restart_cmd(),
            reload: default_reload_cmd(),
            config_test: default_config_test_cmd(),
            enable_site: default_enable_site_cmd(),
            disable_site: default_disable_site_cmd(),
            connections: default_connections_cmd(),
            memory: default_memory_cmd(),
            sudo_check: default_sudo_check_cmd(),
        }
    }
}

impl Commands {
    fn entries(&self) -> [(&'static str, &str); 11] {
        [
            ("version", &self.version),
            ("uptime", &self.uptime),
            ("status", &self.status),
            ("restart", &self.restart),
            ("reload", &self.reload),
            ("config_test", &self.config_test),
            ("enable_site", &self.enable_site),
            ("disable_site", &self.disable_site),
            ("connections", &self.connections),
            ("memory", &self.memory),
            ("sudo_check", &self.sudo_check),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apache {
    #[serde(default = "default_sites_available")]
    pub sites_available: PathBuf,
    #[serde(default = "default_sites_enabled")]
    pub sites_enabled: PathBuf,
    #[serde(default = "default_access_log")]
    pub access_log: PathBuf,
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Seconds to wait after a restart before re-checking the daemon.
    #[serde(default = "default_restart_grace_secs")]
    pub restart_grace_secs: u64,
    #[serde(default)]
    pub commands: Commands,
}

fn default_sites_available() -> PathBuf {
    PathBuf::from("/etc/apache2/sites-available")
}
fn default_sites_enabled() -> PathBuf {
    PathBuf::from("/etc/apache2/sites-enabled")
}
fn default_access_log() -> PathBuf {
    PathBuf::from("/var/log/apache2/access.log")
}
fn default_error_log() -> PathBuf {
    PathBuf::from("/var/log/apache2/error.log")
}
fn default_http_port() -> u16 {
    80
}
fn default_restart_grace_secs() -> u64 {
    2
}

impl Default for Apache {
    fn default() -> Self {
        Self {
            sites_available: default_sites_available(),
            sites_enabled: default_sites_enabled(),
            access_log: default_access_log(),
            error_log: default_error_log(),
            http_port: default_http_port(),
            restart_grace_secs: default_restart_grace_secs(),
            commands: Commands::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    #[serde(default = "default_allowed_dirs")]
    pub allowed_dirs: Vec<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
    /// Exclusive flock taken around every site mutation.
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

fn default_allowed_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/www"),
        default_sites_available(),
        default_sites_enabled(),
    ]
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_log_lines() -> usize {
    1000
}
fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/lock/vhostctl.lock")
}

impl Default for Security {
    fn default() -> Self {
        Self {
            allowed_dirs: default_allowed_dirs(),
            command_timeout_secs: default_timeout_secs(),
            max_log_lines: default_max_log_lines(),
            lock_file: default_lock_file(),
        }
    }
}

impl Security {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    #[serde(default = "default_max_aliases")]
    pub max_aliases: usize,
}

fn default_max_aliases() -> usize {
    10
}

impl Default for Validation {
    fn default() -> Self {
        Self {
            max_aliases: default_max_aliases(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    /// EnvFilter directive, e.g. `info` or `vhostctl=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Append-only trail of site mutations.
    #[serde(default)]
    pub audit_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            audit_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub apache: Apache,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub validation: Validation,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self> {
        let s = fs::read_to_string(&p)
            .with_context(|| format!("read config: {}", p.as_ref().display()))?;
        let cfg: Self = if p.as_ref().extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str(&s).context("toml parse")?
        } else {
            serde_yaml::from_str(&s).context("yaml parse")?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, line) in self.apache.commands.entries() {
            match shlex::split(line) {
                Some(argv) if !argv.is_empty() => {}
                _ => bail!("apache.commands.{name} is empty or unparsable: {line:?}"),
            }
        }
        if self.security.command_timeout_secs == 0 {
            bail!("security.command_timeout_secs must be at least 1");
        }
        if !(1..=1000).contains(&self.security.max_log_lines) {
            bail!("security.max_log_lines must be within 1..=1000");
        }
        if self.security.allowed_dirs.is_empty() {
            bail!("security.allowed_dirs must list at least one directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_toml_yields_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(b"").unwrap();
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.security.command_timeout_secs, 30);
        assert_eq!(cfg.security.max_log_lines, 1000);
        assert_eq!(cfg.apache.commands.enable_site, "sudo a2ensite");
        assert_eq!(cfg.apache.http_port, 80);
    }

    #[test]
    fn yaml_overrides_nested_fields() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            "apache:\n  sites_available: /srv/avail\n  commands:\n    reload: apachectl graceful\nsecurity:\n  command_timeout_secs: 5\n"
        )
        .unwrap();
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.apache.sites_available, PathBuf::from("/srv/avail"));
        assert_eq!(cfg.apache.commands.reload, "apachectl graceful");
        assert_eq!(cfg.apache.commands.restart, "sudo systemctl restart apache2");
        assert_eq!(cfg.security.command_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_empty_command_and_zero_timeout() {
        let mut cfg = Config::default();
        cfg.apache.commands.reload = "   ".into();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.security.command_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.security.max_log_lines = 5000;
        assert!(cfg.validate().is_err());
    }
}
