// ============================================================================
// src/apache/mod.rs – Daemon status, logs and service control
// ============================================================================

pub mod logs;

use crate::cmd::{command_argv, Runner};
use crate::config::Config;
use crate::error::{AdminError, AdminResult};
use crate::outcome::OperationMessage;
use crate::system::{connections_on_port, format_bytes, port_in_use};
use logs::{check_line_count, parse_lines, LogEntry, LogType};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYNTAX_OK: &str = "Syntax OK";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Apache/([\d.]+)").expect("version regex is valid"));

static UPTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"up\s+(.*?),\s+\d+\s+users?").expect("uptime regex is valid")
});

static LOAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"load averages?:\s+([\d.]+),?\s+([\d.]+),?\s+([\d.]+)")
        .expect("load regex is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    #[serde(rename = "1m")]
    pub one: f64,
    #[serde(rename = "5m")]
    pub five: f64,
    #[serde(rename = "15m")]
    pub fifteen: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub mb: u64,
    pub formatted: String,
}

/// Recomputed on every call; never cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApacheStatusSnapshot {
    pub version: String,
    pub running: bool,
    /// `running` / `stopped`
    pub status: &'static str,
    pub uptime: String,
    pub load: LoadAverage,
    pub active_virtual_hosts: usize,
    /// Something is listening on `apache.http_port`.
    pub listening: bool,
    pub connections: usize,
    pub memory_usage: MemoryUsage,
    pub last_check: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigCheck {
    pub message: String,
    pub details: String,
}

pub struct ApacheStatusReporter<'a> {
    cfg: &'a Config,
    runner: &'a dyn Runner,
    restart_grace: Duration,
}

impl<'a> ApacheStatusReporter<'a> {
    pub fn new(cfg: &'a Config, runner: &'a dyn Runner) -> Self {
        Self {
            cfg,
            runner,
            restart_grace: Duration::from_secs(cfg.apache.restart_grace_secs),
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn get_status(&self) -> ApacheStatusSnapshot {
        let commands = &self.cfg.apache.commands;

        let version = self
            .probe("version", &commands.version)
            .and_then(|out| parse_version(&out))
            .unwrap_or_else(|| "Unknown".to_string());

        let uptime_out = self.probe("uptime", &commands.uptime).unwrap_or_default();
        let uptime = parse_uptime(&uptime_out).unwrap_or_else(|| "Unknown".to_string());
        let load = parse_load(&uptime_out).unwrap_or_default();

        let port = self.cfg.apache.http_port;
        let (connections, listening) = self
            .probe("connections", &commands.connections)
            .map(|out| (connections_on_port(&out, port).len(), port_in_use(&out, port)))
            .unwrap_or((0, false));

        let running = self
            .probe("status", &commands.status)
            .map(|out| out.trim() == "active")
            .unwrap_or(false);

        let memory_mb = self
            .probe("memory", &commands.memory)
            .map(|out| sum_rss_kb(&out) / 1024)
            .unwrap_or(0);

        ApacheStatusSnapshot {
            version,
            running,
            status: if running { "running" } else { "stopped" },
            uptime,
            load,
            active_virtual_hosts: self.count_enabled_sites(),
            listening,
            connections,
            memory_usage: MemoryUsage {
                mb: memory_mb,
                formatted: format_bytes(memory_mb * 1024 * 1024, 2),
            },
            last_check: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// stdout of a read-only probe; `None` when it cannot be run or fails.
    fn probe(&self, name: &str, line: &str) -> Option<String> {
        match self.runner.run_line(line, &[]) {
            // `systemctl is-active` exits 3 for inactive units but still prints the state
            Ok(r) if r.success || (name == "status" && !r.timed_out) => Some(r.stdout),
            Ok(r) => {
                warn!(probe = %name, exit_code = r.exit_code, "status probe failed");
                None
            }
            Err(e) => {
                warn!(probe = %name, "status probe failed: {e}");
                None
            }
        }
    }

    fn count_enabled_sites(&self) -> usize {
        match fs::read_dir(&self.cfg.apache.sites_enabled) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".conf"))
                .count(),
            Err(e) => {
                warn!(
                    dir = %self.cfg.apache.sites_enabled.display(),
                    "cannot count enabled sites: {e}"
                );
                0
            }
        }
    }

    // ------------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------------

    pub fn get_logs(
        &self,
        kind: &str,
        lines: usize,
        filter: Option<&str>,
    ) -> AdminResult<Vec<LogEntry>> {
        let kind: LogType = kind.parse()?;
        check_line_count(lines, self.cfg.security.max_log_lines)?;

        let path = self.log_path(kind);
        if !path.is_file() {
            return Err(AdminError::not_found(format!(
                "Log file not found: {}",
                path.display()
            )));
        }

        let tail = vec![
            "tail".to_string(),
            "-n".to_string(),
            lines.to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let filter = filter.filter(|f| !f.trim().is_empty());
        let result = match filter {
            None => self.runner.run(&tail, None)?,
            Some(needle) => {
                let grep = command_argv("grep -i -F -e", &[needle])?;
                self.runner.run_pipeline(&[tail, grep], None)?
            }
        };

        // grep exits 1 when nothing matched; a failing tail leaves stderr behind
        if filter.is_some()
            && result.exit_code == 1
            && !result.timed_out
            && result.stderr.trim().is_empty()
        {
            debug!(log = %path.display(), "no log lines matched filter");
            return Ok(Vec::new());
        }
        let result = result
            .require_success("read log file", self.runner.default_timeout())?;
        Ok(parse_lines(kind, &result.stdout, lines))
    }

    fn log_path(&self, kind: LogType) -> PathBuf {
        match kind {
            LogType::Error => self.cfg.apache.error_log.clone(),
            LogType::Access => self.cfg.apache.access_log.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Service control
    // ------------------------------------------------------------------------

    pub fn restart_server(&self) -> AdminResult<OperationMessage> {
        let timeout = self.runner.default_timeout();
        self.runner
            .run_line(&self.cfg.apache.commands.restart, &[])?
            .require_success("restart Apache server", timeout)?;

        thread::sleep(self.restart_grace);

        let state = self.runner.run_line(&self.cfg.apache.commands.status, &[])?;
        if state.stdout.trim() != "active" {
            warn!(state = %state.stdout.trim(), "apache inactive after restart");
            return Err(AdminError::execution("Apache failed to restart properly"));
        }
        info!("apache restarted");
        Ok(OperationMessage::new("Apache server restarted successfully").with_status("active"))
    }

    pub fn reload_configuration(&self) -> AdminResult<OperationMessage> {
        self.check_configuration()?;
        self.runner
            .run_line(&self.cfg.apache.commands.reload, &[])?
            .require_success("reload Apache configuration", self.runner.default_timeout())?;
        info!("apache configuration reloaded");
        Ok(OperationMessage::new("Apache configuration reloaded successfully")
            .with_status("reloaded"))
    }

    pub fn check_configuration(&self) -> AdminResult<ConfigCheck> {
        let result = self
            .runner
            .run_line(&self.cfg.apache.commands.config_test, &[])?;
        if result.timed_out {
            return Err(AdminError::Timeout {
                command: self.cfg.apache.commands.config_test.clone(),
                after: self.runner.default_timeout(),
            });
        }
        let output = result.combined_output();
        if !output.contains(SYNTAX_OK) {
            warn!("apache configuration test failed");
            return Err(AdminError::ConfigSyntax(output.trim().to_string()));
        }
        Ok(ConfigCheck {
            message: "Apache configuration syntax is valid".to_string(),
            details: output.trim().to_string(),
        })
    }
}

fn parse_version(out: &str) -> Option<String> {
    VERSION.captures(out).map(|c| c[1].to_string())
}

fn parse_uptime(out: &str) -> Option<String> {
    UPTIME.captures(out).map(|c| c[1].trim().to_string())
}

fn parse_load(out: &str) -> Option<LoadAverage> {
    let c = LOAD.captures(out)?;
    Some(LoadAverage {
        one: c[1].parse().ok()?,
        five: c[2].parse().ok()?,
        fifteen: c[3].parse().ok()?,
    })
}

/// One RSS value (kB) per line; anything unparsable counts as zero.
fn sum_rss_kb(out: &str) -> u64 {
    out.lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter_map(|v| v.parse::<u64>().ok())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{CommandExecutor, CommandResult};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn out(success: bool, stdout: &str, stderr: &str, code: i32) -> CommandResult {
        CommandResult {
            success,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: code,
            timed_out: false,
        }
    }

    /// Answers by joined argv; unknown commands behave like a missing binary.
    #[derive(Default)]
    struct ScriptedRunner {
        script: RefCell<HashMap<String, CommandResult>>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        fn on(&self, line: &str, result: CommandResult) {
            self.script.borrow_mut().insert(line.to_string(), result);
        }

        fn called(&self, line: &str) -> bool {
            self.calls.borrow().iter().any(|c| c == line)
        }
    }

    impl Runner for ScriptedRunner {
        fn run(&self, argv: &[String], _t: Option<Duration>) -> AdminResult<CommandResult> {
            let line = argv.join(" ");
            self.calls.borrow_mut().push(line.clone());
            Ok(self
                .script
                .borrow()
                .get(&line)
                .cloned()
                .unwrap_or_else(|| out(false, "", "command not found", 127)))
        }

        fn run_pipeline(
            &self,
            segments: &[Vec<String>],
            t: Option<Duration>,
        ) -> AdminResult<CommandResult> {
            let line = segments
                .iter()
                .map(|s| s.join(" "))
                .collect::<Vec<_>>()
                .join(" | ");
            self.run(&[line], t)
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    fn config(tmp: &TempDir) -> Config {
        let mut cfg = Config::default();
        cfg.apache.sites_enabled = tmp.path().join("sites-enabled");
        cfg.apache.access_log = tmp.path().join("access.log");
        cfg.apache.error_log = tmp.path().join("error.log");
        cfg.apache.restart_grace_secs = 0;
        fs::create_dir_all(&cfg.apache.sites_enabled).unwrap();
        cfg
    }

    #[test]
    fn status_composes_every_probe() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        for f in ["a.conf", "b.conf", "README"] {
            fs::write(cfg.apache.sites_enabled.join(f), "").unwrap();
        }
        let runner = ScriptedRunner::default();
        runner.on(
            "apache2 -v",
            out(true, "Server version: Apache/2.4.58 (Ubuntu)\nServer built: 2024\n", "", 0),
        );
        runner.on(
            "uptime",
            out(
                true,
                " 10:00:00 up 3 days,  2:04,  2 users,  load average: 0.42, 0.31, 0.20\n",
                "",
                0,
            ),
        );
        runner.on(
            "netstat -an",
            out(
                true,
                "tcp 0 0 10.0.0.5:80 203.0.113.9:51544 ESTABLISHED\n\
                 tcp 0 0 10.0.0.5:80 203.0.113.7:40112 ESTABLISHED\n\
                 tcp 0 0 0.0.0.0:80 0.0.0.0:* LISTEN\n",
                "",
                0,
            ),
        );
        runner.on("systemctl is-active apache2", out(true, "active\n", "", 0));
        runner.on("ps -C apache2 -o rss=", out(true, " 102400\n 102400\n", "", 0));

        let status = ApacheStatusReporter::new(&cfg, &runner).get_status();
        assert_eq!(status.version, "2.4.58");
        assert!(status.running);
        assert_eq!(status.status, "running");
        assert_eq!(status.uptime, "3 days,  2:04");
        assert_eq!(status.load, LoadAverage { one: 0.42, five: 0.31, fifteen: 0.20 });
        assert_eq!(status.active_virtual_hosts, 2);
        assert_eq!(status.connections, 2);
        assert!(status.listening);
        assert_eq!(status.memory_usage.mb, 200);
        assert_eq!(status.memory_usage.formatted, "200 MB");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["load"]["15m"], 0.2);
        assert_eq!(json["activeVirtualHosts"], 2);
    }

    #[test]
    fn failing_probes_fall_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.apache.sites_enabled = tmp.path().join("missing");
        let runner = ScriptedRunner::default();
        runner.on("systemctl is-active apache2", out(false, "inactive\n", "", 3));

        let status = ApacheStatusReporter::new(&cfg, &runner).get_status();
        assert_eq!(status.version, "Unknown");
        assert_eq!(status.uptime, "Unknown");
        assert_eq!(status.load, LoadAverage::default());
        assert_eq!(status.active_virtual_hosts, 0);
        assert_eq!(status.connections, 0);
        assert!(!status.listening);
        assert_eq!(status.memory_usage.mb, 0);
        assert!(!status.running);
        assert_eq!(status.status, "stopped");
    }

    #[test]
    fn configtest_requires_syntax_ok_marker() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let runner = ScriptedRunner::default();
        runner.on("sudo apache2ctl configtest", out(true, "", "Syntax OK\n", 0));
        let check = ApacheStatusReporter::new(&cfg, &runner)
            .check_configuration()
            .unwrap();
        assert_eq!(check.details, "Syntax OK");

        let runner = ScriptedRunner::default();
        runner.on(
            "sudo apache2ctl configtest",
            out(false, "", "AH00526: Syntax error on line 3 of x.conf\n", 1),
        );
        let err = ApacheStatusReporter::new(&cfg, &runner)
            .check_configuration()
            .unwrap_err();
        assert!(matches!(err, AdminError::ConfigSyntax(_)));
        assert!(err.to_string().contains("AH00526"));
    }

    #[test]
    fn reload_fails_fast_on_syntax_error() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let runner = ScriptedRunner::default();
        runner.on("sudo apache2ctl configtest", out(false, "", "bad\n", 1));
        runner.on("sudo systemctl reload apache2", out(true, "", "", 0));

        let err = ApacheStatusReporter::new(&cfg, &runner)
            .reload_configuration()
            .unwrap_err();
        assert!(matches!(err, AdminError::ConfigSyntax(_)));
        assert!(!runner.called("sudo systemctl reload apache2"));

        runner.on("sudo apache2ctl configtest", out(true, "Syntax OK\n", "", 0));
        let msg = ApacheStatusReporter::new(&cfg, &runner)
            .reload_configuration()
            .unwrap();
        assert_eq!(msg.status.as_deref(), Some("reloaded"));
        assert!(runner.called("sudo systemctl reload apache2"));
    }

    #[test]
    fn restart_rechecks_the_daemon() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let runner = ScriptedRunner::default();
        runner.on("sudo systemctl restart apache2", out(true, "", "", 0));
        runner.on("systemctl is-active apache2", out(false, "failed\n", "", 3));
        let err = ApacheStatusReporter::new(&cfg, &runner)
            .restart_server()
            .unwrap_err();
        assert!(err.is_execution());
        assert_eq!(err.to_string(), "Apache failed to restart properly");

        runner.on("systemctl is-active apache2", out(true, "active\n", "", 0));
        let msg = ApacheStatusReporter::new(&cfg, &runner)
            .restart_server()
            .unwrap();
        assert_eq!(msg.message, "Apache server restarted successfully");
        assert_eq!(msg.status.as_deref(), Some("active"));

        let runner = ScriptedRunner::default();
        runner.on("sudo systemctl restart apache2", out(false, "", "denied", 1));
        let err = ApacheStatusReporter::new(&cfg, &runner)
            .restart_server()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "restart Apache server failed with exit code 1: denied"
        );
    }

    #[test]
    fn logs_validate_before_touching_files() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let runner = ScriptedRunner::default();
        let reporter = ApacheStatusReporter::new(&cfg, &runner);

        assert_eq!(reporter.get_logs("debug", 10, None).unwrap_err().status_code(), 400);
        assert_eq!(reporter.get_logs("error", 0, None).unwrap_err().status_code(), 400);
        assert_eq!(reporter.get_logs("error", 1001, None).unwrap_err().status_code(), 400);
        let err = reporter.get_logs("error", 10, None).unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().starts_with("Log file not found"));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn logs_tail_and_filter_real_files() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        fs::write(
            &cfg.apache.access_log,
            "1.1.1.1 - - [t1] \"GET /a HTTP/1.1\" 200 10 \"-\" \"curl\"\n\
             2.2.2.2 - - [t2] \"GET /b HTTP/1.1\" 404 20 \"-\" \"Mozilla\"\n\
             not an access line\n\
             3.3.3.3 - - [t3] \"POST /c HTTP/1.1\" 500 30 \"-\" \"mozilla\"\n",
        )
        .unwrap();
        let runner = CommandExecutor::new(Duration::from_secs(5));
        let reporter = ApacheStatusReporter::new(&cfg, &runner);

        let last_two = reporter.get_logs("access", 2, None).unwrap();
        assert_eq!(last_two.len(), 2);
        assert!(matches!(last_two[0], LogEntry::Raw { .. }));
        assert!(matches!(&last_two[1], LogEntry::Access { ip, .. } if ip == "3.3.3.3"));

        let filtered = reporter.get_logs("access", 10, Some("MOZILLA")).unwrap();
        assert_eq!(filtered.len(), 2);

        let nothing = reporter.get_logs("access", 10, Some("'; rm -rf /")).unwrap();
        assert!(nothing.is_empty());
    }

    #[test]
    fn filtered_read_failure_is_not_an_empty_match() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        fs::write(&cfg.apache.error_log, "x\n").unwrap();
        let pipeline = format!(
            "tail -n 10 {} | grep -i -F -e x",
            cfg.apache.error_log.display()
        );

        let runner = ScriptedRunner::default();
        runner.on(
            &pipeline,
            out(false, "", "tail: error reading 'error.log': Input/output error\n", 1),
        );
        let err = ApacheStatusReporter::new(&cfg, &runner)
            .get_logs("error", 10, Some("x"))
            .unwrap_err();
        assert!(err.is_execution());
        assert!(err.to_string().starts_with("read log file failed with exit code 1"));
        assert!(err.to_string().contains("Input/output error"));

        runner.on(&pipeline, out(false, "", "", 1));
        let none = ApacheStatusReporter::new(&cfg, &runner)
            .get_logs("error", 10, Some("x"))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn filter_keeps_surrounding_whitespace() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        fs::write(&cfg.apache.error_log, "a GET /x\nFORGET it\nx GET y\n").unwrap();
        let runner = CommandExecutor::new(Duration::from_secs(5));
        let reporter = ApacheStatusReporter::new(&cfg, &runner);

        assert_eq!(reporter.get_logs("error", 10, Some(" GET ")).unwrap().len(), 2);
        assert_eq!(reporter.get_logs("error", 10, Some("GET")).unwrap().len(), 3);
        assert_eq!(reporter.get_logs("error", 10, Some("   ")).unwrap().len(), 3);
    }

    #[test]
    fn status_output_parsers() {
        assert_eq!(parse_version("Apache/2.2.34 (Unix)").as_deref(), Some("2.2.34"));
        assert_eq!(parse_version("nginx/1.25"), None);
        assert_eq!(
            parse_load("up 1 min, 1 user, load averages: 1.50 1.25 1.00"),
            Some(LoadAverage { one: 1.5, five: 1.25, fifteen: 1.0 })
        );
        assert_eq!(
            parse_uptime("10:00 up 5 min,  1 user,  load average: 0, 0, 0").as_deref(),
            Some("5 min")
        );
        assert_eq!(sum_rss_kb("1024\n\n2048\njunk\n"), 3072);
    }
}
