// ============================================================================
// src/system.rs – Host facts and small probe parsers
// ============================================================================

use crate::cmd::Runner;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::warn;

const MEMINFO: &str = "/proc/meminfo";
const LOADAVG: &str = "/proc/loadavg";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfoReport {
    pub os: String,
    pub hostname: String,
    pub disk_free: u64,
    pub disk_total: u64,
    pub disk_free_formatted: String,
    /// kB, as reported by the kernel.
    pub memory: Option<MemoryInfo>,
    pub load_average: [f64; 3],
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub sudo_access: bool,
}

/// Gather host facts; every fact falls back to a default on failure.
pub fn collect(runner: &dyn Runner, sudo_check: &str) -> SystemInfoReport {
    let os = nix::sys::utsname::uname()
        .map(|u| {
            format!(
                "{} {} {} {}",
                u.sysname().to_string_lossy(),
                u.release().to_string_lossy(),
                u.version().to_string_lossy(),
                u.machine().to_string_lossy()
            )
        })
        .unwrap_or_else(|_| "Unknown".to_string());
    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown".to_string());

    let (disk_free, disk_total) = match nix::sys::statvfs::statvfs("/") {
        Ok(st) => {
            let frag = st.fragment_size() as u64;
            (
                st.blocks_available() as u64 * frag,
                st.blocks() as u64 * frag,
            )
        }
        Err(e) => {
            warn!("statvfs(/) failed: {e}");
            (0, 0)
        }
    };

    let uid = nix::unistd::getuid();
    let gid = nix::unistd::getgid();
    let user = nix::unistd::User::from_uid(uid)
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| uid.to_string());

    let sudo_access = runner
        .run_line(sudo_check, &[])
        .map(|r| r.success)
        .unwrap_or(false);

    SystemInfoReport {
        os,
        hostname,
        disk_free,
        disk_total,
        disk_free_formatted: format_bytes(disk_free, 2),
        memory: read_meminfo(Path::new(MEMINFO)),
        load_average: fs::read_to_string(LOADAVG)
            .map(|s| parse_loadavg(&s))
            .unwrap_or_default(),
        user,
        uid: uid.as_raw(),
        gid: gid.as_raw(),
        sudo_access,
    }
}

pub fn read_meminfo(path: &Path) -> Option<MemoryInfo> {
    fs::read_to_string(path).ok().map(|s| parse_meminfo(&s))
}

pub fn parse_meminfo(text: &str) -> MemoryInfo {
    let field = |name: &str| -> u64 {
        text.lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(key, _)| key.trim() == name)
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    };
    MemoryInfo {
        total: field("MemTotal"),
        free: field("MemFree"),
        available: field("MemAvailable"),
        cached: field("Cached"),
        swap_total: field("SwapTotal"),
        swap_free: field("SwapFree"),
    }
}

fn parse_loadavg(text: &str) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (slot, tok) in out.iter_mut().zip(text.split_whitespace()) {
        *slot = tok.parse().unwrap_or(0.0);
    }
    out
}

/// `1536` -> `1.5 KB`; base 1024, capped at TB.
pub fn format_bytes(bytes: u64, precision: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.precision$}");
    let trimmed = if rounded.contains('.') {
        rounded.trim_end_matches('0').trim_end_matches('.')
    } else {
        rounded.as_str()
    };
    format!("{trimmed} {}", UNITS[unit])
}

/// `netstat -an` rows whose local address is on `port` and in `state`.
fn rows_on_port<'t>(netstat: &'t str, port: u16, state: &'t str) -> impl Iterator<Item = &'t str> {
    let suffix = format!(":{port}");
    netstat.lines().filter(move |line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        cols.len() >= 6
            && cols[0].starts_with("tcp")
            && cols[3].ends_with(&suffix)
            && cols.last() == Some(&state)
    })
}

pub fn connections_on_port(netstat: &str, port: u16) -> Vec<&str> {
    rows_on_port(netstat, port, "ESTABLISHED").collect()
}

pub fn port_in_use(netstat: &str, port: u16) -> bool {
    rows_on_port(netstat, port, "LISTEN").next().is_some()
}
