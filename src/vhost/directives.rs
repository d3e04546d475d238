// ============================================================================
// src/vhost/directives.rs – Site definition text: parse, generate, slugs
// ============================================================================
//
// Only five directives are recognized. Anything else in a definition file
// (extra blocks, comments, unknown directives, duplicates) is dropped on
// parse, so a rewrite normalizes the file to the fixed template.

use regex::Regex;
use std::sync::LazyLock;

static HOST_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("label regex is valid")
});

/// File stem under sites-available: no separators, no leading dot.
static SITE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").expect("id regex is valid")
});

pub const LOG_DIR_VAR: &str = "${APACHE_LOG_DIR}";

/// The recognized-field view of one definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub server_name: Option<String>,
    pub document_root: Option<String>,
    pub server_alias: Option<String>,
    pub custom_log: Option<String>,
    pub error_log: Option<String>,
}

/// A definition with both mandatory directives present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDefinition {
    pub server_name: String,
    pub document_root: String,
    pub server_alias: Option<String>,
    pub custom_log: Option<String>,
    pub error_log: Option<String>,
}

impl Directives {
    pub fn into_definition(self) -> Option<SiteDefinition> {
        Some(SiteDefinition {
            server_name: self.server_name?,
            document_root: self.document_root?,
            server_alias: self.server_alias,
            custom_log: self.custom_log,
            error_log: self.error_log,
        })
    }
}

/// Filesystem-safe id: every character outside `[A-Za-z0-9-]` becomes `-`.
pub fn slugify(server_name: &str) -> String {
    server_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

pub fn is_valid_id(id: &str) -> bool {
    SITE_ID.is_match(id)
}

/// RFC 1123 host name: dot-separated labels, 253 characters at most.
pub fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && name.split('.').all(|l| HOST_LABEL.is_match(l))
}

/// Alias entries may carry a leading `*.` wildcard.
pub fn is_valid_alias(alias: &str) -> bool {
    is_valid_hostname(alias.strip_prefix("*.").unwrap_or(alias))
}

/// Characters that would let a value break out of its directive line.
pub fn is_safe_value(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_control() || matches!(c, '"' | '<' | '>' | '\\'))
}

/// Line-oriented, first match per directive.
pub fn parse(content: &str) -> Directives {
    let mut out = Directives::default();
    for line in content.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, rest)) = line.split_once(|c: char| c.is_whitespace()) else {
            continue;
        };
        let rest = rest.trim_start();
        if rest.is_empty() {
            continue;
        }
        let slot = match name.to_ascii_lowercase().as_str() {
            "servername" => &mut out.server_name,
            "documentroot" => &mut out.document_root,
            "serveralias" => &mut out.server_alias,
            "customlog" => &mut out.custom_log,
            "errorlog" => &mut out.error_log,
            _ => continue,
        };
        if slot.is_some() {
            continue;
        }
        *slot = if name.eq_ignore_ascii_case("serveralias") {
            Some(rest.trim_end().to_string())
        } else {
            first_value(rest)
        };
    }
    out
}

fn first_value(rest: &str) -> Option<String> {
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"').unwrap_or(quoted.len());
        let v = &quoted[..end];
        return (!v.is_empty()).then(|| v.to_string());
    }
    rest.split_whitespace().next().map(str::to_string)
}

fn arg(value: &str) -> String {
    if value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

pub fn default_error_log(slug: &str) -> String {
    format!("{LOG_DIR_VAR}/{slug}-error.log")
}

pub fn default_custom_log(slug: &str) -> String {
    format!("{LOG_DIR_VAR}/{slug}-access.log")
}

/// Render the fixed `<VirtualHost *:80>` template.
pub fn generate(def: &SiteDefinition) -> String {
    let slug = slugify(&def.server_name);
    let root = arg(&def.document_root);
    let mut out = String::from("<VirtualHost *:80>\n");
    out.push_str(&format!("    ServerName {}\n", def.server_name));
    out.push_str(&format!("    DocumentRoot {root}\n"));
    if let Some(alias) = def.server_alias.as_deref().filter(|a| !a.trim().is_empty()) {
        out.push_str(&format!("    ServerAlias {}\n", alias.trim()));
    }
    out.push_str(&format!("    <Directory {root}>\n"));
    out.push_str("        Options Indexes FollowSymLinks\n");
    out.push_str("        AllowOverride All\n");
    out.push_str("        Require all granted\n");
    out.push_str("    </Directory>\n");
    let error_log = def
        .error_log
        .clone()
        .unwrap_or_else(|| default_error_log(&slug));
    let custom_log = def
        .custom_log
        .clone()
        .unwrap_or_else(|| default_custom_log(&slug));
    out.push_str(&format!("    ErrorLog {}\n", arg(&error_log)));
    out.push_str(&format!("    CustomLog {} combined\n", arg(&custom_log)));
    out.push_str("</VirtualHost>\n");
    out
}
