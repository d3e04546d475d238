// ============================================================================
// src/vhost/mod.rs – Virtual host lifecycle (sites-available / sites-enabled)
// ============================================================================
//
// The two site directories are the only state. Every read re-parses the
// definition file; enablement is membership of `{id}.conf` in sites-enabled.
// Mutations run under the administrative lock as write -> toggle -> reload.
// A failure after the write is surfaced but never rolled back.

pub mod directives;
pub mod fields;

use crate::cmd::Runner;
use crate::config::Config;
use crate::error::{AdminError, AdminResult};
use crate::outcome::OperationMessage;
use crate::util::atomic::atomic_write_site;
use crate::util::audit::AuditTrail;
use crate::util::lock::AdminLock;
use crate::util::pathguard::PathValidator;
use directives::{Directives, SiteDefinition};
use fields::{bool_field, string_field, Field, Fields};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SITE_SUFFIX: &str = ".conf";
const DOCUMENT_ROOT_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHostConfig {
    pub id: String,
    pub server_name: String,
    pub document_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    pub enabled: bool,
}

impl VirtualHostConfig {
    fn from_definition(id: &str, def: SiteDefinition, enabled: bool) -> Self {
        Self {
            id: id.to_string(),
            server_name: def.server_name,
            document_root: def.document_root,
            server_alias: def.server_alias,
            custom_log: def.custom_log,
            error_log: def.error_log,
            enabled,
        }
    }
}

/// Validated optional fields shared by create and update.
struct SiteFields {
    server_name: Field,
    document_root: Field,
    server_alias: Field,
    custom_log: Field,
    error_log: Field,
    enabled: Option<bool>,
    create_document_root: bool,
}

pub struct VirtualHostStore<'a> {
    available: PathBuf,
    enabled: PathBuf,
    enable_cmd: String,
    disable_cmd: String,
    reload_cmd: String,
    max_aliases: usize,
    runner: &'a dyn Runner,
    paths: &'a PathValidator,
    lock: AdminLock,
    audit: AuditTrail,
}

impl<'a> VirtualHostStore<'a> {
    pub fn new(cfg: &Config, runner: &'a dyn Runner, paths: &'a PathValidator) -> Self {
        Self {
            available: cfg.apache.sites_available.clone(),
            enabled: cfg.apache.sites_enabled.clone(),
            enable_cmd: cfg.apache.commands.enable_site.clone(),
            disable_cmd: cfg.apache.commands.disable_site.clone(),
            reload_cmd: cfg.apache.commands.reload.clone(),
            max_aliases: cfg.validation.max_aliases,
            runner,
            paths,
            lock: AdminLock::new(&cfg.security.lock_file),
            audit: AuditTrail::new(cfg.logging.audit_file.clone()),
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn list_all(&self) -> AdminResult<Vec<VirtualHostConfig>> {
        let entries = fs::read_dir(&self.available).map_err(|e| {
            AdminError::execution(format!(
                "Failed to scan {}: {e}",
                self.available.display()
            ))
        })?;

        let mut hosts = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_suffix(SITE_SUFFIX) else {
                continue;
            };
            if !directives::is_valid_id(id) || !entry.path().is_file() {
                continue;
            }
            match self.load_definition(id) {
                Ok(def) => hosts.push(VirtualHostConfig::from_definition(
                    id,
                    def,
                    self.is_enabled(id),
                )),
                Err(e) => warn!(site = %id, "skipping unreadable site definition: {e}"),
            }
        }
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hosts)
    }

    pub fn get(&self, id: &str) -> AdminResult<VirtualHostConfig> {
        check_id(id)?;
        self.require_exists(id)?;
        let def = self.load_definition(id)?;
        Ok(VirtualHostConfig::from_definition(id, def, self.is_enabled(id)))
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    pub fn create(&self, data: &Fields) -> AdminResult<VirtualHostConfig> {
        let input = self.validate_fields(data)?;
        let (Some(server_name), Some(document_root)) =
            (input.server_name.value(), input.document_root.value())
        else {
            return Err(AdminError::validation(
                "ServerName and DocumentRoot are required",
            ));
        };

        let id = directives::slugify(server_name);
        let def = SiteDefinition {
            server_name: server_name.to_string(),
            document_root: document_root.to_string(),
            server_alias: input.server_alias.value().map(str::to_string),
            custom_log: input.custom_log.value().map(str::to_string),
            error_log: input.error_log.value().map(str::to_string),
        };

        let _guard = self.lock.acquire()?;
        let file = self.site_file(&id);
        if file.exists() {
            return Err(AdminError::Conflict("VirtualHost already exists".into()));
        }
        if input.create_document_root {
            self.paths
                .ensure_directory(Path::new(&def.document_root), DOCUMENT_ROOT_MODE)?;
        }

        self.write_definition(&file, &def, false)?;
        info!(site = %id, server_name = %def.server_name, "virtual host created");
        self.audit.record("SITE_CREATE", &id);

        if input.enabled == Some(true) {
            self.enable(&id)?;
        }
        self.reload()?;
        self.get(&id)
    }

    pub fn update(&self, id: &str, partial: &Fields) -> AdminResult<VirtualHostConfig> {
        check_id(id)?;
        let input = self.validate_fields(partial)?;

        let _guard = self.lock.acquire()?;
        self.require_exists(id)?;
        let existing = self.load_definition(id)?;
        if let Some(name) = input.server_name.value() {
            let renamed = !name.eq_ignore_ascii_case(&existing.server_name);
            if renamed && directives::slugify(name) != id {
                return Err(AdminError::validation(format!(
                    "ServerName {name} does not match VirtualHost id {id}"
                )));
            }
        }
        let merged = SiteDefinition {
            server_name: input
                .server_name
                .merge(Some(existing.server_name.clone()))
                .unwrap_or(existing.server_name),
            document_root: input
                .document_root
                .merge(Some(existing.document_root.clone()))
                .unwrap_or(existing.document_root),
            server_alias: input.server_alias.merge(existing.server_alias),
            custom_log: input.custom_log.merge(existing.custom_log),
            error_log: input.error_log.merge(existing.error_log),
        };
        if input.create_document_root {
            self.paths
                .ensure_directory(Path::new(&merged.document_root), DOCUMENT_ROOT_MODE)?;
        }

        self.write_definition(&self.site_file(id), &merged, true)?;
        info!(site = %id, "virtual host updated");
        self.audit.record("SITE_UPDATE", id);

        match input.enabled {
            Some(true) if !self.is_enabled(id) => self.enable(id)?,
            Some(false) if self.is_enabled(id) => self.disable(id)?,
            _ => {}
        }
        self.reload()?;
        self.get(id)
    }

    pub fn delete(&self, id: &str) -> AdminResult<OperationMessage> {
        check_id(id)?;
        let _guard = self.lock.acquire()?;
        self.require_exists(id)?;

        if self.is_enabled(id) {
            self.disable(id)?;
        }
        fs::remove_file(self.site_file(id)).map_err(|e| {
            AdminError::execution(format!(
                "Failed to delete VirtualHost configuration: {e}"
            ))
        })?;
        info!(site = %id, "virtual host deleted");
        self.audit.record("SITE_DELETE", id);

        self.reload()?;
        Ok(OperationMessage::new("VirtualHost deleted successfully"))
    }

    pub fn toggle(&self, id: &str) -> AdminResult<VirtualHostConfig> {
        check_id(id)?;
        let _guard = self.lock.acquire()?;
        self.require_exists(id)?;

        let now_enabled = !self.is_enabled(id);
        if now_enabled {
            self.enable(id)?;
        } else {
            self.disable(id)?;
        }
        info!(site = %id, enabled = now_enabled, "virtual host toggled");
        self.audit
            .record("SITE_TOGGLE", &format!("{id} enabled={now_enabled}"));

        self.reload()?;
        self.get(id)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn site_file(&self, id: &str) -> PathBuf {
        self.available.join(format!("{id}{SITE_SUFFIX}"))
    }

    /// Any entry, dangling symlinks included, marks the site enabled.
    fn is_enabled(&self, id: &str) -> bool {
        fs::symlink_metadata(self.enabled.join(format!("{id}{SITE_SUFFIX}"))).is_ok()
    }

    fn require_exists(&self, id: &str) -> AdminResult<()> {
        if self.site_file(id).is_file() {
            Ok(())
        } else {
            Err(AdminError::not_found("VirtualHost not found"))
        }
    }

    fn load_definition(&self, id: &str) -> AdminResult<SiteDefinition> {
        let content = fs::read_to_string(self.site_file(id)).map_err(|e| {
            AdminError::Parse(format!("Failed to read VirtualHost configuration: {e}"))
        })?;
        let parsed: Directives = directives::parse(&content);
        parsed.into_definition().ok_or_else(|| {
            AdminError::Parse("Failed to parse VirtualHost configuration".into())
        })
    }

    fn write_definition(
        &self,
        file: &Path,
        def: &SiteDefinition,
        replace: bool,
    ) -> AdminResult<()> {
        atomic_write_site(file, &directives::generate(def), replace).map_err(|e| {
            AdminError::execution(format!(
                "Failed to write VirtualHost configuration file: {e:#}"
            ))
        })
    }

    fn enable(&self, id: &str) -> AdminResult<()> {
        self.runner
            .run_line(&self.enable_cmd, &[id])?
            .require_success("enable VirtualHost", self.runner.default_timeout())?;
        Ok(())
    }

    fn disable(&self, id: &str) -> AdminResult<()> {
        self.runner
            .run_line(&self.disable_cmd, &[id])?
            .require_success("disable VirtualHost", self.runner.default_timeout())?;
        Ok(())
    }

    fn reload(&self) -> AdminResult<()> {
        self.runner
            .run_line(&self.reload_cmd, &[])?
            .require_success("reload Apache", self.runner.default_timeout())?;
        Ok(())
    }

    fn validate_fields(&self, data: &Fields) -> AdminResult<SiteFields> {
        let input = SiteFields {
            server_name: string_field(data, "serverName")?,
            document_root: string_field(data, "documentRoot")?,
            server_alias: string_field(data, "serverAlias")?,
            custom_log: string_field(data, "customLog")?,
            error_log: string_field(data, "errorLog")?,
            enabled: bool_field(data, "enabled")?,
            create_document_root: bool_field(data, "createDocumentRoot")?.unwrap_or(false),
        };

        match &input.server_name {
            Field::Set(name) if !directives::is_valid_hostname(name) => {
                return Err(AdminError::validation("Invalid ServerName format"))
            }
            Field::Clear => return Err(AdminError::validation("ServerName cannot be empty")),
            _ => {}
        }

        if let Some(aliases) = input.server_alias.value() {
            let list: Vec<&str> = aliases.split_whitespace().collect();
            if list.len() > self.max_aliases {
                return Err(AdminError::validation(format!(
                    "At most {} ServerAlias entries are allowed",
                    self.max_aliases
                )));
            }
            if let Some(bad) = list.iter().find(|a| !directives::is_valid_alias(a)) {
                return Err(AdminError::validation(format!(
                    "Invalid ServerAlias entry: {bad}"
                )));
            }
        }

        for (key, field) in [("customLog", &input.custom_log), ("errorLog", &input.error_log)] {
            if let Some(v) = field.value() {
                if !directives::is_safe_value(v) {
                    return Err(AdminError::validation(format!("Invalid {key} path")));
                }
            }
        }

        match &input.document_root {
            Field::Set(root) => {
                if !directives::is_safe_value(root) || !Path::new(root).is_absolute() {
                    return Err(AdminError::validation("Invalid DocumentRoot path"));
                }
                if !Path::new(root).is_dir() {
                    if !input.create_document_root {
                        return Err(AdminError::validation(
                            "DocumentRoot directory does not exist",
                        ));
                    }
                    if !self.paths.validate_prospective(Path::new(root)) {
                        return Err(AdminError::Forbidden(format!(
                            "DocumentRoot {root} is outside the allowed directories"
                        )));
                    }
                }
            }
            Field::Clear => {
                return Err(AdminError::validation("DocumentRoot cannot be empty"))
            }
            Field::Absent => {}
        }

        Ok(input)
    }
}

fn check_id(id: &str) -> AdminResult<()> {
    if directives::is_valid_id(id) {
        Ok(())
    } else {
        Err(AdminError::validation("Invalid VirtualHost id"))
    }
}
