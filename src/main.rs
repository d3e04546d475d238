mod apache;
mod cmd;
mod config;
mod error;
mod outcome;
mod system;
mod util;
mod vhost;

use anyhow::{bail, Context, Result};
use apache::ApacheStatusReporter;
use clap::{Args, Parser, Subcommand};
use cmd::CommandExecutor;
use config::Config;
use console::{style, Term};
use dialoguer::Confirm;
use error::{AdminError, ErrorKind};
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use util::pathguard::PathValidator;
use vhost::fields::Fields;
use vhost::VirtualHostStore;

const LOG_ENV: &str = "VHOSTCTL_LOG";

#[derive(Parser, Debug)]
#[command(name = "vhostctl", version, about = "Apache virtual host administration")]
struct Cli {
    /// Config file (.toml, otherwise YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage virtual host definitions
    #[command(subcommand)]
    Sites(SitesCommand),
    /// Daemon status snapshot
    Status,
    /// Tail the error or access log
    Logs {
        #[arg(long = "type", default_value = "error")]
        kind: String,
        #[arg(long, default_value_t = 100)]
        lines: usize,
        /// Case-insensitive substring
        #[arg(long)]
        filter: Option<String>,
    },
    Restart {
        #[arg(long)]
        yes: bool,
    },
    /// Configtest, then reload
    Reload,
    Configtest,
    SystemInfo,
}

#[derive(Subcommand, Debug)]
enum SitesCommand {
    List,
    Get {
        id: String,
    },
    Create {
        #[command(flatten)]
        input: FieldArgs,
    },
    Update {
        id: String,
        #[command(flatten)]
        input: FieldArgs,
    },
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    Toggle {
        id: String,
    },
}

#[derive(Args, Debug)]
struct FieldArgs {
    /// Field assignment, e.g. serverName=example.com or enabled=true
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
    /// JSON object of fields; --set entries override it
    #[arg(long)]
    json: Option<String>,
}

impl FieldArgs {
    fn into_fields(self) -> Result<Fields> {
        let mut fields = match self.json {
            Some(raw) => match serde_json::from_str::<Value>(&raw).context("--json parse")? {
                Value::Object(map) => map,
                _ => bail!("--json must be a JSON object"),
            },
            None => Fields::new(),
        };
        for assignment in self.set {
            let Some((key, value)) = assignment.split_once('=') else {
                bail!("--set expects KEY=VALUE, got {assignment:?}");
            };
            fields.insert(key.trim().to_string(), field_value(value));
        }
        Ok(fields)
    }
}

/// Literals (`true`, `null`, quoted strings) as JSON, anything else verbatim.
fn field_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Null | Value::String(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

#[derive(Serialize)]
struct Envelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u16>,
}

impl Envelope {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
            code: None,
        }
    }

    fn failure(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<AdminError>() {
            Some(admin) => {
                let rec = admin.record();
                Self {
                    success: false,
                    data: None,
                    error: Some(rec.message),
                    kind: Some(rec.kind),
                    code: Some(rec.code),
                }
            }
            None => Self {
                success: false,
                data: None,
                error: Some(format!("{err:#}")),
                kind: None,
                code: None,
            },
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let label = cli.command.label();

    let outcome = load_config(cli.config.as_ref()).and_then(|cfg| {
        init_tracing(&cfg, cli.verbose)?;
        run(&cfg, cli.command)
    });

    let (envelope, code) = match &outcome {
        Ok(data) => (Envelope::ok(data.clone()), ExitCode::SUCCESS),
        Err(e) => (Envelope::failure(e), ExitCode::FAILURE),
    };
    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("cannot render result: {e}"),
    }
    summary(label, &outcome);
    code
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p),
        None => Ok(Config::default()),
    }
}

fn init_tracing(cfg: &Config, verbose: bool) -> Result<()> {
    let directive = if verbose { "debug" } else { cfg.logging.level.as_str() };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(directive));
    match &cfg.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run(cfg: &Config, command: Command) -> Result<Value> {
    let runner = CommandExecutor::new(cfg.security.command_timeout());
    let reporter = ApacheStatusReporter::new(cfg, &runner);
    debug!(?command, "dispatching");

    let data = match command {
        Command::Sites(sites) => {
            let paths = PathValidator::new(&cfg.security.allowed_dirs);
            let store = VirtualHostStore::new(cfg, &runner, &paths);
            match sites {
                SitesCommand::List => to_value(store.list_all()?)?,
                SitesCommand::Get { id } => to_value(store.get(&id)?)?,
                SitesCommand::Create { input } => to_value(store.create(&input.into_fields()?)?)?,
                SitesCommand::Update { id, input } => {
                    to_value(store.update(&id, &input.into_fields()?)?)?
                }
                SitesCommand::Delete { id, yes } => {
                    confirm(&format!("Delete virtual host {id}?"), yes)?;
                    to_value(store.delete(&id)?)?
                }
                SitesCommand::Toggle { id } => to_value(store.toggle(&id)?)?,
            }
        }
        Command::Status => to_value(reporter.get_status())?,
        Command::Logs {
            kind,
            lines,
            filter,
        } => to_value(reporter.get_logs(&kind, lines, filter.as_deref())?)?,
        Command::Restart { yes } => {
            confirm("Restart the Apache server?", yes)?;
            to_value(reporter.restart_server()?)?
        }
        Command::Reload => to_value(reporter.reload_configuration()?)?,
        Command::Configtest => to_value(reporter.check_configuration()?)?,
        Command::SystemInfo => to_value(system::collect(
            &runner,
            &cfg.apache.commands.sudo_check,
        ))?,
    };
    Ok(data)
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).context("serialize result")
}

/// Prompt on interactive terminals; scripted callers proceed.
fn confirm(prompt: &str, yes: bool) -> Result<()> {
    if yes || !Term::stderr().is_term() {
        return Ok(());
    }
    if Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("confirmation prompt")?
    {
        Ok(())
    } else {
        bail!("cancelled by operator")
    }
}

fn summary(label: &str, outcome: &Result<Value>) {
    let term = Term::stderr();
    if !term.is_term() {
        return;
    }
    let line = match outcome {
        Ok(_) => format!("{} {label}", style("✔").green().bold()),
        Err(e) => format!("{} {label}: {}", style("✖").red().bold(), style(e).red()),
    };
    let _ = term.write_line(&line);
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Sites(SitesCommand::List) => "sites list",
            Command::Sites(SitesCommand::Get { .. }) => "sites get",
            Command::Sites(SitesCommand::Create { .. }) => "sites create",
            Command::Sites(SitesCommand::Update { .. }) => "sites update",
            Command::Sites(SitesCommand::Delete { .. }) => "sites delete",
            Command::Sites(SitesCommand::Toggle { .. }) => "sites toggle",
            Command::Status => "status",
            Command::Logs { .. } => "logs",
            Command::Restart { .. } => "restart",
            Command::Reload => "reload",
            Command::Configtest => "configtest",
            Command::SystemInfo => "system-info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_values_keep_strings_and_parse_literals() {
        let args = FieldArgs {
            set: vec![
                "serverName=example.com".into(),
                "enabled=true".into(),
                "serverAlias=null".into(),
                "documentRoot=/var/www/1".into(),
                "errorLog=404".into(),
            ],
            json: Some(r#"{"serverName":"old.example.com","customLog":"/tmp/x"}"#.into()),
        };
        let fields = args.into_fields().unwrap();
        assert_eq!(fields["serverName"], json!("example.com"));
        assert_eq!(fields["enabled"], json!(true));
        assert_eq!(fields["serverAlias"], Value::Null);
        assert_eq!(fields["errorLog"], json!("404"));
        assert_eq!(fields["customLog"], json!("/tmp/x"));
    }

    #[test]
    fn malformed_field_args_are_rejected() {
        let args = FieldArgs {
            set: vec!["serverName".into()],
            json: None,
        };
        assert!(args.into_fields().is_err());
        let args = FieldArgs {
            set: vec![],
            json: Some("[1,2]".into()),
        };
        assert!(args.into_fields().is_err());
    }

    #[test]
    fn failure_envelope_carries_kind_and_code() {
        let err = anyhow::Error::new(AdminError::not_found("VirtualHost not found"));
        let json = serde_json::to_value(Envelope::failure(&err)).unwrap();
        assert_eq!(
            json,
            json!({"success": false, "error": "VirtualHost not found", "kind": "NotFound", "code": 404})
        );

        let plain = anyhow::anyhow!("read config: /nope");
        let json = serde_json::to_value(Envelope::failure(&plain)).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "vhostctl", "sites", "update", "example-com", "--set", "enabled=false",
        ])
        .unwrap();
        assert_eq!(cli.command.label(), "sites update");

        let cli = Cli::try_parse_from(["vhostctl", "logs", "--type", "access", "--lines", "5"])
            .unwrap();
        match cli.command {
            Command::Logs { kind, lines, filter } => {
                assert_eq!(kind, "access");
                assert_eq!(lines, 5);
                assert_eq!(filter, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
