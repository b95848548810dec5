use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use taskscope_core::config::ConfigOverrides;
use taskscope_core::error::AppError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the task collection and show one page of it
    ///
    /// Example: taskscope list --status OVERDUE --sort due
    /// Example: taskscope list --customer ann --from 01-03-2024 --to 31-03-2024
    List(ListArgs),
    /// Edit a task through the active write contract
    ///
    /// Example: taskscope edit 65a1b2c3d4e5f60718293a4b --name "Call back" --due 15-03-2024
    /// Example: taskscope edit 65a1b2c3d4e5f60718293a4b --done
    Edit(EditArgs),
    /// Delete a task (completes it remotely)
    ///
    /// Example: taskscope delete 65a1b2c3d4e5f60718293a4b
    Delete { id: String },
    /// Learn the write contract from recorded host traffic
    ///
    /// Example: taskscope learn capture.json
    Learn { capture: PathBuf },
    /// Show the active write contract
    ///
    /// Example: taskscope contract
    Contract,
    /// Forget the learned write contract
    ///
    /// Example: taskscope reset
    Reset,
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Name contains
    #[arg(long)]
    pub name: Option<String>,
    /// Customer name contains
    #[arg(long)]
    pub customer: Option<String>,
    /// Creator name contains
    #[arg(long)]
    pub creator: Option<String>,
    /// Assignee name contains
    #[arg(long)]
    pub assignee: Option<String>,
    /// PENDING, TODAY, OVERDUE or DONE; repeat or comma-separate
    #[arg(long = "status", value_delimiter = ',')]
    pub statuses: Vec<String>,
    /// Task type; repeat or comma-separate
    #[arg(long = "type", value_delimiter = ',')]
    pub types: Vec<String>,
    /// Due on or after (DD-MM-YYYY, DDMMYYYY or YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,
    /// Due on or before, whole day included
    #[arg(long)]
    pub to: Option<String>,
    /// due, name, customer, creator, type or status
    #[arg(long)]
    pub sort: Option<String>,
    /// Sort descending
    #[arg(long)]
    pub desc: bool,
    #[arg(long)]
    pub page: Option<usize>,
    /// 25, 50, 100 or 200
    #[arg(long = "page-size")]
    pub page_size: Option<usize>,
    /// Drop the stored filters and sort before applying these
    #[arg(long)]
    pub reset: bool,
}

impl ListArgs {
    pub fn has_filters(&self) -> bool {
        self.name.is_some()
            || self.customer.is_some()
            || self.creator.is_some()
            || self.assignee.is_some()
            || !self.statuses.is_empty()
            || !self.types.is_empty()
            || self.from.is_some()
            || self.to.is_some()
    }
}

#[derive(Args, Debug, Default)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    /// New due date (DD-MM-YYYY, DDMMYYYY or YYYY-MM-DD)
    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,
    #[arg(long)]
    pub clear_due: bool,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(long, conflicts_with = "undone")]
    pub done: bool,
    #[arg(long)]
    pub undone: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    BaseUrl,
    ApiNamespace,
    StaticContract,
    FetchTimeoutMs,
    FetchLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let canonical_field = canonicalize_flag_name(key_raw)
        .ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "base_url" | "url" => ConfigOverrideTarget::BaseUrl,
        "api_namespace" | "namespace" => ConfigOverrideTarget::ApiNamespace,
        "static_contract" => ConfigOverrideTarget::StaticContract,
        "fetch_timeout_ms" | "fetch_timeout" => ConfigOverrideTarget::FetchTimeoutMs,
        "fetch_limit" => ConfigOverrideTarget::FetchLimit,
        other => return Err(format!("unknown config field '{other}'")),
    };

    Ok(ParsedConfigOverride {
        target,
        value: value_raw.trim().to_string(),
    })
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("expected true or false, got '{value}'")),
    }
}

fn parse_number<N: std::str::FromStr>(value: &str) -> Result<N, String> {
    value
        .parse()
        .map_err(|_| format!("expected a positive number, got '{value}'"))
}

/// Folds every `--config-override` into one set of typed overrides. Later ones win.
pub fn collect_overrides(raw: &[String]) -> Result<ConfigOverrides, AppError> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let parsed = parse_config_override(entry).map_err(AppError::invalid_input)?;
        let value = parsed.value;
        let applied = match parsed.target {
            ConfigOverrideTarget::BaseUrl => {
                overrides.base_url = Some(value);
                Ok(())
            }
            ConfigOverrideTarget::ApiNamespace => {
                overrides.api_namespace = Some(value);
                Ok(())
            }
            ConfigOverrideTarget::StaticContract => {
                parse_flag(&value).map(|flag| overrides.static_contract = Some(flag))
            }
            ConfigOverrideTarget::FetchTimeoutMs => {
                parse_number(&value).map(|ms| overrides.fetch_timeout_ms = Some(ms))
            }
            ConfigOverrideTarget::FetchLimit => {
                parse_number(&value).map(|limit| overrides.fetch_limit = Some(limit))
            }
        };
        applied.map_err(|message| AppError::invalid_input(format!("{entry}: {message}")))?;
    }
    Ok(overrides)
}
