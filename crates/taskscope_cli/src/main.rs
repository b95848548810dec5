use clap::{CommandFactory, Parser};
use serde_json::json;
use std::io::{self, BufRead};
use taskscope_core::config::{Config, load_config_with_fallback, merge_overrides};
use taskscope_core::contract::{ContractStore, SemanticField, SharedContractStore};
use taskscope_core::credentials::{CredentialSource, StaticCredentials};
use taskscope_core::error::AppError;
use taskscope_core::model::{StatusUi, Task};
use taskscope_core::query::{Sort, SortDirection, SortKey};
use taskscope_core::session::ExplorerSession;
use taskscope_core::storage::contract_file::contract_path;
use taskscope_core::storage::store_dir;
use taskscope_core::temporal::{iso_date, local_offset, parse_date_input};
use taskscope_core::traffic::parse_capture;
use taskscope_core::transport::ReqwestTransport;
use time::UtcOffset;
use time::format_description::well_known::Rfc3339;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod cli;
mod render;

use cli::{Cli, Command, EditArgs, ListArgs, collect_overrides};
use render::TerminalTarget;

type Session = ExplorerSession<ReqwestTransport>;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::invalid_input("unterminated quote in command"));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

fn task_json(task: &Task) -> serde_json::Value {
    json!({
        "id": task.id,
        "name": task.name,
        "type": task.task_type,
        "notes": task.notes,
        "status": task.status_ui,
        "due_date": task.due_date.and_then(|due| due.format(&Rfc3339).ok()),
        "completion_date": task.completion_date.and_then(|done| done.format(&Rfc3339).ok()),
        "customer": task.customer_name,
        "created_by": task.created_by_name,
        "assignee": task.staff_name,
    })
}

fn load_config(cli: &Cli) -> Result<Config, AppError> {
    let overrides = collect_overrides(&cli.config_override)?;
    let loaded = load_config_with_fallback();
    if let Some(err) = loaded.error {
        warn!("using default config: {err}");
    }
    Ok(merge_overrides(&loaded.config, &overrides))
}

fn open_contracts(config: &Config) -> Result<SharedContractStore, AppError> {
    Ok(ContractStore::open(contract_path()?, config.static_contract()).shared())
}

fn build_session(config: &Config, offset: UtcOffset) -> Result<Session, AppError> {
    let session = ExplorerSession::new(
        ReqwestTransport::new(),
        config.endpoints(),
        open_contracts(config)?,
        StaticCredentials::from_env(),
    )
    .with_offset(offset)
    .with_fetch_timeout(config.fetch_timeout())
    .with_fetch_limit(config.fetch_limit)
    .with_preferences_dir(store_dir()?);
    Ok(session)
}

fn date_bound(raw: &Option<String>) -> Result<Option<String>, AppError> {
    match raw {
        Some(value) => Ok(parse_date_input(value)?.map(iso_date)),
        None => Ok(None),
    }
}

fn apply_list_args(session: &Session, args: &ListArgs) -> Result<(), AppError> {
    if args.reset {
        session.reset_filters();
    }
    if args.has_filters() {
        let mut filters = session.query().filters;
        if let Some(name) = args.name.as_ref() {
            filters.q_name = name.clone();
        }
        if let Some(customer) = args.customer.as_ref() {
            filters.q_customer = customer.clone();
        }
        if let Some(creator) = args.creator.as_ref() {
            filters.q_creator = creator.clone();
        }
        if let Some(assignee) = args.assignee.as_ref() {
            filters.q_assignee = assignee.clone();
        }
        if !args.statuses.is_empty() {
            filters.statuses = args
                .statuses
                .iter()
                .map(|raw| {
                    StatusUi::parse(raw)
                        .ok_or_else(|| AppError::invalid_input(format!("unknown status: {raw}")))
                })
                .collect::<Result<Vec<_>, AppError>>()?;
        }
        if !args.types.is_empty() {
            filters.types = args.types.iter().map(|raw| raw.trim().to_string()).collect();
        }
        if args.from.is_some() {
            filters.due_from = date_bound(&args.from)?;
        }
        if args.to.is_some() {
            filters.due_to = date_bound(&args.to)?;
        }
        session.set_filters(filters);
    }
    if let Some(raw) = args.sort.as_ref() {
        let key = SortKey::parse(raw)
            .ok_or_else(|| AppError::invalid_input(format!("unknown sort key: {raw}")))?;
        session.set_sort(Sort {
            key,
            direction: if args.desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
        });
    } else if args.desc {
        let mut sort = session.query().sort;
        sort.direction = SortDirection::Desc;
        session.set_sort(sort);
    }
    if let Some(page_size) = args.page_size {
        session.set_page_size(page_size);
    }
    if let Some(page) = args.page {
        session.set_page(page);
    }
    Ok(())
}

async fn run_list(session: &Session, args: &ListArgs, json: bool, offset: UtcOffset) -> Result<(), AppError> {
    session.open().await?;
    apply_list_args(session, args)?;

    let mut target = TerminalTarget::from_env(offset);
    let mode = session.render_now(&mut target);
    if json {
        let view = session.view();
        let (from, to, total) = view.range;
        let payload = json!({
            "tasks": view.page_tasks.iter().map(task_json).collect::<Vec<_>>(),
            "page": view.page,
            "pages": view.pages,
            "range": {"from": from, "to": to, "total": total},
            "loaded": view.total_count,
            "types": view.types,
            "render_mode": mode.label(),
        });
        println!("{payload}");
    } else {
        print!("{}", target.frame());
    }
    Ok(())
}

async fn run_edit(session: &Session, args: &EditArgs, json: bool) -> Result<(), AppError> {
    session.open().await?;
    session.open_editor(&args.id)?;
    session.update_draft(|draft| {
        if let Some(name) = args.name.as_ref() {
            draft.name = name.clone();
        }
        if let Some(due) = args.due.as_ref() {
            draft.due_date_input = due.clone();
        }
        if args.clear_due {
            draft.due_date_input.clear();
        }
        if let Some(notes) = args.notes.as_ref() {
            draft.notes = notes.clone();
        }
        if args.done {
            draft.mark_done = true;
        }
        if args.undone {
            draft.mark_done = false;
        }
    });
    let report = session.save_edit().await?;
    let task = session
        .tasks()
        .into_iter()
        .find(|task| task.id == args.id)
        .ok_or_else(|| AppError::invalid_data(format!("task {} vanished after saving", args.id)))?;

    if json {
        println!(
            "{}",
            json!({
                "task": task_json(&task),
                "attempts": report.attempts,
                "status": report.outcome.status,
                "payload": report.payload,
            })
        );
    } else {
        println!("Updated task: {} ({})", task.name, task.id);
    }
    Ok(())
}

async fn run_delete(session: &Session, id: &str, json: bool) -> Result<(), AppError> {
    session.open().await?;
    let task = session
        .tasks()
        .into_iter()
        .find(|task| task.id == id)
        .ok_or_else(|| AppError::invalid_input(format!("unknown task: {id}")))?;
    session.delete_task(id).await?;
    if json {
        println!("{}", task_json(&task));
    } else {
        println!("Deleted task: {} ({})", task.name, task.id);
    }
    Ok(())
}

fn run_learn(session: &Session, capture: &std::path::Path, json: bool) -> Result<(), AppError> {
    let content = std::fs::read_to_string(capture)
        .map_err(|err| AppError::io(format!("{}: {}", capture.display(), err)))?;
    let calls = parse_capture(&content)?;
    let learned = calls.iter().filter(|call| session.observe(call)).count();

    let store = session.contracts().borrow();
    if json {
        println!(
            "{}",
            json!({
                "observed": calls.len(),
                "learned": learned,
                "contract": store.inferred(),
            })
        );
    } else {
        println!(
            "Observed {} call(s), learned {} contract(s): {}",
            calls.len(),
            learned,
            store.help_text()
        );
    }
    Ok(())
}

fn run_contract(config: &Config, json: bool) -> Result<(), AppError> {
    let contracts = open_contracts(config)?;
    let store = contracts.borrow();
    let active = match store.static_contract() {
        Some(declared) => {
            let location_id = StaticCredentials::from_env().credentials().location_id;
            declared.describe(if location_id.is_empty() {
                "{location}"
            } else {
                location_id.as_str()
            })
        }
        None => store.inferred().clone(),
    };
    if json {
        println!("{}", json!({"help": store.help_text(), "contract": active}));
        return Ok(());
    }

    println!("{}", store.help_text());
    println!("status: {}", active.status.label());
    println!("method: {}", active.method.as_str());
    println!("url: {}", if active.url.is_empty() { "-" } else { active.url.as_str() });
    for field in SemanticField::ALL {
        println!(
            "  {}: {}",
            field.label(),
            active.field_paths.get(field).unwrap_or("-")
        );
    }
    if let Some(error) = active.last_error.as_ref() {
        println!("last error: {error}");
    }
    Ok(())
}

fn run_reset(config: &Config) -> Result<(), AppError> {
    open_contracts(config)?.borrow_mut().reset()?;
    println!("Learned write contract removed.");
    Ok(())
}

async fn run_command(cli: Cli) -> Result<(), AppError> {
    let config = load_config(&cli)?;
    let offset = local_offset();

    match &cli.command {
        Command::List(args) => {
            let session = build_session(&config, offset)?;
            run_list(&session, args, cli.json, offset).await
        }
        Command::Edit(args) => {
            let session = build_session(&config, offset)?;
            run_edit(&session, args, cli.json).await
        }
        Command::Delete { id } => {
            let session = build_session(&config, offset)?;
            run_delete(&session, id, cli.json).await
        }
        Command::Learn { capture } => {
            let session = build_session(&config, offset)?;
            run_learn(&session, capture, cli.json)
        }
        Command::Contract => run_contract(&config, cli.json),
        Command::Reset => run_reset(&config),
    }
}

async fn run_interactive() -> Result<(), AppError> {
    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::io(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("taskscope".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        if let Err(err) = run_command(cli).await {
            eprintln!("ERROR: {}", err);
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();

    let mut args = std::env::args_os();
    args.next();
    if args.next().is_none() {
        if let Err(err) = run_interactive().await {
            eprintln!("ERROR: {}", err);
            std::process::exit(1);
        }
        return;
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run_command(cli).await {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
