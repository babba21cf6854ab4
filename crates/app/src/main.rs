mod console;

use std::fmt;
use std::sync::Arc;

use exam_core::model::{ExamId, SessionPhase};
use services::{
    Clock, ConfigError, ExamApiConfig, HttpExamApi, SessionController, SessionError, SessionHandle,
    SessionRunner,
};
use storage::repository::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use console::{ConsoleCommand, HELP};

const DEFAULT_DB_URL: &str = "sqlite://exam_sessions.sqlite3";
const DEFAULT_LOG_FILTER: &str = "exam_app=info,services=info,storage=info";

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    MissingExamId,
    InvalidExamId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidApiUrl { raw: String },
    ApiEnv(ConfigError),
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingExamId => write!(f, "--exam-id is required (or set EXAM_ID)"),
            ArgsError::InvalidExamId { raw } => write!(f, "invalid --exam-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidApiUrl { raw } => write!(f, "invalid --api value: {raw}"),
            ArgsError::ApiEnv(err) => write!(f, "invalid EXAM_API_URL: {err}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  exam-app take --exam-id <id> [--api <url>] [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --api http://localhost:8000/api");
    eprintln!("  --db  {DEFAULT_DB_URL}");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_ID, EXAM_API_URL, EXAM_DB_URL, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            _ => None,
        }
    }
}

/// Values taken from the environment before flags are applied.
///
/// `EXAM_API_URL` is read by `ExamApiConfig::from_env` when `--api` is absent.
#[derive(Debug, Default)]
struct EnvDefaults {
    exam_id: Option<String>,
    db_url: Option<String>,
}

impl EnvDefaults {
    fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            exam_id: var("EXAM_ID"),
            db_url: var("EXAM_DB_URL"),
        }
    }
}

#[derive(Debug)]
struct Args {
    exam_id: ExamId,
    api: ExamApiConfig,
    db_url: String,
}

impl Args {
    fn parse_take(
        args: &mut impl Iterator<Item = String>,
        defaults: EnvDefaults,
    ) -> Result<Self, ArgsError> {
        let mut exam_id = defaults.exam_id;
        let mut api_url = None;
        let mut db_url = defaults
            .db_url
            .map_or_else(|| DEFAULT_DB_URL.to_string(), normalize_sqlite_url);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--exam-id" => exam_id = Some(require_value(args, "--exam-id")?),
                "--api" => api_url = Some(require_value(args, "--api")?),
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let raw = exam_id.ok_or(ArgsError::MissingExamId)?;
        let exam_id = raw
            .parse::<ExamId>()
            .map_err(|_| ArgsError::InvalidExamId { raw: raw.clone() })?;

        let api = match api_url {
            Some(raw) => {
                ExamApiConfig::new(&raw).map_err(|_| ArgsError::InvalidApiUrl { raw })?
            }
            None => ExamApiConfig::from_env().map_err(ArgsError::ApiEnv)?,
        };

        Ok(Self {
            exam_id,
            api,
            db_url,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_string();
    }

    let path = std::path::Path::new(trimmed.strip_prefix("sqlite:").unwrap_or(trimmed));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // Flags without a subcommand mean `take`.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Take,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Take,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = match cmd {
        Command::Take => Args::parse_take(&mut iter, EnvDefaults::from_env()),
    }
    .map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;
    let api = Arc::new(HttpExamApi::new(parsed.api));
    tracing::info!(
        exam_id = %parsed.exam_id,
        api = %api.config().base_url(),
        db = %parsed.db_url,
        "opening exam"
    );

    let controller = SessionController::load(
        parsed.exam_id,
        api.as_ref(),
        Clock::default_clock(),
        Arc::clone(&storage.sessions),
        api.clone(),
    )
    .await?;

    let (handle, task) = SessionRunner::spawn(controller);
    interact(&handle).await?;
    drop(handle);

    let controller = task.await?;
    if controller.phase() != SessionPhase::Submitted {
        tracing::info!(
            exam_id = %controller.exam().id(),
            remaining = controller.remaining_seconds(),
            "leaving exam, progress saved"
        );
    }
    Ok(())
}

/// Read commands from stdin until the attempt is submitted, the user quits,
/// or stdin closes.
async fn interact(handle: &SessionHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = handle.subscribe();
    let mut shown_phase = handle.latest().phase;

    println!("{}", console::render(&handle.latest()));
    println!("Type h for help.");

    while handle.latest().phase != SessionPhase::Submitted {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(ConsoleCommand::Help) => {
                        println!("{HELP}");
                        continue;
                    }
                    Ok(command) => command,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                let Some(command) = command.to_session(&handle.latest()) else {
                    continue;
                };
                match handle.send(command).await {
                    Ok(snapshot) => {
                        shown_phase = snapshot.phase;
                        println!("{}", console::render(&snapshot));
                    }
                    Err(SessionError::Closed) => break,
                    Err(err) => println!("{err}"),
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                if snapshot.phase != shown_phase {
                    // Phase moved without a command, e.g. the timer ran out.
                    shown_phase = snapshot.phase;
                    println!("{}", console::render(&snapshot));
                } else if snapshot.phase == SessionPhase::Active
                    && snapshot.remaining_seconds > 0
                    && snapshot.remaining_seconds % 60 == 0
                {
                    println!("{} remaining", snapshot.time_label());
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> impl Iterator<Item = String> {
        raw.iter().map(|s| (*s).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn flags_override_environment() {
        let defaults = EnvDefaults {
            exam_id: Some("3".into()),
            db_url: Some("sqlite:///tmp/env.sqlite3".into()),
        };
        let parsed = Args::parse_take(
            &mut args(&["--exam-id", "9", "--api", "http://flag.example/v1"]),
            defaults,
        )
        .unwrap();
        assert_eq!(parsed.exam_id, ExamId::new(9));
        assert_eq!(parsed.api.base_url().as_str(), "http://flag.example/v1/");
        assert_eq!(parsed.db_url, "sqlite:///tmp/env.sqlite3");
    }

    #[test]
    fn exam_id_is_required() {
        let err = Args::parse_take(&mut args(&[]), EnvDefaults::default()).unwrap_err();
        assert!(matches!(err, ArgsError::MissingExamId));

        let err = Args::parse_take(&mut args(&["--exam-id", "abc"]), EnvDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ArgsError::InvalidExamId { .. }));

        let err = Args::parse_take(&mut args(&["--exam-id"]), EnvDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ArgsError::MissingValue { flag: "--exam-id" }));
    }

    #[test]
    fn defaults_apply_without_flags() {
        let defaults = EnvDefaults {
            exam_id: Some("4".into()),
            ..EnvDefaults::default()
        };
        let parsed = Args::parse_take(&mut args(&[]), defaults).unwrap();
        assert_eq!(parsed.exam_id, ExamId::new(4));
        assert!(parsed.api.base_url().path().ends_with('/'));
        assert_eq!(parsed.db_url, DEFAULT_DB_URL);
    }

    #[test]
    fn rejects_bad_api_url_and_unknown_flags() {
        let err = Args::parse_take(
            &mut args(&["--exam-id", "1", "--api", "not a url"]),
            EnvDefaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ArgsError::InvalidApiUrl { .. }));

        let err = Args::parse_take(&mut args(&["--course", "1"]), EnvDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ArgsError::UnknownArg(arg) if arg == "--course"));
    }

    #[test]
    fn sqlite_urls_are_made_absolute() {
        assert_eq!(
            normalize_sqlite_url("sqlite:///var/exam.db".into()),
            "sqlite:///var/exam.db"
        );
        assert_eq!(
            normalize_sqlite_url("sqlite:/var/exam.db".into()),
            "sqlite:///var/exam.db"
        );
        assert!(normalize_sqlite_url("local.db".into()).starts_with("sqlite:///"));
    }

    #[test]
    fn sqlite_urls_are_trimmed_before_use() {
        assert_eq!(
            normalize_sqlite_url("  sqlite:///var/exam.db \n".into()),
            "sqlite:///var/exam.db"
        );
        assert_eq!(normalize_sqlite_url(" sqlite::memory: ".into()), "sqlite::memory:");
        let parsed = Args::parse_take(
            &mut args(&["--exam-id", "2", "--db", " sqlite:///srv/exam.db "]),
            EnvDefaults::default(),
        )
        .unwrap();
        assert_eq!(parsed.db_url, "sqlite:///srv/exam.db");
    }
}
