use std::fmt;
use std::sync::Arc;

use reading_core::model::{BookId, UserId};
use services::{
    AchievementDispatcher, AchievementFeed, HttpProgressRemote, OfflineRemote, ProgressRemote,
    ReadingTracker, RemoteConfig, SyncEngine,
};
use storage::{Storage, UserDataStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    WrongArity { command: &'static str, usage: &'static str },
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
    InvalidBookId { raw: String },
    InvalidGoal { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::WrongArity { command, usage } => {
                write!(f, "{command} expects: {usage}")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw:?}"),
            ArgsError::InvalidBookId { raw } => write!(f, "invalid book id: {raw:?}"),
            ArgsError::InvalidGoal { raw } => write!(f, "invalid goal: {raw}"),
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
    eprintln!("  reading-tracker [show]                      [--db <sqlite_url>] [--user <id>]");
    eprintln!("  reading-tracker progress <book> <read> <total>");
    eprintln!("  reading-tracker finish <book>");
    eprintln!("  reading-tracker select <book>");
    eprintln!("  reading-tracker clear");
    eprintln!("  reading-tracker goal <books>");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:reading.sqlite3");
    eprintln!("  --user local");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  READING_DB_URL, READING_USER_ID");
    eprintln!("  READING_API_BASE_URL, READING_API_TOKEN, READING_API_TIMEOUT_SECS");
    eprintln!("  RUST_LOG (default: info)");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Show,
    Progress {
        book_id: BookId,
        pages_read: String,
        total_pages: String,
    },
    Finish {
        book_id: BookId,
    },
    Select {
        book_id: BookId,
    },
    Clear,
    Goal {
        target_books: u32,
    },
}

impl Command {
    fn parse(name: &str, positional: Vec<String>) -> Result<Self, ArgsError> {
        let mut values = positional.into_iter();
        let command = match name {
            "show" => Self::Show,
            "clear" => Self::Clear,
            "progress" => {
                let (Some(book), Some(pages_read), Some(total_pages)) =
                    (values.next(), values.next(), values.next())
                else {
                    return Err(ArgsError::WrongArity {
                        command: "progress",
                        usage: "<book> <read> <total>",
                    });
                };
                Self::Progress {
                    book_id: parse_book(book)?,
                    pages_read,
                    total_pages,
                }
            }
            "finish" | "select" => {
                let Some(book) = values.next() else {
                    return Err(ArgsError::WrongArity {
                        command: if name == "finish" { "finish" } else { "select" },
                        usage: "<book>",
                    });
                };
                let book_id = parse_book(book)?;
                if name == "finish" {
                    Self::Finish { book_id }
                } else {
                    Self::Select { book_id }
                }
            }
            "goal" => {
                let Some(raw) = values.next() else {
                    return Err(ArgsError::WrongArity {
                        command: "goal",
                        usage: "<books>",
                    });
                };
                let target_books = raw
                    .trim()
                    .parse()
                    .map_err(|_| ArgsError::InvalidGoal { raw: raw.clone() })?;
                Self::Goal { target_books }
            }
            other => return Err(ArgsError::UnknownCommand(other.to_string())),
        };
        if let Some(extra) = values.next() {
            return Err(ArgsError::UnknownArg(extra));
        }
        Ok(command)
    }
}

fn parse_book(raw: String) -> Result<BookId, ArgsError> {
    BookId::new(raw.clone()).map_err(|_| ArgsError::InvalidBookId { raw })
}

struct Args {
    db_url: String,
    user: UserId,
    command: Command,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("READING_DB_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| normalize_sqlite_url("sqlite:reading.sqlite3".into()), normalize_sqlite_url);
        let mut user_raw = std::env::var("READING_USER_ID").unwrap_or_else(|_| "local".into());
        let mut name: Option<String> = None;
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => user_raw = require_value(args, "--user")?,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ if name.is_none() => name = Some(arg),
                _ => positional.push(arg),
            }
        }

        let user = UserId::new(user_raw.clone()).map_err(|_| ArgsError::InvalidUser { raw: user_raw })?;
        let command = Command::parse(name.as_deref().unwrap_or("show"), positional)?;
        Ok(Self {
            db_url,
            user,
            command,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
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

/// Logs go to stderr so command output stays clean on stdout.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_remote() -> Result<Arc<dyn ProgressRemote>, Box<dyn std::error::Error>> {
    match RemoteConfig::from_env()? {
        Some(config) => {
            info!(base_url = %config.base_url, "remote sync enabled");
            Ok(Arc::new(HttpProgressRemote::new(config)?))
        }
        None => {
            info!("READING_API_BASE_URL not set; progress stays local");
            Ok(Arc::new(OfflineRemote))
        }
    }
}

fn apply(tracker: &mut ReadingTracker, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Show => {}
        Command::Progress {
            book_id,
            pages_read,
            total_pages,
        } => {
            tracker.update_progress_input(book_id, &pages_read, &total_pages)?;
        }
        Command::Finish { book_id } => {
            tracker.mark_finished(book_id)?;
        }
        Command::Select { book_id } => tracker.select_book(book_id)?,
        Command::Clear => {
            if tracker.clear_current_book()?.is_none() {
                println!("no book is being read");
            }
        }
        Command::Goal { target_books } => {
            tracker.set_challenge_goal(target_books)?;
        }
    }
    Ok(())
}

fn print_summary(tracker: &ReadingTracker) {
    println!("user: {}", tracker.user());
    match tracker.current_book() {
        Some(book_id) => println!("reading: {book_id}"),
        None => println!("reading: -"),
    }

    let challenge = tracker.challenge_progress();
    match challenge.target {
        Some(target) => {
            let met = if challenge.is_met() { " (goal met)" } else { "" };
            println!("challenge: {}/{target} books{met}", challenge.completed);
        }
        None => println!("challenge: {} books finished, no goal set", challenge.completed),
    }

    if tracker.progress().is_empty() {
        println!("no progress recorded");
        return;
    }
    for (book_id, record) in tracker.progress().iter() {
        let percent = record
            .fraction()
            .map_or_else(|| "--".to_string(), |f| format!("{:.0}%", f * 100.0));
        let done = if record.is_completed() { "  done" } else { "" };
        println!(
            "  {book_id}: {}/{} ({percent}){done}",
            record.pages_read(),
            record.total_pages()
        );
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_logging();

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    let remote = build_remote()?;

    let feed = AchievementFeed::default();
    let store = UserDataStore::new(Arc::clone(&storage.kv), args.user);
    let engine = SyncEngine::builder(store, remote)
        .with_achievements(AchievementDispatcher::new(Arc::new(feed.clone())));
    let mut tracker = ReadingTracker::open(engine).await?;

    let outcome = apply(&mut tracker, args.command);
    tracker.settle().await?;

    let alert = tracker.authorization_alerts().borrow().clone();
    if let Some(alert) = alert {
        eprintln!(
            "remote rejected credentials during {} ({}); sign in again",
            alert.operation, alert.status
        );
    }
    if let Some(toast) = feed.current().filter(|toast| toast.visible) {
        println!(
            "achievement unlocked: {} (+{} pts)",
            toast.event.title, toast.event.points
        );
    }
    if outcome.is_ok() {
        print_summary(&tracker);
    }

    tracker.logout().await;
    outcome
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
