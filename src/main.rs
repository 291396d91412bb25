use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use payreq::config::Config;
use payreq::data::{Contact, NewRequest, Request, RequestId};
use payreq::phone::format_e164;
use payreq::sms::{InMemoryMessageStore, SentSmsWatcher, SmsEntry, WatchOutcome};
use payreq::storage::{InMemoryStorage, SqliteStorage, Storage};
use payreq::telemetry::TracingTelemetry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Enables logging to `payreq.log` in the current working directory
    #[arg(short, long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8,
    /// Config file to use instead of the installed one
    #[arg(long)]
    config: Option<PathBuf>,
    /// Keeps requests in memory only
    #[arg(long)]
    memory: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Writes a default config file
    Init,
    /// Waits for a sent SMS to one of the numbers
    ///
    /// SMS store entries are read from stdin as lines `<address> <kind>`, e.g. `5551234567 sent`.
    Watch {
        #[arg(long = "to", required = true)]
        to: Vec<String>,
        /// Seconds to wait; 0 waits until stdin is closed
        #[arg(long)]
        timeout: Option<u64>,
    },
    #[command(flatten)]
    Request(RequestCommand),
}

#[derive(Debug, Subcommand)]
enum RequestCommand {
    /// Stores a new payment request
    Create {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        message: String,
        /// Amount as entered, e.g. `1,000.00`
        #[arg(long)]
        amount: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Lists stored requests
    List {
        /// Only requests not matched to a transaction yet
        #[arg(long)]
        unmatched: bool,
        #[arg(long)]
        recipient: Option<String>,
    },
    /// Shows a single request
    Show { id: RequestId },
    /// Links a request to a settled transaction
    Match { id: RequestId, transaction: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let _guard = init_file_logger(args.verbosity);
    log_panics::init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_installed()?.unwrap_or_default(),
    };

    match args.command {
        Command::Init => {
            let path = config.save_new()?;
            println!("Config written to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch { to, timeout } => watch(&config, to, timeout).await,
        Command::Request(command) => {
            let mut storage: Box<dyn Storage> = if args.memory {
                Box::new(InMemoryStorage::new())
            } else {
                let url = &config.sqlite.url;
                ensure_db_dir(url)?;
                let storage = SqliteStorage::open(url)
                    .await
                    .with_context(|| format!("failed to open database at {url}"))?;
                Box::new(storage)
            };
            run(&config, storage.as_mut(), command)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(config: &Config, storage: &mut dyn Storage, command: RequestCommand) -> anyhow::Result<()> {
    match command {
        RequestCommand::Create {
            recipient,
            message,
            amount,
            reason,
        } => {
            let recipient = match format_e164(&recipient, config.region()?) {
                Some(formatted) => formatted,
                None => {
                    warn!(%recipient, "recipient is not a phone number, storing as is");
                    recipient
                }
            };
            let mut request = NewRequest::new(recipient, message);
            request.amount = amount;
            request.reason = reason;
            let request = storage.store_request(request)?;
            info!(id = %request.id, "created request");
            print_request(&request);
        }
        RequestCommand::List {
            unmatched,
            recipient,
        } => {
            let requests = match (unmatched, recipient.as_deref()) {
                (_, Some(recipient)) => storage.requests_to(recipient),
                (true, None) => storage.unmatched_requests(),
                (false, None) => storage.requests(),
            };
            for request in requests.filter(|request| !unmatched || !request.is_matched()) {
                print_request(&request);
            }
        }
        RequestCommand::Show { id } => {
            let request = storage
                .request(id)
                .with_context(|| format!("no request with id {id}"))?;
            print_request(&request);
            println!("  message: {}", request.message);
            if let Some(reason) = &request.reason {
                println!("  reason: {reason}");
            }
        }
        RequestCommand::Match { id, transaction } => {
            let request = storage.match_transaction(id, transaction)?;
            print_request(&request);
        }
    }
    Ok(())
}

async fn watch(config: &Config, to: Vec<String>, timeout: Option<u64>) -> anyhow::Result<ExitCode> {
    let recipients: Vec<Contact> = (1..)
        .zip(to)
        .map(|(id, number)| Contact::new(id, number))
        .collect();
    let timeout = match timeout {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.watch.timeout(),
    };

    let store = Arc::new(InMemoryMessageStore::new());
    let (sent_tx, sent_rx) = oneshot::channel();
    let handle = SentSmsWatcher::new(
        store.clone(),
        recipients.clone(),
        config.phone_matcher()?,
        Arc::new(TracingTelemetry),
    )
    .with_timeout(timeout)
    .start(move |sent| {
        let _ = sent_tx.send(sent);
    })?;

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match line.parse::<SmsEntry>() {
                    Ok(entry) => store.push(entry),
                    Err(error) => warn!(%error, %line, "skipping invalid sms entry"),
                },
                Ok(None) => break,
                Err(error) => {
                    warn!(%error, "failed to read stdin");
                    break;
                }
            }
        }
        // no more changes will come
        store.disconnect_all();
    });

    let outcome = handle.closed().await;
    let sent = sent_rx.await.unwrap_or(false);
    match outcome {
        WatchOutcome::Sent { contact_id } if sent => {
            let number = recipients
                .iter()
                .find(|contact| contact.id == contact_id)
                .map(|contact| contact.account_number.as_str())
                .unwrap_or_default();
            println!("SMS sent to {number}");
            Ok(ExitCode::SUCCESS)
        }
        WatchOutcome::TimedOut => {
            println!("No SMS sent before timeout");
            Ok(ExitCode::FAILURE)
        }
        _ => {
            println!("No SMS sent");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_request(request: &Request) {
    let status = match request.matched_transaction {
        Some(transaction) => format!("matched {transaction}"),
        None => "pending".to_owned(),
    };
    println!(
        "{}\t{}\t{}\t{}\t{}",
        request.id,
        request.date_sent.format("%Y-%m-%d %H:%M"),
        request.recipient,
        request.amount.as_deref().unwrap_or("-"),
        status,
    );
}

/// Makes sure that the directory of a file based sqlite database exists
fn ensure_db_dir(url: &Url) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(url.path()).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context("could not create data dir")?;
    }
    Ok(())
}

fn init_file_logger(verbosity: u8) -> Option<WorkerGuard> {
    if verbosity == 0 {
        return None;
    }

    let file_appender = tracing_appender::rolling::never("./", "payreq.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let max_level = match verbosity {
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(max_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    Some(guard)
}
