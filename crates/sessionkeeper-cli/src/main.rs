//! sessionkeeper - keep a book-discovery session alive from the terminal.
//!
//! Inspects, installs and clears the stored credential, and can run the full
//! session lifecycle (expiry watchdog plus activity-gated renewal) with every
//! line typed on stdin counting as user activity.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionkeeper_core::{Config, Credential, EndReason, SessionFacade, SessionState};

#[derive(Parser)]
#[command(name = "sessionkeeper", version, about = "Session token lifecycle manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show whether a valid session is stored
    Status,
    /// Store a credential issued by the login flow
    Login {
        /// Bearer token; prompted for when omitted
        #[arg(long)]
        token: Option<String>,
    },
    /// Clear the stored credential
    Logout,
    /// Keep the session alive; each line on stdin counts as activity
    Watch,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    let session = SessionFacade::from_config(&config)?;

    let result = match cli.command {
        Command::Status => {
            print_status(&session);
            Ok(())
        }
        Command::Login { token } => login(&session, token),
        Command::Logout => {
            session.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Watch => watch(&session).await,
    };

    session.shutdown().await;
    result
}

fn print_status(session: &SessionFacade) {
    match session.state() {
        SessionState::Authenticated(subject_id) => {
            let minutes = session
                .time_until_expiry()
                .map(|left| left.num_minutes().max(0))
                .unwrap_or(0);
            println!("Authenticated as {} ({} min left)", subject_id, minutes);
        }
        SessionState::Expired => println!("Session expired. Please login again."),
        SessionState::Unauthenticated => println!("Not logged in."),
    }
}

fn login(session: &SessionFacade, token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => rpassword::prompt_password("Token: ").context("Failed to read token")?,
    };
    session
        .install(Credential::new(token.trim()))
        .context("Credential not accepted")?;
    print_status(session);
    Ok(())
}

async fn watch(session: &SessionFacade) -> Result<()> {
    if !session.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }
    print_status(session);

    let ended = Arc::new(Notify::new());
    let on_end = Arc::clone(&ended);
    session.on_session_ended(move |reason| {
        match reason {
            EndReason::Expired => println!("Session expired. Please login again!"),
            EndReason::LoggedOut => println!("Logged out."),
        }
        on_end.notify_one();
    });

    let mut renewals = session.renewals();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ended.notified() => break,
            changed = renewals.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *renewals.borrow_and_update();
                println!("Session renewed ({} so far).", count);
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => session.record_activity(),
                Ok(None) => stdin_open = false,
                Err(e) => return Err(e).context("Failed to read stdin"),
            },
        }
    }
    Ok(())
}
