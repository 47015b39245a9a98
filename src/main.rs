mod auth;
mod bootstrap;
mod config;
mod error;
mod gmail;
mod labels;
mod listing;
mod models;
mod page;
mod session;
#[cfg(test)]
mod testing;
mod ui;
mod upload;

use crate::auth::{BrowserDelegate, LoginFlow, LoginOutcome};
use crate::bootstrap::Platform;
use crate::config::{Config, matches_key};
use crate::error::AppError;
use crate::models::{CandidateFile, EmailSummary, UploadStatus};
use futures::future::join_all;
use crate::page::Page;
use crate::session::{CredentialStore, MemoryStore, RingStore, Session};
use crate::ui::UIMode;
use crate::upload::{BatchOutcome, BatchUploader, candidate_from_path};
use anyhow::Context;
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEBUG_LOG_FILE: &str = "gmail_uploader_debug.log";

#[derive(Parser)]
#[command(name = "gmail-uploader", version, about = "Upload .eml samples into Gmail under a dedicated label")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file
    #[arg(long, global = true, value_name = "FILE", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Write debug logs to gmail_uploader_debug.log
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with Google and store the access token
    Login {
        /// Redirect URL (or fragment) carrying an access_token to store directly
        #[arg(long, value_name = "URL")]
        token_url: Option<String>,
    },
    /// Forget the stored access token
    Logout,
    /// Upload .eml files and label them
    Upload {
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
    /// List previously uploaded samples
    List,
}

/// Messages from background tasks to the UI loop.
enum AppEvent {
    AuthUrl(String),
    LoginFinished(Result<LoginOutcome, String>),
    UploadStatus {
        batch: usize,
        index: usize,
        status: UploadStatus,
    },
    BatchFinished {
        batch: usize,
        outcome: BatchOutcome,
    },
    Listing {
        generation: u64,
        result: Result<Vec<EmailSummary>, AppError>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.command.is_some())?;

    let config = Config::load(&cli.config);
    let store: Box<dyn CredentialStore> = if config.auth.persist_session {
        Box::new(RingStore)
    } else {
        Box::new(MemoryStore::default())
    };
    let session = Arc::new(Session::restore(store));

    match cli.command {
        Some(Commands::Logout) => {
            session.clear();
            println!("Token cleared. Run `gmail-uploader login` to sign in again.");
            Ok(())
        }
        Some(Commands::Login {
            token_url: Some(url),
        }) => cmd_login_from_redirect(&session, &url),
        Some(Commands::Login { token_url: None }) => {
            let platform = bootstrap::initialize(&config, BrowserDelegate::terminal()).await?;
            cmd_login(&platform, &session).await
        }
        Some(Commands::Upload { files }) => {
            let platform = bootstrap::initialize(&config, BrowserDelegate::terminal()).await?;
            cmd_upload(&platform, &session, &config, files).await
        }
        Some(Commands::List) => {
            let platform = bootstrap::initialize(&config, BrowserDelegate::terminal()).await?;
            cmd_list(&platform, &session, &config).await
        }
        None => run_tui(config, session).await,
    }
}

fn init_logging(debug: bool, cli_mode: bool) -> anyhow::Result<()> {
    if debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(DEBUG_LOG_FILE)
            .with_context(|| format!("Failed to open {}", DEBUG_LOG_FILE))?;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("gmail_uploader=debug,warn"))
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else if cli_mode {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .init();
    }
    Ok(())
}

fn cmd_login_from_redirect(session: &Session, url: &str) -> anyhow::Result<()> {
    let credential = auth::credential_from_redirect(url)
        .context("No access_token found in the URL fragment")?;
    session.set(credential)?;
    println!("Access token stored.");
    Ok(())
}

async fn cmd_login(platform: &Platform, session: &Session) -> anyhow::Result<()> {
    LoginFlow::new()
        .login(platform.token_client(), session)
        .await
        .context("Login failed")?;
    println!("Signed in.");
    Ok(())
}

async fn cmd_upload(
    platform: &Platform,
    session: &Session,
    config: &Config,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let files: Vec<CandidateFile> = join_all(files.iter().map(candidate_from_path)).await;

    let report = BatchUploader::new(platform, session, &config.mailbox.label_name)
        .upload(files, |_, status| {
            if !status.state.is_terminal() {
                return;
            }
            match status.error_message() {
                Some(msg) => println!("{}: {} ({})", status.file_name, status.state.label(), msg),
                None => println!("{}: {}", status.file_name, status.state.label()),
            }
        })
        .await;

    if report.statuses.is_empty() {
        println!("No .eml files to upload.");
    }

    match report.outcome {
        BatchOutcome::Completed => {
            println!("{} uploaded, {} failed", report.succeeded(), report.failed());
            Ok(())
        }
        BatchOutcome::CredentialRejected(reason) => {
            anyhow::bail!("{} Run `gmail-uploader login` first.", reason)
        }
    }
}

async fn cmd_list(platform: &Platform, session: &Session, config: &Config) -> anyhow::Result<()> {
    let emails = listing::list_uploaded(
        platform,
        session,
        &config.mailbox.label_name,
        config.mailbox.max_results,
    )
    .await
    .map_err(|e| match e {
        e if e.is_credential() => anyhow::anyhow!("{} Run `gmail-uploader login` first.", e),
        e => anyhow::anyhow!(e),
    })?;

    if emails.is_empty() {
        println!("No uploaded samples found.");
    }
    for email in emails {
        println!("{}\t{}\t{}\t{}", email.id, ui::format_date(&email.date), email.from, email.subject);
    }
    Ok(())
}

async fn run_tui(config: Config, session: Arc<Session>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AppEvent>();

    // Forward consent URLs from the OAuth delegate into the event stream.
    let (url_tx, mut url_rx) = mpsc::unbounded_channel::<String>();
    let url_events = tx.clone();
    tokio::spawn(async move {
        while let Some(url) = url_rx.recv().await {
            if url_events.send(AppEvent::AuthUrl(url)).is_err() {
                break;
            }
        }
    });

    let platform = Arc::new(
        bootstrap::initialize(&config, BrowserDelegate::tui(url_tx))
            .await
            .context("Initialization failed")?,
    );
    let login_flow = Arc::new(LoginFlow::new());
    let label_name = config.mailbox.label_name.clone();
    let max_results = config.mailbox.max_results;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut ui_state = ui::UIState::new(Page::restored(session.is_signed_in()), label_name.clone());

    let spawn_listing = |ui_state: &mut ui::UIState<'_>| {
        let generation = ui_state.begin_listing();
        let (platform, session, tx, label_name) =
            (platform.clone(), session.clone(), tx.clone(), label_name.clone());
        tokio::spawn(async move {
            let result =
                listing::list_uploaded(platform.as_ref(), &session, &label_name, max_results).await;
            let _ = tx.send(AppEvent::Listing { generation, result });
        });
    };

    if session.is_signed_in() {
        spawn_listing(&mut ui_state);
    }

    let mut next_batch = 0usize;

    loop {
        while let Ok(app_event) = rx.try_recv() {
            match app_event {
                AppEvent::AuthUrl(url) => ui_state.auth_url = Some(url),
                AppEvent::LoginFinished(result) => {
                    ui_state.auth_url = None;
                    match result {
                        Ok(LoginOutcome::Authenticated) => {
                            ui_state.page.login_succeeded();
                            ui_state
                                .page
                                .navigate(page::Route::Mailbox, session.is_signed_in());
                            spawn_listing(&mut ui_state);
                        }
                        Ok(LoginOutcome::AlreadyInFlight) => {}
                        Err(error) => ui_state.page.login_failed(error),
                    }
                }
                AppEvent::UploadStatus {
                    batch,
                    index,
                    status,
                } => ui_state.apply_upload_status(batch, index, status),
                AppEvent::BatchFinished { batch, outcome } => match outcome {
                    BatchOutcome::Completed => {
                        tracing::debug!("Batch {} finished", batch);
                        ui_state.status_message = Some("Upload finished".to_string());
                        spawn_listing(&mut ui_state);
                    }
                    BatchOutcome::CredentialRejected(reason) => {
                        ui_state.page.credential_invalidated(reason);
                    }
                },
                AppEvent::Listing { generation, result } => {
                    ui_state.apply_listing(generation, result);
                }
            }
        }

        terminal.draw(|f| ui::render(f, &mut ui_state))?;

        if !event::poll(std::time::Duration::from_millis(100))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };

        if let UIMode::EnteringPaths = ui_state.mode {
            if matches_key(key, &config.keybindings.cancel) {
                ui_state.mode = UIMode::Browsing;
                ui_state.reset_path_input();
            } else if matches_key(key, &config.keybindings.submit) {
                let paths = ui_state.entered_paths();
                ui_state.mode = UIMode::Browsing;
                ui_state.reset_path_input();

                let batch = next_batch;
                next_batch += 1;
                let (platform, session, tx, label_name) =
                    (platform.clone(), session.clone(), tx.clone(), label_name.clone());
                tokio::spawn(async move {
                    let files = join_all(paths.iter().map(candidate_from_path)).await;
                    let status_tx = tx.clone();
                    let report = BatchUploader::new(platform.as_ref(), &session, &label_name)
                        .upload(files, move |index, status| {
                            let _ = status_tx.send(AppEvent::UploadStatus {
                                batch,
                                index,
                                status: status.clone(),
                            });
                        })
                        .await;
                    let _ = tx.send(AppEvent::BatchFinished {
                        batch,
                        outcome: report.outcome,
                    });
                });
            } else {
                ui_state.path_input.input(key);
            }
            continue;
        }

        if matches_key(key, &config.keybindings.quit) {
            break;
        }

        match ui_state.page.route() {
            page::Route::Login => {
                if matches_key(key, &config.keybindings.login)
                    && !login_flow.is_in_flight()
                    && ui_state.page.begin_login()
                {
                    let (platform, session, login_flow, tx) = (
                        platform.clone(),
                        session.clone(),
                        login_flow.clone(),
                        tx.clone(),
                    );
                    tokio::spawn(async move {
                        let result = login_flow
                            .login(platform.token_client(), &session)
                            .await
                            .map_err(|e| e.to_string());
                        let _ = tx.send(AppEvent::LoginFinished(result));
                    });
                }
            }
            page::Route::Mailbox => {
                if matches_key(key, &config.keybindings.upload) {
                    ui_state.page.clear_error();
                    ui_state.mode = UIMode::EnteringPaths;
                } else if matches_key(key, &config.keybindings.refresh) {
                    ui_state.page.clear_error();
                    if ui_state.page.navigate(page::Route::Mailbox, session.is_signed_in())
                        == page::Route::Mailbox
                    {
                        spawn_listing(&mut ui_state);
                    } else {
                        ui_state.page.credential_invalidated(AppError::MissingCredential.to_string());
                    }
                } else if matches_key(key, &config.keybindings.logout) {
                    session.clear();
                    ui_state.page.logout();
                    ui_state.cancel_listing();
                } else if matches_key(key, &config.keybindings.move_down) {
                    if ui_state.selected_email_index < ui_state.emails.len().saturating_sub(1) {
                        ui_state.selected_email_index += 1;
                    }
                } else if matches_key(key, &config.keybindings.move_up) {
                    ui_state.selected_email_index = ui_state.selected_email_index.saturating_sub(1);
                } else if key.code == KeyCode::Esc {
                    ui_state.status_message = None;
                }
            }
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::event::DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}
