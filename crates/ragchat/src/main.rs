//! A terminal chat client built on `ragchat`.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::str::FromStr;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use ragchat::core::{Policy, PolicyBuilder, Reply, SubmitError};
use ragchat::{Session, SessionBuilder, StaticTokenProvider};
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum SessionEvent {
    Reply(Reply),
    RateLimited(u64),
    Retrying(u32, u64),
    CooldownTick(u64),
    Error(String),
    Idle,
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(endpoint_url) = env::var("RAGCHAT_ENDPOINT") else {
        eprintln!("RAGCHAT_ENDPOINT environment variable is not set");
        return;
    };

    let policy = match policy_from_env() {
        Ok(policy) => policy,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = SessionBuilder::with_endpoint_url(endpoint_url)
        .with_policy(policy)
        .on_reply({
            let event_tx = event_tx.clone();
            move |reply| {
                event_tx.send(SessionEvent::Reply(reply.clone())).ok();
            }
        })
        .on_rate_limited({
            let event_tx = event_tx.clone();
            move |seconds| {
                event_tx.send(SessionEvent::RateLimited(seconds)).ok();
            }
        })
        .on_retrying({
            let event_tx = event_tx.clone();
            move |attempt, seconds| {
                event_tx.send(SessionEvent::Retrying(attempt, seconds)).ok();
            }
        })
        .on_cooldown_tick({
            let event_tx = event_tx.clone();
            move |remaining| {
                event_tx.send(SessionEvent::CooldownTick(remaining)).ok();
            }
        })
        .on_error({
            let event_tx = event_tx.clone();
            move |message| {
                event_tx.send(SessionEvent::Error(message.to_owned())).ok();
            }
        })
        .on_idle({
            let event_tx = event_tx.clone();
            move || {
                event_tx.send(SessionEvent::Idle).ok();
            }
        });
    if let Ok(path) = env::var("RAGCHAT_THREADS_FILE") {
        builder = builder.with_threads_file(path);
    }
    if let Ok(token) = env::var("RAGCHAT_CHALLENGE_TOKEN") {
        builder = builder.with_token_provider(StaticTokenProvider::new(token));
    }
    let mut session = builder.build();

    println!(
        "{}",
        "Type a message, or /new, /threads, /cancel, /resume, /status."
            .dimmed()
    );

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();

        let submitted = match line {
            "" => continue,
            "/new" => {
                match session.new_thread() {
                    Ok(thread_id) => println!("Started {thread_id}"),
                    Err(err) => error!("{err}"),
                }
                continue;
            }
            "/threads" => {
                print_threads(&session);
                continue;
            }
            "/cancel" => {
                if let Err(err) = session.cancel() {
                    error!("{err}");
                }
                continue;
            }
            "/status" => {
                print_status(&session).await;
                continue;
            }
            "/resume" => session.resume().await,
            message => session.send_message(message).await,
        };

        match submitted {
            Ok(turn_id) => debug!("submitted {turn_id}"),
            Err(SubmitError::Closed) => break,
            Err(err) => {
                println!("{}", err.to_string().bright_yellow());
                continue;
            }
        }

        if !wait_until_idle(&session, &mut event_rx).await {
            break;
        }
        let parked = match session.status().await {
            Ok(status) => status.parked.is_some(),
            Err(_) => break,
        };
        if parked {
            println!("{}", "Type /resume to send it again.".dimmed());
        }
    }
}

/// Shows progress until the session accepts messages again. Returns
/// `false` if the session is gone.
async fn wait_until_idle(
    session: &Session,
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> bool {
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let mut progress_bar: Option<ProgressBar> = None;
    let mut countdown: Option<String> = None;

    loop {
        // Create a new progress bar if it has been finished.
        let bar = progress_bar.get_or_insert_with(|| {
            let progress_bar = ProgressBar::new_spinner();
            progress_bar.set_style(progress_style.clone());
            progress_bar.set_message("🔎 Searching...");
            progress_bar
        });
        bar.inc(1);

        let sleep = sleep(Duration::from_millis(100));
        let event = select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    return false;
                };
                event
            },
            _ = tokio::signal::ctrl_c() => {
                if session.cancel().is_err() {
                    return false;
                }
                continue;
            }
            _ = sleep => {
                continue;
            }
        };

        match event {
            SessionEvent::RateLimited(seconds) => {
                let label = "Too many requests".to_owned();
                bar.set_message(format!("⏳ {label}, retrying in {seconds}s"));
                countdown = Some(label);
            }
            SessionEvent::Retrying(attempt, seconds) => {
                let label = format!("Connection problem (retry {attempt})");
                bar.set_message(format!("⏳ {label}, retrying in {seconds}s"));
                countdown = Some(label);
            }
            SessionEvent::CooldownTick(remaining) => {
                if let Some(label) = &countdown {
                    bar.set_message(format!(
                        "⏳ {label}, retrying in {remaining}s"
                    ));
                }
                if remaining == 0 {
                    countdown = None;
                    bar.set_message("🔎 Searching...");
                }
            }
            event => {
                // Finish the progress bar before printing anything else.
                bar.finish_and_clear();
                progress_bar = None;

                match event {
                    SessionEvent::Reply(reply) => print_reply(&reply),
                    SessionEvent::Error(message) => {
                        println!(
                            "{}⚠️  {}",
                            BAR_CHAR.bright_red(),
                            message.bright_red()
                        );
                    }
                    SessionEvent::Idle => return true,
                    _ => {}
                }
            }
        }
    }
}

fn print_reply(reply: &Reply) {
    let bar = BAR_CHAR.bright_cyan();
    println!("{bar}🤖 {}", reply.content.bright_white());
    if reply.sources.is_empty() {
        return;
    }
    println!("{bar}{}", "Sources:".dimmed());
    for source in &reply.sources {
        println!("{bar}  • {}", source.dimmed());
    }
}

fn print_threads(session: &Session) {
    for thread in session.threads() {
        let marker = if thread.id() == session.active_thread() {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {} {} ({} messages)",
            thread.id().dimmed(),
            thread.title(),
            thread.entries().len()
        );
    }
}

async fn print_status(session: &Session) {
    let status = match session.status().await {
        Ok(status) => status,
        Err(err) => {
            error!("{err}");
            return;
        }
    };
    println!("thread:   {}", session.active_thread());
    match &status.turn {
        Some(turn) => println!(
            "turn:     {} {:?} (retries: {})",
            turn.id, turn.status, turn.attempt
        ),
        None => println!("turn:     none"),
    }
    if let Some(cooldown) = &status.cooldown {
        println!(
            "cooldown: {:?}, {}s left",
            cooldown.reason, cooldown.remaining_seconds
        );
    }
    if let Some(parked) = status.parked {
        println!("parked:   {parked}");
    }
}

fn policy_from_env() -> Result<Policy, String> {
    let mut policy = PolicyBuilder::new();
    if let Some(auto_resume) = env_var("RAGCHAT_AUTO_RESUME")? {
        policy = policy.with_auto_resume(auto_resume);
    }
    if let Some(max_retries) = env_var("RAGCHAT_MAX_RETRIES")? {
        policy = policy.with_max_retries(max_retries);
    }
    if let Some(limit) = env_var("RAGCHAT_HISTORY_LIMIT")? {
        policy = policy.with_history_limit(limit);
    }
    Ok(policy.build())
}

/// Reads an optional setting from the environment.
fn env_var<T: FromStr>(name: &str) -> Result<Option<T>, String> {
    let Ok(value) = env::var(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| format!("{name} has an invalid value: {value}"))
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
