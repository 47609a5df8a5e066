//! Console Bot Example
//!
//! Drives the mqr dispatcher from stdin, one event per line:
//!
//! ```text
//! <kind> <conversation> <actor> <text...>
//!
//! group g1 alice hi
//! group g1 alice quiz
//! group g1 alice 42
//! join_request g1 bob the password is swordfish
//! join g1 bob invite
//! direct bot carol @mqr are you there?
//! ```
//!
//! Replies and join decisions are printed as they are published.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --config demos/console_bot/mqr.toml < demos/console_bot/session.txt
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mqr::prelude::*;
use mqr::runtime::ConfigLoader;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "console-bot", about = "Feed chat events to mqr from stdin")]
struct Args {
    /// Configuration file (mqr.toml / mqr.yaml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Id the bot answers mentions for.
    #[arg(long, default_value = "mqr")]
    bot_id: String,

    /// Let keyword and default hooks run after a held hook declines.
    #[arg(long)]
    held_fallthrough: bool,
}

// ============================================================================
// Hooks
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GreeterSettings {
    greeting: String,
}

impl Default for GreeterSettings {
    fn default() -> Self {
        Self {
            greeting: "Hello".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GateSettings {
    password: Option<String>,
}

/// Logs every message; never claims one.
fn logger() -> Hook {
    Hook::new("logger", |ctx: HookContext| async move {
        info!(
            kind = %ctx.kind(),
            conversation = ctx.conversation_id(),
            actor = ctx.actor_id(),
            text = ctx.text().unwrap_or_default(),
            "Message received"
        );
        HookResult::skip()
    })
    .on_messages()
    .listen_all(true)
}

fn greeter() -> Hook {
    Hook::new("greeter", |ctx: HookContext| async move {
        let settings: GreeterSettings = ctx.setting().map(|s| s.get()).unwrap_or_default();
        HookResult::reply(format!("{}, {}!", settings.greeting, ctx.actor_id()))
    })
    .on_messages()
    .equals("hi")
    .equals("hello")
    .starts_with("good morning")
    .priority(10)
}

/// Two-turn quiz: asks, then holds the sender until they answer.
async fn quiz(ctx: HookContext) -> HookResult {
    let Some(saved) = ctx.held_context() else {
        return HookResult::reply("Quiz time: what is 6 * 7?")
            .hold_with(json!({"answer": "42", "attempts": 1}));
    };

    let answer = saved["answer"].as_str().unwrap_or_default();
    let attempts = saved["attempts"].as_u64().unwrap_or(1);
    match ctx.text().map(str::trim) {
        Some(text) if text == answer => {
            HookResult::reply(format!("Correct, after {attempts} attempt(s)!"))
        }
        Some(text) if text.eq_ignore_ascii_case("give up") => {
            HookResult::reply(format!("The answer was {answer}."))
        }
        _ if attempts >= 3 => {
            HookResult::reply(format!("Out of attempts, the answer was {answer}."))
        }
        _ => HookResult::reply("Not quite, try again.")
            .hold_with(json!({"answer": answer, "attempts": attempts + 1})),
    }
}

/// Accepts join requests that quote the configured password.
async fn join_gate(ctx: HookContext) -> HookResult {
    let settings: GateSettings = ctx.setting().map(|s| s.get()).unwrap_or_default();
    let request = ctx.text().unwrap_or_default().to_lowercase();

    let decision = match settings.password {
        Some(password) if request.contains(&password.to_lowercase()) => JoinDecision::Accept,
        Some(_) => JoinDecision::Reject,
        None => JoinDecision::Ignore,
    };
    HookResult::decide(decision)
}

fn welcome() -> Hook {
    Hook::new("welcome", |ctx: HookContext| async move {
        let how = match ctx.payload() {
            Payload::MemberJoin(JoinKind::Invite) => "by invitation",
            Payload::MemberJoin(JoinKind::Active) => "on request",
            Payload::MemberJoin(JoinKind::Retrieve) => "again",
            _ => return HookResult::skip(),
        };
        HookResult::reply(format!("Welcome {}, you joined {how}.", ctx.actor_id()))
    })
    .on(EventKind::MemberJoin)
}

fn mention() -> Hook {
    Hook::new("mention", |ctx: HookContext| async move {
        if ctx.is_bot_mentioned() {
            HookResult::reply("You called?")
        } else {
            HookResult::skip()
        }
    })
    .on_messages()
    .priority(-10)
}

fn fallback() -> Hook {
    Hook::new("fallback", |_ctx: HookContext| async {
        HookResult::reply("Sorry, I don't understand. Try 'hi' or 'quiz'.")
    })
    .on(EventKind::DirectMessage)
    .priority(100)
}

fn hooks() -> Vec<Hook> {
    vec![
        logger(),
        greeter(),
        Hook::new("quiz", quiz).on_messages().equals("quiz"),
        Hook::new("join_gate", join_gate)
            .on(EventKind::MemberJoinRequest)
            .contains("password"),
        welcome(),
        mention(),
        fallback(),
    ]
}

// ============================================================================
// Console I/O
// ============================================================================

/// Splits off the first whitespace-delimited field.
fn split_field(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((field, rest)) => (field, rest.trim_start()),
        None => (s, ""),
    }
}

/// Parses `<kind> <conversation> <actor> <text...>` into an envelope.
fn parse_line(line: &str, bot_id: &str) -> Result<EventEnvelope> {
    let (kind, rest) = split_field(line);
    let (conversation, rest) = split_field(rest);
    let (actor, rest) = split_field(rest);
    let text = rest.trim_end();

    let kind: EventKind = kind.parse().map_err(anyhow::Error::msg)?;
    anyhow::ensure!(!conversation.is_empty(), "missing conversation id");
    anyhow::ensure!(!actor.is_empty(), "missing actor id");

    if kind == EventKind::MemberJoin {
        let join: JoinKind = text
            .parse()
            .map_err(anyhow::Error::msg)
            .context("member join needs invite, active or retrieve")?;
        return Ok(EventEnvelope::new(kind, actor, conversation, join));
    }

    let envelope = EventEnvelope::new(kind, actor, conversation, text);
    if !kind.is_message() {
        return Ok(envelope);
    }

    let mentions = text
        .split_whitespace()
        .filter_map(|word| word.strip_prefix('@'))
        .filter(|id| !id.is_empty())
        .map(|id| Mention::new(id, format!("@{id}")))
        .collect();
    Ok(envelope.with_mentions(bot_id, mentions))
}

fn print_report(report: &DispatchReport) {
    let who = format!(
        "{}@{}",
        report.envelope.actor_id(),
        report.envelope.conversation_id()
    );

    if let Some(decision) = report.join_decision() {
        println!("[{}] join request from {who}: {decision:?}", report.hook_name);
        return;
    }

    match &report.result.output {
        HookOutput::Text(text) => {
            println!("[{} via {}] -> {who}: {text}", report.hook_name, report.trigger)
        }
        HookOutput::Value(value) => {
            println!("[{} via {}] -> {who}: {value}", report.hook_name, report.trigger)
        }
        _ => println!("[{} via {}] handled {who}", report.hook_name, report.trigger),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_current_dir();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;
    if args.held_fallthrough {
        config.dispatch.held_fallthrough = true;
    }

    let mut runtime = BotRuntime::from_config(&config);
    runtime.register_all(hooks())?;

    let events = runtime.event_sender();
    let mut reports = runtime.subscribe();

    let bot_id = args.bot_id.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    match parse_line(line, &bot_id) {
                        Ok(envelope) => {
                            if events.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => eprintln!("Skipping line '{line}': {e:#}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });

    let printer = tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => print_report(&report),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Report printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    runtime.run().await?;

    reader.abort();
    printer.await?;
    Ok(())
}
