//! # `examly_exam`: Exam Backend Client
//!
//! Command-line access to the Examly backend for students and teachers. The
//! session token issued by `login` is kept in the data directory and reused by
//! every other subcommand until `logout`.
//!
//! ## Usage
//!
//! ```bash
//! examly_exam login --telegram-id 123456789
//! examly_exam exams
//! examly_exam start 4
//! examly_exam proctor --attempt 31 --exam 4
//! examly_exam finish 31
//!
//! # Teachers
//! examly_exam teacher-exams
//! examly_exam update-exam 4 '{"title": "Algebra II"}'
//! examly_exam assign 4 '{"group_id": 2}'
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use lib_examly::configs::{load_config, AppConfig, Settings};
use lib_examly::loggers;
use lib_examly::proctor::{
    now_iso, AttemptContext, BlurChange, KeyPress, Overlay, ProctorSession, Reaction, Tone,
};
use lib_examly::retrieve::{CheatLogEntry, Exam, ExamlyApi, HttpCheatLog};
use lib_examly::storage::{FileStore, SessionTokenSlot};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "examly_exam", about = "Examly exam backend client", version)]
struct Cli {
    #[command(flatten)]
    config: AppConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange a Telegram user id for a session token.
    Login {
        #[arg(long, env = "EXAMLY_TELEGRAM_ID")]
        telegram_id: Option<i64>,
    },
    /// Forget the stored session token.
    Logout,
    /// List exams assigned to the current student.
    Exams,
    /// Start an attempt for an exam and print its id.
    Start { exam_id: i64 },
    /// Finish an attempt.
    Finish { attempt_id: i64 },
    /// Submit a single cheat-log entry and report whether it was accepted.
    Log {
        event: String,
        #[arg(long)]
        attempt: i64,
        #[arg(long, default_value_t = 0)]
        exam: i64,
        /// JSON detail payload.
        #[arg(long)]
        detail: Option<String>,
    },
    /// Proctor an attempt, reading page events from stdin (one per line:
    /// hide, show, blur, focus, menu, copy, paste, select, key <combo>).
    Proctor {
        #[arg(long)]
        attempt: i64,
        #[arg(long, default_value_t = 0)]
        exam: i64,
        #[arg(long, env = "EXAMLY_TELEGRAM_ID")]
        telegram_id: Option<i64>,
    },
    /// List exams owned by the current teacher.
    TeacherExams,
    /// Patch an exam with a JSON object.
    UpdateExam { exam_id: i64, patch: String },
    /// Assign an exam using a JSON body.
    Assign { exam_id: i64, body: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = load_config(cli.config).resolve()?;
    loggers::setup_logging(&settings.log_dir, &settings.log_level, "examly_exam")?;

    let store = FileStore::new(&settings.data_dir)
        .with_context(|| format!("cannot open data dir {}", settings.data_dir.display()))?;
    let tokens = SessionTokenSlot::new(store);
    let api = ExamlyApi::connect(settings.api_base.as_str(), None)?;

    match cli.command {
        Command::Login { telegram_id } => {
            let session = api.login(telegram_id).await?;
            tokens.save(&session.token).context("failed to store session token")?;
            println!(
                "{} {} ({}) -> {}",
                "Logged in:".green().bold(),
                session.user.full_name,
                session.user.role,
                session.user.home_route()
            );
        }
        Command::Logout => {
            tokens.clear()?;
            println!("Session token removed.");
        }
        Command::Exams => {
            let api = api.authenticated(require_token(&tokens)?);
            print_exams(&api.student_exams().await?);
        }
        Command::Start { exam_id } => {
            let api = api.authenticated(require_token(&tokens)?);
            let attempt_id = api.start_exam(exam_id).await?;
            println!("{} {}", "Attempt started:".green().bold(), attempt_id);
        }
        Command::Finish { attempt_id } => {
            let api = api.authenticated(require_token(&tokens)?);
            let result = api.finish_attempt(attempt_id).await?;
            print_overlay(&Overlay::finished());
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Log {
            event,
            attempt,
            exam,
            detail,
        } => {
            let sink = HttpCheatLog::new(settings.api_base.as_str(), require_token(&tokens)?)?;
            let detail = detail.as_deref().map(parse_json).transpose()?;
            let entry = CheatLogEntry {
                event,
                attempt_id: attempt,
                exam_id: (exam != 0).then_some(exam),
                ts: now_iso(),
                detail,
            };
            if sink.deliver(&entry).await {
                println!("{}", "Accepted.".green());
            } else {
                println!("{}", "Not delivered (see log).".yellow());
            }
        }
        Command::Proctor {
            attempt,
            exam,
            telegram_id,
        } => {
            let token = require_token(&tokens)?;
            proctor(&settings, token, AttemptContext::new(attempt, exam).with_telegram_id(telegram_id))
                .await?;
        }
        Command::TeacherExams => {
            let api = api.authenticated(require_token(&tokens)?);
            print_exams(&api.teacher_exams().await?);
        }
        Command::UpdateExam { exam_id, patch } => {
            let api = api.authenticated(require_token(&tokens)?);
            let updated = api.update_exam(exam_id, &parse_json(&patch)?).await?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        Command::Assign { exam_id, body } => {
            let api = api.authenticated(require_token(&tokens)?);
            let assigned = api.assign_exam(exam_id, &parse_json(&body)?).await?;
            println!("{}", serde_json::to_string_pretty(&assigned)?);
        }
    }

    Ok(())
}

fn require_token(tokens: &SessionTokenSlot<FileStore>) -> Result<String> {
    tokens
        .load()?
        .ok_or_else(|| anyhow!("no session token; run `examly_exam login` first"))
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON: {}", raw))
}

async fn proctor(settings: &Settings, token: String, ctx: AttemptContext) -> Result<()> {
    let sink = Arc::new(HttpCheatLog::new(settings.api_base.as_str(), token)?);
    println!("{}", ctx.watermark(&now_iso()).truecolor(128, 128, 128));

    let mut session = ProctorSession::acquire(ctx, sink)
        .on_release(|| log::info!("Text selection restored."));
    session.spawn_drift_watch();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match dispatch(&mut session, line) {
                    Ok(reaction) => print_reaction(&reaction),
                    Err(e) => eprintln!("{}", e.to_string().red()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-C received, ending proctoring.");
                break;
            }
        }
    }

    session.release();
    Ok(())
}

fn dispatch(session: &mut ProctorSession, line: &str) -> Result<Reaction> {
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    Ok(match name {
        "hide" => session.on_visibility_change(true, Instant::now()),
        "show" => session.on_visibility_change(false, Instant::now()),
        "blur" => session.on_blur(),
        "focus" => session.on_focus(),
        "menu" => session.on_context_menu(),
        "copy" => session.on_copy(),
        "paste" => session.on_paste(),
        "select" => session.on_select_start(),
        "key" => session.on_key_down(&parse_combo(arg)?),
        other => bail!("unknown page event '{}'", other),
    })
}

/// Parses `ctrl+shift+i`-style combos; the last segment is the key.
fn parse_combo(combo: &str) -> Result<KeyPress> {
    let mut parts: Vec<&str> = combo.split('+').map(str::trim).collect();
    let key = parts.pop().filter(|k| !k.is_empty()).context("missing key")?;
    let mut press = KeyPress::new(key);
    for modifier in parts {
        press = match modifier.to_lowercase().as_str() {
            "ctrl" | "control" => press.ctrl(),
            "meta" | "cmd" => press.meta(),
            "shift" => press.shift(),
            other => bail!("unknown modifier '{}'", other),
        };
    }
    Ok(press)
}

fn print_reaction(reaction: &Reaction) {
    if reaction.suppress {
        println!("{}", "(default action suppressed)".dimmed());
    }
    match reaction.blur {
        Some(BlurChange::On) => println!("{}", "[blur on]".dimmed()),
        Some(BlurChange::Off) => println!("{}", "[blur off]".dimmed()),
        Some(BlurChange::Pulse(d)) => println!("{}", format!("[blur {} ms]", d.as_millis()).dimmed()),
        None => {}
    }
    if let Some(overlay) = &reaction.overlay {
        print_overlay(overlay);
    }
}

fn print_overlay(overlay: &Overlay) {
    let title = match overlay.tone {
        Tone::Warn => overlay.title.yellow().bold(),
        Tone::Danger => overlay.title.red().bold(),
        Tone::Ok => overlay.title.green().bold(),
    };
    println!("{} {}", title, overlay.description);
}

fn print_exams(exams: &[Exam]) {
    if exams.is_empty() {
        println!("No exams.");
        return;
    }
    for exam in exams {
        println!("{:>5}  {}", format!("#{}", exam.id).bold(), exam.title);
        if let Some(description) = &exam.description {
            println!("       {}", description.dimmed());
        }
        if let (Some(starts), Some(ends)) = (&exam.starts_at, &exam.ends_at) {
            println!("       {} .. {}", starts, ends);
        }
    }
}
