use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use leadwise_agent::runtime::{ConversationRuntime, InboundMessage, MessageOutcome};
use leadwise_agent::transport::{RecordingMessageSender, StaticConnectionLookup};
use leadwise_core::config::{AppConfig, LoadOptions};
use leadwise_core::{ClientProfile, ConnectionEvent, LeadStep};
use leadwise_db::repositories::Repositories;
use leadwise_db::{connect_from_config, migrations};
use serde::Serialize;

use crate::commands::{to_json_line, CommandResult};

const SMOKE_CONNECTION: &str = "smoke-connection";
const SMOKE_OPERATOR_CHAT: i64 = 1;
const SMOKE_CLIENT_CHAT: i64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("conversation_roundtrip"));
            return finalize_report(checks, elapsed(started));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("conversation_roundtrip"));
            return finalize_report(checks, elapsed(started));
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_from_config(&config.database)) {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed(db_started),
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed(db_started),
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("conversation_roundtrip"));
            return finalize_report(checks, elapsed(started));
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(migrations::run_pending(&pool));
    runtime.block_on(pool.close());
    checks.push(match migration_result {
        Ok(()) => SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: elapsed(migration_started),
            message: "migrations are visible and executable".to_string(),
        },
        Err(error) => SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Fail,
            elapsed_ms: elapsed(migration_started),
            message: format!("migration execution failed: {error}"),
        },
    });

    let conversation_started = Instant::now();
    let conversation = runtime.block_on(conversation_roundtrip(&config));
    checks.push(SmokeCheck {
        name: "conversation_roundtrip",
        status: if conversation.is_ok() { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: elapsed(conversation_started),
        message: conversation.unwrap_or_else(|message| message),
    });

    finalize_report(checks, elapsed(started))
}

/// Greets, then answers the need question, against in-memory storage and a recording sender.
///
/// The model provider is left out so the check never leaves the process.
async fn conversation_roundtrip(config: &AppConfig) -> Result<String, String> {
    let sender = Arc::new(RecordingMessageSender::default());
    let lookup = Arc::new(StaticConnectionLookup::new([ConnectionEvent {
        connection_id: SMOKE_CONNECTION.to_string(),
        owner_user_id: None,
        owner_chat_id: Some(SMOKE_OPERATOR_CHAT),
        can_reply: true,
    }]));
    let runtime =
        ConversationRuntime::new(Repositories::in_memory(), sender.clone(), lookup, None, config);

    let message = |text: &str| InboundMessage {
        connection_id: SMOKE_CONNECTION.to_string(),
        client_chat_id: SMOKE_CLIENT_CHAT,
        text: Some(text.to_string()),
        profile: ClientProfile::default(),
        received_at: Utc::now(),
    };

    let greeted = runtime.handle_message(message("Привет")).await;
    if greeted != MessageOutcome::Greeted {
        return Err(format!("greeting produced {greeted:?}"));
    }
    let advanced = runtime.handle_message(message("бот")).await;
    if advanced != (MessageOutcome::Advanced { to: LeadStep::Budget }) {
        return Err(format!("need answer produced {advanced:?}"));
    }

    let replies = sender.to_clients().len();
    let notices = sender.to_operator().len();
    if replies != 2 || notices != 1 {
        return Err(format!("expected 2 replies and 1 operator notice, saw {replies} and {notices}"));
    }
    Ok("greeting and guided step handled in memory".to_string())
}

fn elapsed(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed(started), value)),
        Err(error) => Err((elapsed(started), error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = to_json_line("smoke", &report);
    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
