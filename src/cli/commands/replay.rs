//! `replay` command: drive an engine from a JSONL script.
//!
//! Each line is one JSON object. Signal lines use the inbound wire form
//! (`kind` = `lifecycle`, `canonical_sample`, `conversation_resolved` or
//! `disposed`). Two extra kinds steer the run:
//!
//! - `{"kind":"wait","ms":N}` sleeps before the next line
//! - `{"kind":"fetch_response","conversation_id":..,"snapshot":..}` queues the
//!   next authoritative fetch result; `"error":".."` queues a failure instead
//!
//! Blank lines and lines starting with `#` are ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::adapters::memory::{InMemoryLeaseStore, ScriptedResponse, ScriptedSnapshotFetcher};
use crate::adapters::sqlite::{initialize_from_config, SqliteLeaseStore};
use crate::cli::display::{colorize_mode, list_table, render_list};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{
    CaptureMeta, Config, ConversationId, InboundSignal, LeaseBackend, ReadinessDecision,
};
use crate::domain::ports::LeaseStore;
use crate::services::{CaptureEngine, DiagnosticEvent};

const DIAGNOSTIC_BUFFER: usize = 4096;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSONL script of signals, waits and fetch responses
    pub script: PathBuf,

    /// Keep running this long after the last line before reporting
    #[arg(long, default_value = "0")]
    pub settle_ms: u64,

    /// Include diagnostic events in the report
    #[arg(long)]
    pub diagnostics: bool,
}

/// One parsed script line.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Signal(InboundSignal),
    Wait(Duration),
    FetchResponse {
        conversation_id: ConversationId,
        response: ScriptedResponse,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ControlLine {
    Wait {
        ms: u64,
    },
    FetchResponse {
        conversation_id: String,
        #[serde(default)]
        snapshot: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Parse one script line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<ScriptStep>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed).context("line is not valid JSON")?;
    let kind = value.get("kind").and_then(serde_json::Value::as_str).unwrap_or_default();
    if !matches!(kind, "wait" | "fetch_response") {
        let signal = serde_json::from_value(value).context("unrecognized signal")?;
        return Ok(Some(ScriptStep::Signal(signal)));
    }

    let step = match serde_json::from_value(value)? {
        ControlLine::Wait { ms } => ScriptStep::Wait(Duration::from_millis(ms)),
        ControlLine::FetchResponse {
            conversation_id,
            snapshot,
            error,
        } => {
            let response = match (snapshot, error) {
                (_, Some(reason)) => ScriptedResponse::Failure(reason),
                (Some(snapshot), None) => ScriptedResponse::Snapshot(snapshot.into()),
                (None, None) => anyhow::bail!("fetch_response needs a snapshot or an error"),
            };
            ScriptStep::FetchResponse {
                conversation_id: ConversationId::new(conversation_id),
                response,
            }
        }
    };
    Ok(Some(step))
}

/// Parse a whole script, skipping (and reporting) unparseable lines.
pub fn parse_script(text: &str) -> (Vec<ScriptStep>, Vec<String>) {
    let mut steps = Vec::new();
    let mut rejected = Vec::new();
    for (index, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(step)) => steps.push(step),
            Ok(None) => {}
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping script line");
                rejected.push(format!("line {}: {e:#}", index + 1));
            }
        }
    }
    (steps, rejected)
}

#[derive(Debug, Serialize)]
pub struct ConversationReport {
    pub conversation_id: ConversationId,
    pub decision: ReadinessDecision,
    pub capture: CaptureMeta,
}

#[derive(Debug, Serialize)]
pub struct ReplayOutput {
    pub script: String,
    pub signals_submitted: usize,
    pub rejected_lines: Vec<String>,
    pub conversations: Vec<ConversationReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<DiagnosticEvent>,
}

impl CommandOutput for ReplayOutput {
    fn to_human(&self) -> String {
        let mut table =
            list_table(&["conversation", "mode", "reason", "blocking", "fidelity", "length"]);
        for report in &self.conversations {
            let blocking: Vec<&str> = report
                .decision
                .blocking_conditions
                .iter()
                .map(|c| c.as_str())
                .collect();
            table.add_row(vec![
                truncate(report.conversation_id.as_str(), 24),
                colorize_mode(report.decision.mode).to_string(),
                report.decision.reason.as_str().to_string(),
                if blocking.is_empty() { "-".to_string() } else { blocking.join(",") },
                report.capture.fidelity.map_or("-", |f| f.as_str()).to_string(),
                report.capture.latest_length.to_string(),
            ]);
        }

        let mut lines = vec![
            format!("Replayed {} signal(s) from {}", self.signals_submitted, self.script),
            render_list("conversation", &table, self.conversations.len()),
        ];
        for rejected in &self.rejected_lines {
            lines.push(format!("skipped {rejected}"));
        }
        if !self.diagnostics.is_empty() {
            lines.push(String::new());
            let mut diag = list_table(&["kind", "attempt", "detail"]);
            for event in &self.diagnostics {
                diag.add_row(vec![
                    event.kind.as_str().to_string(),
                    event.attempt_id.as_ref().map_or("-", |a| a.as_str()).to_string(),
                    truncate(&event.detail, 60),
                ]);
            }
            lines.push(render_list("diagnostic", &diag, self.diagnostics.len()));
        }
        lines.join("\n")
    }
}

async fn lease_store(config: &Config) -> Result<Arc<dyn LeaseStore>> {
    Ok(match config.lease.backend {
        LeaseBackend::Memory => Arc::new(InMemoryLeaseStore::new()),
        LeaseBackend::Sqlite => {
            let pool = initialize_from_config(&config.database)
                .await
                .context("Failed to open lease database")?;
            Arc::new(SqliteLeaseStore::new(pool))
        }
    })
}

/// Run `steps` through a fresh engine and report every conversation seen.
pub async fn run_steps(
    config: Config,
    lease_store: Arc<dyn LeaseStore>,
    steps: Vec<ScriptStep>,
    settle: Duration,
) -> Result<(Vec<ConversationReport>, Vec<DiagnosticEvent>, usize)> {
    let fetcher = ScriptedSnapshotFetcher::new();
    let (diag_tx, mut diag_rx) = mpsc::channel(DIAGNOSTIC_BUFFER);
    let (engine, task) = CaptureEngine::new(config, lease_store, Arc::new(fetcher.clone()))
        .with_diagnostics(diag_tx)
        .spawn();

    let mut submitted = 0;
    for step in steps {
        match step {
            ScriptStep::Signal(signal) => {
                engine.submit_inbound(signal).await?;
                submitted += 1;
            }
            ScriptStep::Wait(duration) => tokio::time::sleep(duration).await,
            ScriptStep::FetchResponse {
                conversation_id,
                response,
            } => fetcher.push(&conversation_id, response).await,
        }
    }
    tokio::time::sleep(settle).await;

    let mut reports = Vec::new();
    for conversation_id in engine.conversations().await? {
        reports.push(ConversationReport {
            decision: engine.resolve_readiness_decision(&conversation_id).await?,
            capture: engine.capture_meta(&conversation_id).await?,
            conversation_id,
        });
    }

    engine.shutdown().await?;
    drop(engine);
    task.await.context("Engine task failed")?;

    let mut diagnostics = Vec::new();
    while let Ok(event) = diag_rx.try_recv() {
        diagnostics.push(event);
    }
    Ok((reports, diagnostics, submitted))
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))
}

pub async fn execute(args: ReplayArgs, config: Config, json_mode: bool) -> Result<()> {
    let text = read_script(&args.script)?;
    let (steps, rejected_lines) = parse_script(&text);
    let store = lease_store(&config).await?;

    let (conversations, diagnostics, signals_submitted) =
        run_steps(config, store, steps, Duration::from_millis(args.settle_ms)).await?;

    let result = ReplayOutput {
        script: args.script.display().to_string(),
        signals_submitted,
        rejected_lines,
        conversations,
        diagnostics: if args.diagnostics { diagnostics } else { Vec::new() },
    };
    output(&result, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ReadinessMode, ReadinessReason};

    #[test]
    fn test_parse_control_lines() {
        assert!(matches!(
            parse_line(r#"{"kind":"wait","ms":250}"#).unwrap(),
            Some(ScriptStep::Wait(d)) if d == Duration::from_millis(250)
        ));
        assert!(matches!(
            parse_line(r#"{"kind":"fetch_response","conversation_id":"c1","error":"HTTP 500"}"#)
                .unwrap(),
            Some(ScriptStep::FetchResponse { response: ScriptedResponse::Failure(_), .. })
        ));
        assert!(parse_line(r#"{"kind":"fetch_response","conversation_id":"c1"}"#).is_err());
        assert!(parse_line("# comment").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_parse_script_reports_bad_lines() {
        let script = concat!(
            "{\"kind\":\"disposed\",\"attempt_id\":\"a1\"}\n",
            "not json\n",
            "{\"kind\":\"heartbeat\"}\n",
        );
        let (steps, rejected) = parse_script(script);
        assert_eq!(steps.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert!(rejected[0].starts_with("line 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_reaches_canonical_ready() {
        let script = r#"
{"kind":"lifecycle","attempt_id":"a1","phase":"prompt-sent","conversation_id":"c1","platform":"chatgpt"}
{"kind":"fetch_response","conversation_id":"c1","snapshot":{"messages":[{"role":"assistant","content":"done","status":"finished"}]}}
{"kind":"lifecycle","attempt_id":"a1","phase":"completed","platform":"chatgpt"}
{"kind":"wait","ms":5000}
"#;
        let (steps, rejected) = parse_script(script);
        assert!(rejected.is_empty());

        let (reports, _, submitted) = run_steps(
            Config::default(),
            Arc::new(InMemoryLeaseStore::new()),
            steps,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(submitted, 2);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].decision.mode, ReadinessMode::CanonicalReady);
        assert_eq!(reports[0].decision.reason, ReadinessReason::CanonicalAccepted);
        assert_eq!(reports[0].capture.latest_length, 4);
    }
}
