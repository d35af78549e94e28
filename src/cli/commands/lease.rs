//! `lease` commands against the SQLite lease store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::adapters::sqlite::{initialize_from_config, SqliteLeaseStore};
use crate::cli::output::{action_failure, action_success, output, CommandOutput};
use crate::domain::models::{AttemptId, ClaimOutcome, Config, ConversationId, ProbeLease};
use crate::domain::ports::LeaseStore;

#[derive(Args, Debug)]
pub struct LeaseArgs {
    #[command(subcommand)]
    pub command: LeaseCommands,
}

#[derive(Subcommand, Debug)]
pub enum LeaseCommands {
    /// Claim the probe lease for a conversation
    Claim {
        conversation_id: String,
        /// Attempt that will own the lease; a fresh id is minted when omitted
        attempt_id: Option<String>,
        /// Lease time-to-live; defaults to lease.ttl_ms
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    /// Release a lease held by an attempt
    Release {
        conversation_id: String,
        attempt_id: String,
    },
    /// Show the live lease for a conversation
    Show { conversation_id: String },
    /// Delete every expired lease
    Purge,
}

#[derive(Debug, Serialize)]
pub struct ClaimOutput {
    pub conversation_id: String,
    pub attempt_id: String,
    #[serde(flatten)]
    pub outcome: ClaimOutcome,
}

impl CommandOutput for ClaimOutput {
    fn to_human(&self) -> String {
        let expires = self
            .outcome
            .expires_at
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        if self.outcome.acquired {
            action_success(&format!(
                "{} holds the lease on {} until {expires}",
                self.attempt_id, self.conversation_id
            ))
        } else {
            action_failure(&format!(
                "Lease on {} is held by {} until {expires}",
                self.conversation_id,
                self.outcome
                    .owner_attempt_id
                    .as_ref()
                    .map_or("an unknown owner", AttemptId::as_str)
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReleaseOutput {
    pub conversation_id: String,
    pub attempt_id: String,
    pub released: bool,
}

impl CommandOutput for ReleaseOutput {
    fn to_human(&self) -> String {
        if self.released {
            action_success(&format!("Released lease on {}", self.conversation_id))
        } else {
            action_failure(&format!(
                "{} does not hold the lease on {}",
                self.attempt_id, self.conversation_id
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeaseShowOutput {
    pub conversation_id: String,
    pub lease: Option<ProbeLease>,
    pub checked_at: DateTime<Utc>,
}

impl CommandOutput for LeaseShowOutput {
    fn to_human(&self) -> String {
        match &self.lease {
            Some(lease) => format!(
                "Conversation: {}\nOwner:        {}\nExpires:      {} ({} ms left)",
                self.conversation_id,
                lease.owner_attempt_id,
                lease.expires_at.to_rfc3339(),
                (lease.expires_at - self.checked_at).num_milliseconds().max(0)
            ),
            None => format!("No live lease on {}", self.conversation_id),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PurgeOutput {
    pub removed: u64,
}

impl CommandOutput for PurgeOutput {
    fn to_human(&self) -> String {
        action_success(&format!("Removed {} expired lease(s)", self.removed))
    }
}

async fn open_store(config: &Config) -> Result<SqliteLeaseStore> {
    let pool = initialize_from_config(&config.database)
        .await
        .with_context(|| format!("Failed to open lease database {}", config.database.path))?;
    Ok(SqliteLeaseStore::new(pool))
}

pub async fn execute(args: LeaseArgs, config: Config, json_mode: bool) -> Result<()> {
    let store = open_store(&config).await?;
    let now = Utc::now();

    match args.command {
        LeaseCommands::Claim {
            conversation_id,
            attempt_id,
            ttl_ms,
        } => {
            let ttl_ms = ttl_ms.unwrap_or(config.lease.ttl_ms);
            let ttl = chrono::Duration::milliseconds(
                i64::try_from(ttl_ms).context("ttl_ms is too large")?,
            );
            let owner = attempt_id.map_or_else(AttemptId::generate, AttemptId::new);
            let outcome = store
                .claim(&ConversationId::new(conversation_id.as_str()), &owner, ttl, now)
                .await?;
            output(
                &ClaimOutput {
                    conversation_id,
                    attempt_id: owner.to_string(),
                    outcome,
                },
                json_mode,
            );
        }
        LeaseCommands::Release {
            conversation_id,
            attempt_id,
        } => {
            let released = store
                .release(
                    &ConversationId::new(conversation_id.as_str()),
                    &AttemptId::new(attempt_id.as_str()),
                )
                .await?;
            output(
                &ReleaseOutput {
                    conversation_id,
                    attempt_id,
                    released,
                },
                json_mode,
            );
        }
        LeaseCommands::Show { conversation_id } => {
            let lease = store
                .current(&ConversationId::new(conversation_id.as_str()), now)
                .await?;
            output(
                &LeaseShowOutput {
                    conversation_id,
                    lease,
                    checked_at: now,
                },
                json_mode,
            );
        }
        LeaseCommands::Purge => {
            let removed = store.purge_expired(now).await?;
            output(&PurgeOutput { removed }, json_mode);
        }
    }
    Ok(())
}
