//! Subcommands and their execution

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use reliefwatch_sync::models::{
    ConflictFilter, ConflictRecord, ConflictSeverity, ConflictStatus, ConflictType, EntityKind,
    MutationPayload, ResolutionStrategy,
};
use reliefwatch_sync::{Session, StaticSessionProvider, SyncEngine};
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue, conflict and optimistic update counters
    Status,

    /// List queued mutations in drain order
    Queue {
        /// Re-score against the current rules before listing
        #[arg(long)]
        rescore: bool,
    },

    /// Drain the queue once against the sync server
    Sync,

    /// Apply the retention policy
    Cleanup,

    #[command(subcommand)]
    Conflicts(ConflictCommand),

    /// Re-check the audit hash chain of one conflict, or all of them
    VerifyAudit {
        id: Option<Uuid>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConflictCommand {
    /// List conflicts, pending only unless `--all`
    List(ListArgs),

    /// Show one conflict with its diffs and audit trail
    Show { id: Uuid },

    /// Resolve a pending conflict
    Resolve(ResolveArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    all: bool,

    #[arg(long, value_parser = EntityKind::from_str)]
    entity_type: Option<EntityKind>,

    #[arg(long, value_parser = ConflictSeverity::from_str)]
    severity: Option<ConflictSeverity>,

    #[arg(long = "type", value_parser = ConflictType::from_str)]
    conflict_type: Option<ConflictType>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    id: Uuid,

    /// ACCEPT_LOCAL, ACCEPT_REMOTE, KEEP_BOTH or CUSTOM_MERGE
    #[arg(long, value_parser = ResolutionStrategy::from_str)]
    strategy: ResolutionStrategy,

    #[arg(long)]
    justification: Option<String>,

    /// Merged payload as JSON (`{"kind": ..., "data": ...}`), for CUSTOM_MERGE
    #[arg(long)]
    merged: Option<String>,
}

/// Run one command and render its result as pretty JSON
pub async fn execute(
    engine: &SyncEngine,
    user: &str,
    token: Option<String>,
    command: Command,
) -> anyhow::Result<String> {
    match command {
        Command::Status => render(&engine.stats().await?),
        Command::Queue { rescore } => {
            let items = if rescore {
                engine.recalculate_queue_priorities().await?
            } else {
                engine.database().pending_queue_items().await?
            };
            let rows: Vec<_> = items
                .iter()
                .map(|item| {
                    json!({
                        "id": item.id,
                        "type": item.kind,
                        "action": item.action,
                        "entityId": item.entity_id,
                        "priority": item.priority,
                        "score": item.priority_score,
                        "reason": item.priority_reason,
                        "retryCount": item.retry_count,
                        "lastError": item.last_error,
                    })
                })
                .collect();
            render(&rows)
        }
        Command::Sync => {
            let Some(token) = token else {
                bail!("sync needs a session token (--token or RELIEFWATCH_SESSION_TOKEN)");
            };
            engine
                .start_session(&StaticSessionProvider::new(Session::new(user, token)))
                .await?;
            let report = engine.process_queue().await;
            engine.end_session();
            render(&report?)
        }
        Command::Cleanup => {
            let report = engine.cleanup().await?;
            render(&json!({ "removed": report.total(), "detail": report }))
        }
        Command::Conflicts(ConflictCommand::List(args)) => {
            let conflicts = list_conflicts(engine, &args).await?;
            let rows: Vec<_> = conflicts.iter().map(summary).collect();
            render(&rows)
        }
        Command::Conflicts(ConflictCommand::Show { id }) => {
            let conflict = engine
                .database()
                .get_conflict(id)
                .await?
                .with_context(|| format!("no conflict {id}"))?;
            render(&conflict)
        }
        Command::Conflicts(ConflictCommand::Resolve(args)) => {
            let merged = args
                .merged
                .as_deref()
                .map(serde_json::from_str::<MutationPayload>)
                .transpose()
                .context("--merged is not a valid payload")?;
            let resolved = engine
                .resolve_conflict(
                    args.id,
                    args.strategy,
                    user,
                    args.justification.as_deref(),
                    merged,
                )
                .await?;
            render(&summary(&resolved))
        }
        Command::VerifyAudit { id } => {
            let ids = match id {
                Some(id) => vec![id],
                None => engine
                    .database()
                    .list_conflicts(None)
                    .await?
                    .iter()
                    .map(|c| c.id)
                    .collect(),
            };
            let mut results = Vec::with_capacity(ids.len());
            for id in ids {
                results.push(engine.database().verify_audit_trail(id).await?);
            }
            let broken = results.iter().filter(|v| !v.valid).count();
            let output = render(&results)?;
            if broken > 0 {
                bail!("{broken} audit trail(s) failed verification\n{output}");
            }
            Ok(output)
        }
    }
}

async fn list_conflicts(engine: &SyncEngine, args: &ListArgs) -> anyhow::Result<Vec<ConflictRecord>> {
    let filter = ConflictFilter {
        entity_type: args.entity_type,
        severity: args.severity,
        conflict_type: args.conflict_type,
    };
    if !args.all {
        return Ok(engine.get_pending_conflicts(&filter).await?);
    }
    let all = engine.database().list_conflicts(None).await?;
    Ok(all.into_iter().filter(|c| filter.matches(c)).collect())
}

fn summary(conflict: &ConflictRecord) -> serde_json::Value {
    json!({
        "id": conflict.id,
        "entityType": conflict.entity_type,
        "entityId": conflict.entity_id,
        "conflictType": conflict.conflict_type,
        "severity": conflict.severity,
        "status": conflict.status,
        "detectedAt": conflict.detected_at,
        "fields": conflict.diffs.iter().map(|d| d.field_path.as_str()).collect::<Vec<_>>(),
        "resolution": (conflict.status == ConflictStatus::Resolved).then(|| json!({
            "strategy": conflict.resolution_strategy,
            "by": conflict.resolved_by,
            "at": conflict.resolved_at,
        })),
    })
}

fn render<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        let mut argv = vec!["reliefwatch"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).map(|h| h.command)
    }

    #[test]
    fn test_parses_conflict_filters() {
        let command = parse(&["conflicts", "list", "--severity", "HIGH", "--type", "DELETE_MODIFY"]).unwrap();
        match command {
            Command::Conflicts(ConflictCommand::List(args)) => {
                assert!(!args.all);
                assert_eq!(args.severity, Some(ConflictSeverity::High));
                assert_eq!(args.conflict_type, Some(ConflictType::DeleteModify));
                assert_eq!(args.entity_type, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parses_resolve() {
        let id = Uuid::new_v4();
        let id_arg = id.to_string();
        let command = parse(&[
            "conflicts",
            "resolve",
            &id_arg,
            "--strategy",
            "ACCEPT_REMOTE",
            "--justification",
            "server has the census",
        ])
        .unwrap();
        match command {
            Command::Conflicts(ConflictCommand::Resolve(args)) => {
                assert_eq!(args.id, id);
                assert_eq!(args.strategy, ResolutionStrategy::AcceptRemote);
                assert_eq!(args.justification.as_deref(), Some("server has the census"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let id = Uuid::new_v4().to_string();
        assert!(parse(&["conflicts", "resolve", &id, "--strategy", "LAST_WRITE_WINS"]).is_err());
    }

    #[test]
    fn test_verify_audit_id_is_optional() {
        assert!(matches!(parse(&["verify-audit"]).unwrap(), Command::VerifyAudit { id: None }));
    }
}
