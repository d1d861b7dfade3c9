// ============================================================================
// Key-Value Unit of Work
// ============================================================================
//
// Command pipelines: commands issued inside the unit are queued and sent in
// one round trip on success, or dropped without being sent on failure.
// Atomic pipelines apply as one block (MULTI/EXEC); plain pipelines apply
// command by command. Neither can be rolled back once sent.
//
// ============================================================================

pub mod batch;
pub mod engine;
pub mod manager;

pub use batch::Batch;
pub use engine::Engine;
pub use manager::{BatchResult, PipelineManager};

use crate::context::Context;
use crate::core::{Result, UnitError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Del { keys: Vec<String> },
    IncrBy { key: String, delta: i64 },
    HSet { key: String, field: String, value: String },
    HGet { key: String, field: String },
    SAdd { key: String, members: Vec<String> },
    SMembers { key: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::IncrBy { .. } => "INCRBY",
            Command::HSet { .. } => "HSET",
            Command::HGet { .. } => "HGET",
            Command::SAdd { .. } => "SADD",
            Command::SMembers { .. } => "SMEMBERS",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Command::Get { .. } | Command::HGet { .. } | Command::SMembers { .. }
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get { key } | Command::SMembers { key } => write!(f, "{} {}", self.name(), key),
            Command::Set { key, .. } => write!(f, "SET {}", key),
            Command::Del { keys } => write!(f, "DEL {}", keys.join(" ")),
            Command::IncrBy { key, delta } => write!(f, "INCRBY {} {}", key, delta),
            Command::HSet { key, field, .. } | Command::HGet { key, field } => {
                write!(f, "{} {} {}", self.name(), key, field)
            }
            Command::SAdd { key, members } => write!(f, "SADD {} {}", key, members.join(" ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Nil,
    Ok,
    Integer(i64),
    Bulk(String),
    Array(Vec<Reply>),
    /// Command accepted into a pipeline at this position; sent on exec.
    Queued(usize),
    /// Per-command failure reported by the server (e.g. WRONGTYPE).
    Error(String),
}

impl Reply {
    pub fn is_queued(&self) -> bool {
        matches!(self, Reply::Queued(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(message) => Err(UnitError::backend(message)),
            other => Ok(other),
        }
    }
}

/// Operation surface shared by clients, pipelines and [`Engine`].
#[async_trait]
pub trait CommandEngine: Send + Sync {
    async fn send(&self, ctx: &Context, command: Command) -> Result<Reply>;

    async fn get(&self, ctx: &Context, key: &str) -> Result<Reply> {
        self.send(ctx, Command::Get { key: key.to_string() }).await
    }

    async fn set(&self, ctx: &Context, key: &str, value: &str) -> Result<Reply> {
        self.send(
            ctx,
            Command::Set {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
        .await
    }

    async fn del(&self, ctx: &Context, keys: &[&str]) -> Result<Reply> {
        let keys = keys.iter().map(|k| k.to_string()).collect();
        self.send(ctx, Command::Del { keys }).await
    }

    async fn incr_by(&self, ctx: &Context, key: &str, delta: i64) -> Result<Reply> {
        self.send(
            ctx,
            Command::IncrBy {
                key: key.to_string(),
                delta,
            },
        )
        .await
    }

    async fn hset(&self, ctx: &Context, key: &str, field: &str, value: &str) -> Result<Reply> {
        self.send(
            ctx,
            Command::HSet {
                key: key.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            },
        )
        .await
    }

    async fn hget(&self, ctx: &Context, key: &str, field: &str) -> Result<Reply> {
        self.send(
            ctx,
            Command::HGet {
                key: key.to_string(),
                field: field.to_string(),
            },
        )
        .await
    }

    async fn sadd(&self, ctx: &Context, key: &str, members: &[&str]) -> Result<Reply> {
        let members = members.iter().map(|m| m.to_string()).collect();
        self.send(
            ctx,
            Command::SAdd {
                key: key.to_string(),
                members,
            },
        )
        .await
    }

    async fn smembers(&self, ctx: &Context, key: &str) -> Result<Reply> {
        self.send(ctx, Command::SMembers { key: key.to_string() }).await
    }
}

pub trait KeyValueClient: CommandEngine {
    type Pipeline: Pipeline;

    /// Plain pipeline: commands apply one by one on exec.
    fn pipeline(&self) -> Self::Pipeline;

    /// Transactional pipeline: commands apply as one block on exec.
    fn atomic_pipeline(&self) -> Self::Pipeline;
}

#[async_trait]
pub trait Pipeline: CommandEngine + 'static {
    /// Sends every queued command in one round trip.
    async fn exec(&self, ctx: &Context) -> Result<Vec<Reply>>;

    /// Drops the queued commands without sending them.
    fn discard(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display_and_kind() {
        let cmd = Command::IncrBy {
            key: "counter".into(),
            delta: 5,
        };
        assert_eq!(cmd.to_string(), "INCRBY counter 5");
        assert!(cmd.is_write());

        let cmd = Command::HGet {
            key: "user:1".into(),
            field: "name".into(),
        };
        assert_eq!(cmd.to_string(), "HGET user:1 name");
        assert!(!cmd.is_write());
    }

    #[test]
    fn test_command_serde() {
        let cmd = Command::Set {
            key: "a".into(),
            value: "1".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"cmd":"set","key":"a","value":"1"}"#);
    }

    #[test]
    fn test_reply_into_result() {
        assert_eq!(Reply::Ok.into_result().unwrap(), Reply::Ok);
        let err = Reply::Error("WRONGTYPE".into()).into_result().unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }
}
