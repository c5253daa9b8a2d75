//! Data Access Layer
//!
//! This module persists closed conversations in PostgreSQL. It uses `sqlx` for
//! connection pooling and embedded migrations; turns are stored as JSONB.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldvoice_core::{ConversationRecord, ConversationStore, Modality, Turn};
use sqlx::{FromRow, PgPool, types::Json};
use uuid::Uuid;

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

#[derive(FromRow, Debug)]
struct ConversationRow {
    session_id: Uuid,
    user_id: String,
    modality: String,
    messages: Json<Vec<Turn>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ConversationRow> for ConversationRecord {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        let modality = row
            .modality
            .parse::<Modality>()
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("Stored conversation {} is corrupt", row.session_id))?;
        Ok(ConversationRecord {
            session_id: row.session_id,
            user_id: row.user_id,
            modality,
            closed_at: row.created_at,
            turns: row.messages.0,
        })
    }
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for Db {
    async fn append(&self, record: ConversationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (session_id, user_id, modality, messages, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.session_id)
        .bind(&record.user_id)
        .bind(record.modality.to_string())
        .bind(Json(&record.turns))
        .bind(record.closed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert conversation {}", record.session_id))?;
        Ok(())
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationRecord>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT session_id, user_id, modality, messages, created_at
            FROM conversations
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent conversations")?;

        rows.into_iter().map(ConversationRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldvoice_core::{Role, TurnPayload};

    fn row(modality: &str) -> ConversationRow {
        ConversationRow {
            session_id: Uuid::new_v4(),
            user_id: "farmer-3".to_string(),
            modality: modality.to_string(),
            messages: Json(vec![Turn {
                role: Role::Agent,
                sequence: 0,
                payload: TurnPayload::Text("Plant after the first rains.".to_string()),
            }]),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_to_record() {
        let row = row("audio");
        let created_at = row.created_at;
        let record = ConversationRecord::try_from(row).unwrap();
        assert_eq!(record.modality, Modality::Audio);
        assert_eq!(record.closed_at, created_at);
        assert_eq!(record.turns[0].text(), Some("Plant after the first rains."));
    }

    #[test]
    fn test_row_with_unknown_modality_is_rejected() {
        let err = ConversationRecord::try_from(row("video")).unwrap_err();
        assert!(err.to_string().contains("corrupt"));
    }
}
