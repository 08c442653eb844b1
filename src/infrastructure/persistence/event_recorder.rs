use crate::domain::events::DomainEvent;
use crate::infrastructure::event_bus::EventHandler;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Append-only audit log of published domain events.
pub struct EventRecorder {
    pool: SqlitePool,
}

/// Row of the `domain_events` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event_id: String,
    pub event_type: String,
    pub source_aggregate_id: String,
    pub occurred_at: i64,
    pub payload_json: String,
}

impl EventRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, event: &DomainEvent) -> Result<()> {
        let payload = serde_json::to_string(event.payload()).context("Failed to encode event")?;
        sqlx::query(
            r#"
            INSERT INTO domain_events (event_id, event_type, source_aggregate_id, occurred_at, payload_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id().to_string())
        .bind(event.event_type().as_str())
        .bind(event.source_aggregate_id())
        .bind(event.occurred_at().timestamp_millis())
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("Failed to record domain event")?;

        debug!("Recorded {} {}", event.event_type(), event.event_id());
        Ok(())
    }

    /// Most recent events first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<RecordedEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM domain_events ORDER BY occurred_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(RecordedEvent {
                event_id: row.try_get("event_id")?,
                event_type: row.try_get("event_type")?,
                source_aggregate_id: row.try_get("source_aggregate_id")?,
                occurred_at: row.try_get("occurred_at")?,
                payload_json: row.try_get("payload_json")?,
            });
        }
        Ok(events)
    }

    pub async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM domain_events")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    fn name(&self) -> &str {
        "event_recorder"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        self.record(event).await
    }
}
