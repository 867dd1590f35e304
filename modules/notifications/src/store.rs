//! Collaborator interfaces onto the entity store and the subscription
//! directory.
//!
//! The pipeline only ever reads through these traits; the Postgres
//! implementations below are the production bindings and tests supply
//! in-memory fakes.

use crate::models::{Chapter, EntityKind, Event, Snapshot, SubscriptionScope, User};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

/// Errors surfaced by the persistence collaborators
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read access to the authoritative entity rows
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn chapter(&self, id: i64) -> Result<Option<Chapter>, StoreError>;

    async fn event(&self, id: i64) -> Result<Option<Event>, StoreError>;

    async fn snapshot(&self, id: i64) -> Result<Option<Snapshot>, StoreError>;

    /// Events whose start date falls exactly on `date`
    async fn events_starting_on(&self, date: NaiveDate) -> Result<Vec<Event>, StoreError>;
}

/// Subscription lookups, already joined to the user directory
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    /// Active users subscribed to `kind` at `scope`
    async fn active_subscribers(
        &self,
        kind: EntityKind,
        scope: SubscriptionScope,
    ) -> Result<Vec<User>, StoreError>;
}

/// Postgres-backed entity store
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn chapter(&self, id: i64) -> Result<Option<Chapter>, StoreError> {
        let chapter = sqlx::query_as::<_, Chapter>(
            r#"
            SELECT id, name, country, region, suggested_location, description
            FROM owasp_chapters
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(chapter)
    }

    async fn event(&self, id: i64) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, name, start_date, end_date, suggested_location, url, description
            FROM owasp_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn snapshot(&self, id: i64) -> Result<Option<Snapshot>, StoreError> {
        let snapshot = sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT id, title, key
            FROM owasp_snapshots
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snapshot)
    }

    async fn events_starting_on(&self, date: NaiveDate) -> Result<Vec<Event>, StoreError> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, name, start_date, end_date, suggested_location, url, description
            FROM owasp_events
            WHERE start_date = $1
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

/// Postgres-backed subscription directory
pub struct PgSubscriptionDirectory {
    pool: PgPool,
}

impl PgSubscriptionDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionDirectory for PgSubscriptionDirectory {
    async fn active_subscribers(
        &self,
        kind: EntityKind,
        scope: SubscriptionScope,
    ) -> Result<Vec<User>, StoreError> {
        // The directory stores the Global scope as object_id = 0
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.is_active
            FROM owasp_subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.content_type = $1
              AND s.object_id = $2
              AND u.is_active
            ORDER BY u.id
            "#,
        )
        .bind(kind.as_str())
        .bind(scope.object_id())
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}
