use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{SessionKey, SessionRecord};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Binds a fresh key to the account.
    async fn establish(&self, account_id: Uuid, ttl: Duration) -> anyhow::Result<SessionRecord>;
    /// Returns the session only while it is unexpired.
    async fn lookup(&self, key: &SessionKey) -> anyhow::Result<Option<SessionRecord>>;
    async fn terminate(&self, key: &SessionKey) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn establish(&self, account_id: Uuid, ttl: Duration) -> anyhow::Result<SessionRecord> {
        let now = OffsetDateTime::now_utc();
        let purged = sqlx::query(r#"DELETE FROM sessions WHERE expire_at <= $1"#)
            .bind(now)
            .execute(&self.db)
            .await
            .context("purge expired sessions")?
            .rows_affected();
        if purged > 0 {
            debug!(purged, "expired sessions removed");
        }

        let record = sqlx::query_as::<_, SessionRecord>(
            r#"
            INSERT INTO sessions (session_key, account_id, created_at, expire_at)
            VALUES ($1, $2, $3, $4)
            RETURNING session_key, account_id, created_at, expire_at
            "#,
        )
        .bind(SessionKey::generate())
        .bind(account_id)
        .bind(now)
        .bind(now + ttl)
        .fetch_one(&self.db)
        .await
        .context("insert session")?;
        debug!(account_id = %account_id, "session established");
        Ok(record)
    }

    async fn lookup(&self, key: &SessionKey) -> anyhow::Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT session_key, account_id, created_at, expire_at
            FROM sessions
            WHERE session_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .context("lookup session")?;

        let Some(record) = record else {
            return Ok(None);
        };
        if record.is_expired_at(OffsetDateTime::now_utc()) {
            self.terminate(key).await?;
            debug!(
                account_id = %record.account_id,
                created_at = %record.created_at,
                "expired session dropped"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn terminate(&self, key: &SessionKey) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM sessions WHERE session_key = $1"#)
            .bind(key)
            .execute(&self.db)
            .await
            .context("delete session")?;
        Ok(())
    }
}

/// Process-local session table; expired entries are dropped when looked up.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn establish(&self, account_id: Uuid, ttl: Duration) -> anyhow::Result<SessionRecord> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, record| !record.is_expired_at(now));
        let key = loop {
            let candidate = SessionKey::generate();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let record = SessionRecord {
            key: key.clone(),
            account_id,
            created_at: now,
            expire_at: now + ttl,
        };
        sessions.insert(key, record.clone());
        Ok(record)
    }

    async fn lookup(&self, key: &SessionKey) -> anyhow::Result<Option<SessionRecord>> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get(key).cloned() else {
            return Ok(None);
        };
        if record.is_expired_at(now) {
            sessions.remove(key);
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn terminate(&self, key: &SessionKey) -> anyhow::Result<()> {
        self.sessions.write().await.remove(key);
        Ok(())
    }
}
