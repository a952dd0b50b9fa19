use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use bookworm_core::domain::routing::HandlerKind;
use bookworm_core::domain::session::{Session, SessionUpdate, StickyContext, Turn};

use super::order::{format_timestamp, parse_rfc3339};
use super::{RepositoryError, SessionStore};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn load(&self, user_id: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, active_handler, sticky_json, history_json, created_at, updated_at
             FROM dialogue_session WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn apply(
        &self,
        user_id: &str,
        update: SessionUpdate,
    ) -> Result<Session, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Opening with a write takes SQLite's write lock for the rest of the transaction.
        let now = format_timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO dialogue_session (user_id, created_at, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT user_id, active_handler, sticky_json, history_json, created_at, updated_at
             FROM dialogue_session WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let mut session = session_from_row(&row)?;
        session.apply(update);

        let sticky_json = serde_json::to_string(&session.sticky)
            .map_err(|err| RepositoryError::Decode(format!("encode sticky context: {err}")))?;
        let history_json = serde_json::to_string(&session.history)
            .map_err(|err| RepositoryError::Decode(format!("encode history: {err}")))?;

        sqlx::query(
            "UPDATE dialogue_session
             SET active_handler = ?, sticky_json = ?, history_json = ?, updated_at = ?
             WHERE user_id = ?",
        )
        .bind(session.active_handler.map(|handler| handler.as_str()))
        .bind(sticky_json)
        .bind(history_json)
        .bind(format_timestamp(session.updated_at))
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let active_handler: Option<String> = row.try_get("active_handler")?;
    let active_handler = active_handler
        .map(|label| {
            HandlerKind::from_label(&label).ok_or_else(|| {
                RepositoryError::Decode(format!("invalid session active_handler: {label}"))
            })
        })
        .transpose()?;

    let sticky_json: String = row.try_get("sticky_json")?;
    let sticky: StickyContext = serde_json::from_str(&sticky_json)
        .map_err(|err| RepositoryError::Decode(format!("invalid session sticky_json: {err}")))?;
    let history_json: String = row.try_get("history_json")?;
    let history: Vec<Turn> = serde_json::from_str(&history_json)
        .map_err(|err| RepositoryError::Decode(format!("invalid session history_json: {err}")))?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Session {
        user_id: row.try_get("user_id")?,
        active_handler,
        sticky,
        history,
        created_at: parse_rfc3339("session created_at", &created_at)?,
        updated_at: parse_rfc3339("session updated_at", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bookworm_core::domain::routing::{HandlerKind, Intent, RoutingDecision, RoutingMethod};
    use bookworm_core::domain::session::{ClaimKind, SessionUpdate, StickyDirective, Turn};

    use super::SqlSessionStore;
    use crate::repositories::SessionStore;
    use crate::{connect_with_settings, migrations, DbPool};

    type TestResult<T> = Result<T, String>;

    async fn setup_pool(max_connections: u32) -> TestResult<DbPool> {
        let pool = connect_with_settings("sqlite::memory:", max_connections, 30)
            .await
            .map_err(|error| format!("connect test pool: {error}"))?;
        migrations::run_pending(&pool).await.map_err(|error| format!("run migrations: {error}"))?;
        Ok(pool)
    }

    fn update(handler: HandlerKind, sticky: StickyDirective, text: &str) -> SessionUpdate {
        SessionUpdate {
            handled_by: Some(handler),
            decision: Some(RoutingDecision::new(Intent::Fraud, 0.95, RoutingMethod::Keyword)),
            sticky,
            turn: Turn::new(text, "reply"),
        }
    }

    #[tokio::test]
    async fn first_apply_creates_session() -> TestResult<()> {
        let pool = setup_pool(1).await?;
        let store = SqlSessionStore::new(pool.clone());

        let missing = store.load("user-1").await.map_err(|error| format!("load: {error}"))?;
        if missing.is_some() {
            return Err("session should not exist before the first turn".to_string());
        }

        store
            .apply(
                "user-1",
                update(HandlerKind::Fraud, StickyDirective::AwaitClaim(ClaimKind::Damage), "hi"),
            )
            .await
            .map_err(|error| format!("apply: {error}"))?;

        let session = store
            .load("user-1")
            .await
            .map_err(|error| format!("reload: {error}"))?
            .ok_or_else(|| "session should exist after apply".to_string())?;
        if session.active_handler != Some(HandlerKind::Fraud) {
            return Err(format!("unexpected active handler {:?}", session.active_handler));
        }
        if !session.sticky.has_open_fraud_case() {
            return Err("sticky fraud case should survive a reload".to_string());
        }
        if session.history.len() != 1 || session.history[0].user.content != "hi" {
            return Err(format!("unexpected history {:?}", session.history));
        }

        pool.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn history_length_tracks_turn_count() -> TestResult<()> {
        let pool = setup_pool(1).await?;
        let store = SqlSessionStore::new(pool.clone());

        for n in 1..=4 {
            let session = store
                .apply("user-2", update(HandlerKind::Order, StickyDirective::Keep, "turn"))
                .await
                .map_err(|error| format!("apply turn {n}: {error}"))?;
            if session.history.len() != n {
                return Err(format!("expected {n} turns, found {}", session.history.len()));
            }
        }

        pool.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_applies_do_not_lose_turns() -> TestResult<()> {
        let pool = setup_pool(1).await?;
        let store = Arc::new(SqlSessionStore::new(pool.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let text = n.to_string();
                    let turn = update(HandlerKind::Recommendation, StickyDirective::Keep, &text);
                    store.apply("user-3", turn).await.map(|_| ()).map_err(|error| error.to_string())
                })
            })
            .collect();
        for task in tasks {
            task.await.map_err(|error| format!("join: {error}"))??;
        }

        let session = store
            .load("user-3")
            .await
            .map_err(|error| format!("load: {error}"))?
            .ok_or_else(|| "session should exist".to_string())?;
        if session.history.len() != 8 {
            return Err(format!("lost updates: {} of 8 turns stored", session.history.len()));
        }

        pool.close().await;
        Ok(())
    }
}
