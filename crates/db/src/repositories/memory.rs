use std::collections::HashMap;

use tokio::sync::RwLock;

use bookworm_core::domain::order::{OrderId, OrderRecord};
use bookworm_core::domain::session::{Session, SessionUpdate};

use super::{check_order_lines, OrderRepository, RepositoryError, SessionStore};

#[derive(Default)]
pub struct InMemoryOrderRepository {
    lines: RwLock<Vec<OrderRecord>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert_order(&self, lines: &[OrderRecord]) -> Result<(), RepositoryError> {
        let order_id = check_order_lines(lines)?;
        let mut stored = self.lines.write().await;
        if stored.iter().any(|line| &line.order_id == order_id) {
            return Err(RepositoryError::Rejected(format!("order {order_id} already exists")));
        }
        for (index, line) in lines.iter().enumerate() {
            if lines[..index].iter().any(|earlier| earlier.line_number == line.line_number) {
                return Err(RepositoryError::Rejected(format!(
                    "order {order_id} repeats line {}",
                    line.line_number
                )));
            }
        }
        stored.extend_from_slice(lines);
        Ok(())
    }

    async fn find_order(&self, order_id: &OrderId) -> Result<Vec<OrderRecord>, RepositoryError> {
        let stored = self.lines.read().await;
        let mut lines: Vec<OrderRecord> =
            stored.iter().filter(|line| &line.order_id == order_id).cloned().collect();
        lines.sort_by_key(|line| line.line_number);
        Ok(lines)
    }

    async fn list_recent_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<OrderRecord>, RepositoryError> {
        let stored = self.lines.read().await;
        let mut lines: Vec<OrderRecord> =
            stored.iter().filter(|line| line.user_id == user_id).cloned().collect();
        lines.sort_by(|a, b| {
            b.purchased_at
                .cmp(&a.purchased_at)
                .then_with(|| b.order_id.cmp(&a.order_id))
                .then_with(|| a.line_number.cmp(&b.line_number))
        });

        let mut kept: Vec<OrderId> = Vec::new();
        lines.retain(|line| {
            if kept.contains(&line.order_id) {
                return true;
            }
            if kept.len() < limit as usize {
                kept.push(line.order_id.clone());
                return true;
            }
            false
        });
        Ok(lines)
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, user_id: &str) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(user_id).cloned())
    }

    async fn apply(
        &self,
        user_id: &str,
        update: SessionUpdate,
    ) -> Result<Session, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let session =
            sessions.entry(user_id.to_string()).or_insert_with(|| Session::new(user_id));
        session.apply(update);
        Ok(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use bookworm_core::domain::order::{Address, OrderId, OrderRecord};
    use bookworm_core::domain::routing::HandlerKind;
    use bookworm_core::domain::session::{SessionUpdate, StickyDirective, Turn};

    use crate::repositories::{
        InMemoryOrderRepository, InMemorySessionStore, OrderRepository, RepositoryError,
        SessionStore,
    };

    fn line(order_id: &str, line_number: u32, minutes: i64) -> OrderRecord {
        let purchased_at = Utc::now() + Duration::minutes(minutes);
        OrderRecord {
            order_id: OrderId(order_id.to_string()),
            line_number,
            user_id: "user-1".to_string(),
            title: "Middlemarch".to_string(),
            unit_price: Decimal::new(999, 2),
            quantity: 1,
            shipping_address: Address {
                street: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                state: "IL".to_string(),
                zip_code: "62701".to_string(),
            },
            masked_card: "****4242".to_string(),
            purchased_at,
            expected_delivery: purchased_at + Duration::days(3),
        }
    }

    #[tokio::test]
    async fn in_memory_order_repo_is_all_or_nothing() {
        let repo = InMemoryOrderRepository::default();
        let result = repo.insert_order(&[line("ORD-1", 1, 0), line("ORD-1", 1, 0)]).await;

        assert!(matches!(result, Err(RepositoryError::Rejected(_))));
        let stored = repo.find_order(&OrderId("ORD-1".to_string())).await.expect("find order");
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn in_memory_recent_orders_respects_limit() {
        let repo = InMemoryOrderRepository::default();
        repo.insert_order(&[line("ORD-1", 1, 0), line("ORD-1", 2, 0)]).await.expect("order 1");
        repo.insert_order(&[line("ORD-2", 1, 5)]).await.expect("order 2");
        repo.insert_order(&[line("ORD-3", 1, 10)]).await.expect("order 3");

        let recent = repo.list_recent_for_user("user-1", 2).await.expect("list");
        let ids: Vec<&str> = recent.iter().map(|line| line.order_id.as_str()).collect();
        assert_eq!(ids, ["ORD-3", "ORD-2"]);
    }

    #[tokio::test]
    async fn in_memory_session_store_appends_turns() {
        let store = InMemorySessionStore::default();
        for _ in 0..3 {
            store
                .apply(
                    "user-1",
                    SessionUpdate {
                        handled_by: Some(HandlerKind::OrderQuery),
                        decision: None,
                        sticky: StickyDirective::Keep,
                        turn: Turn::new("where is my order", "on its way"),
                    },
                )
                .await
                .expect("apply");
        }

        let session = store.load("user-1").await.expect("load").expect("session exists");
        assert_eq!(session.history.len(), 3);
        assert_eq!(session.active_handler, Some(HandlerKind::OrderQuery));
    }
}
