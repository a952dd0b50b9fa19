use bookworm_core::domain::order::OrderSummary;
use bookworm_db::{connect_with_config, OrderRepository, SqlOrderRepository};
use chrono::Utc;

use crate::commands::{prepare, CommandResult};

pub fn run(user_id: &str, limit: Option<u32>) -> CommandResult {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return CommandResult::failure("orders", "invalid_argument", "user id must not be empty", 2);
    }

    let (config, runtime) = match prepare("orders") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let limit = limit.unwrap_or(config.orders.history_limit).max(1);

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let lines = SqlOrderRepository::new(pool.clone())
            .list_recent_for_user(user_id, limit)
            .await
            .map_err(|error| ("db_query", error.to_string(), 5u8));
        pool.close().await;
        lines
    });

    let lines = match result {
        Ok(lines) => lines,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("orders", error_class, message, exit_code);
        }
    };

    let orders = OrderSummary::group(&lines, Utc::now());
    match serde_json::to_value(&orders) {
        Ok(data) => CommandResult::success_with(
            "orders",
            format!("{} order(s) for `{user_id}`", orders.len()),
            Some(data),
        ),
        Err(error) => CommandResult::failure("orders", "serialization", error.to_string(), 6),
    }
}
