use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use bookworm_core::domain::order::{Address, OrderId, OrderRecord};

use super::{check_order_lines, OrderRepository, RepositoryError};
use crate::DbPool;

const ORDER_LINE_COLUMNS: &str = "order_id, line_number, user_id, title, unit_price, quantity,
    street, city, state, zip_code, masked_card, purchased_at, expected_delivery";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn insert_order(&self, lines: &[OrderRecord]) -> Result<(), RepositoryError> {
        check_order_lines(lines)?;

        let mut tx = self.pool.begin().await?;
        for line in lines {
            if let Err(error) = insert_line(&mut tx, line).await {
                tx.rollback().await?;
                return Err(error.into());
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_order(&self, order_id: &OrderId) -> Result<Vec<OrderRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_LINE_COLUMNS} FROM order_line WHERE order_id = ? ORDER BY line_number"
        ))
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_record_from_row).collect()
    }

    async fn list_recent_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<OrderRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_LINE_COLUMNS}
             FROM order_line
             WHERE user_id = ? AND order_id IN (
                 SELECT order_id FROM order_line
                 WHERE user_id = ?
                 GROUP BY order_id
                 ORDER BY MAX(purchased_at) DESC, order_id DESC
                 LIMIT ?
             )
             ORDER BY purchased_at DESC, order_id DESC, line_number ASC"
        ))
        .bind(user_id)
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_record_from_row).collect()
    }
}

async fn insert_line(
    tx: &mut Transaction<'_, Sqlite>,
    line: &OrderRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO order_line ({ORDER_LINE_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(line.order_id.as_str())
    .bind(i64::from(line.line_number))
    .bind(&line.user_id)
    .bind(&line.title)
    .bind(line.unit_price.to_string())
    .bind(i64::from(line.quantity))
    .bind(&line.shipping_address.street)
    .bind(&line.shipping_address.city)
    .bind(&line.shipping_address.state)
    .bind(&line.shipping_address.zip_code)
    .bind(&line.masked_card)
    .bind(format_timestamp(line.purchased_at))
    .bind(format_timestamp(line.expected_delivery))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Fixed-width UTC timestamps so that text ordering in SQL matches time ordering.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc)).map_err(|err| {
        RepositoryError::Decode(format!("invalid {} timestamp '{}': {}", field, value, err))
    })
}

fn order_record_from_row(row: &SqliteRow) -> Result<OrderRecord, RepositoryError> {
    let unit_price: String = row.try_get("unit_price")?;
    let unit_price = Decimal::from_str(&unit_price).map_err(|err| {
        RepositoryError::Decode(format!("invalid order_line unit_price '{unit_price}': {err}"))
    })?;
    let line_number: i64 = row.try_get("line_number")?;
    let quantity: i64 = row.try_get("quantity")?;
    let purchased_at: String = row.try_get("purchased_at")?;
    let expected_delivery: String = row.try_get("expected_delivery")?;

    Ok(OrderRecord {
        order_id: OrderId(row.try_get("order_id")?),
        line_number: u32::try_from(line_number).map_err(|_| {
            RepositoryError::Decode(format!("invalid order_line line_number {line_number}"))
        })?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        unit_price,
        quantity: u32::try_from(quantity).map_err(|_| {
            RepositoryError::Decode(format!("invalid order_line quantity {quantity}"))
        })?,
        shipping_address: Address {
            street: row.try_get("street")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
        },
        masked_card: row.try_get("masked_card")?,
        purchased_at: parse_rfc3339("order_line purchased_at", &purchased_at)?,
        expected_delivery: parse_rfc3339("order_line expected_delivery", &expected_delivery)?,
    })
}
