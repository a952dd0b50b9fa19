use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

static EXPIRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0[1-9]|1[0-2])/\d{2}$").expect("expiry pattern compiles"));

/// An order placement request exactly as it arrives from a client. Every field is
/// optional here; `validate` decides what is missing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrderRequest {
    #[serde(default, alias = "order_data", alias = "cart_items")]
    pub items: Vec<CartItemDraft>,
    #[serde(default, alias = "user_details")]
    pub buyer: BuyerDraft,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CartItemDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "price", alias = "unitPrice")]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
}

#[derive(Clone, Default, Deserialize)]
pub struct BuyerDraft {
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub address: Option<AddressDraft>,
    #[serde(default, alias = "cardNumber")]
    pub card_number: Option<String>,
    #[serde(default, alias = "expiryDate")]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub cvv: Option<String>,
}

impl fmt::Debug for BuyerDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuyerDraft")
            .field("user_id", &self.user_id)
            .field("address", &self.address)
            .field("card_number", &self.card_number.as_ref().map(|_| "[REDACTED]"))
            .field("expiry_date", &self.expiry_date.as_ref().map(|_| "[REDACTED]"))
            .field("cvv", &self.cvv.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AddressDraft {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "zipCode")]
    pub zip_code: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Cart,
    Buyer,
    Address,
    Payment,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrderValidationError {
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Cart item {line} has an invalid {field}: {reason}")]
    CartLine { line: usize, field: &'static str, reason: &'static str },
    #[error("Missing required buyer field: {0}")]
    MissingBuyerField(&'static str),
    #[error("The order's user does not match the signed-in user")]
    UserMismatch,
    #[error("Missing address fields: {}", .0.join(", "))]
    MissingAddressFields(Vec<&'static str>),
    #[error("Invalid {field}. {reason}")]
    InvalidPayment { field: &'static str, reason: &'static str },
}

impl OrderValidationError {
    pub fn category(&self) -> FieldCategory {
        match self {
            Self::EmptyCart | Self::CartLine { .. } => FieldCategory::Cart,
            Self::MissingBuyerField(_) | Self::UserMismatch => FieldCategory::Buyer,
            Self::MissingAddressFields(_) => FieldCategory::Address,
            Self::InvalidPayment { .. } => FieldCategory::Payment,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub title: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl CartItem {
    /// `None` when the line total does not fit in a `Decimal`.
    pub fn checked_subtotal(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PaymentCard {
    number: String,
    expiry: String,
    cvv: String,
}

impl PaymentCard {
    /// `****` followed by the last four digits. The only card form that is ever stored.
    pub fn masked_number(&self) -> String {
        let tail = self.number.len().saturating_sub(4);
        format!("****{}", &self.number[tail..])
    }

    pub fn expiry(&self) -> &str {
        &self.expiry
    }
}

impl fmt::Debug for PaymentCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentCard")
            .field("number", &self.masked_number())
            .field("expiry", &"[REDACTED]")
            .field("cvv", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuyerDetails {
    pub user_id: String,
    pub address: Address,
    pub card: PaymentCard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedOrder {
    pub items: Vec<CartItem>,
    pub buyer: BuyerDetails,
    total_cost: Decimal,
}

impl OrderRequest {
    /// Checks the request in a fixed order (cart, buyer, address, payment) and stops at
    /// the first defect.
    pub fn validate(&self) -> Result<ValidatedOrder, OrderValidationError> {
        let (items, total_cost) = validate_cart(&self.items)?;
        let user_id = present(&self.buyer.user_id)
            .ok_or(OrderValidationError::MissingBuyerField("user_id"))?;
        let address = validate_address(self.buyer.address.as_ref())?;
        let card = validate_payment(&self.buyer)?;

        Ok(ValidatedOrder {
            items,
            buyer: BuyerDetails { user_id: user_id.to_string(), address, card },
            total_cost,
        })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn validate_cart(
    drafts: &[CartItemDraft],
) -> Result<(Vec<CartItem>, Decimal), OrderValidationError> {
    if drafts.is_empty() {
        return Err(OrderValidationError::EmptyCart);
    }

    let items = drafts
        .iter()
        .enumerate()
        .map(|(index, draft)| {
            let line = index + 1;
            let title = present(&draft.title).ok_or(OrderValidationError::CartLine {
                line,
                field: "title",
                reason: "is required",
            })?;
            let unit_price = draft.unit_price.ok_or(OrderValidationError::CartLine {
                line,
                field: "price",
                reason: "is required",
            })?;
            if unit_price < Decimal::ZERO {
                return Err(OrderValidationError::CartLine {
                    line,
                    field: "price",
                    reason: "must not be negative",
                });
            }
            let quantity = draft.quantity.ok_or(OrderValidationError::CartLine {
                line,
                field: "quantity",
                reason: "is required",
            })?;
            let quantity = quantity
                .fract()
                .is_zero()
                .then(|| quantity.to_u32())
                .flatten()
                .filter(|quantity| *quantity >= 1)
                .ok_or(OrderValidationError::CartLine {
                    line,
                    field: "quantity",
                    reason: "must be a whole number of at least 1",
                })?;

            Ok(CartItem { title: title.to_string(), unit_price, quantity })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = Decimal::ZERO;
    for (index, item) in items.iter().enumerate() {
        total = item.checked_subtotal().and_then(|subtotal| total.checked_add(subtotal)).ok_or(
            OrderValidationError::CartLine {
                line: index + 1,
                field: "price",
                reason: "makes the order total too large",
            },
        )?;
    }
    Ok((items, total))
}

fn validate_address(draft: Option<&AddressDraft>) -> Result<Address, OrderValidationError> {
    let empty = AddressDraft::default();
    let draft = draft.unwrap_or(&empty);
    let fields = [
        ("street", present(&draft.street)),
        ("city", present(&draft.city)),
        ("state", present(&draft.state)),
        ("zip_code", present(&draft.zip_code)),
    ];

    let missing: Vec<&'static str> =
        fields.iter().filter(|(_, value)| value.is_none()).map(|(name, _)| *name).collect();
    if !missing.is_empty() {
        return Err(OrderValidationError::MissingAddressFields(missing));
    }

    let [street, city, state, zip_code] = fields.map(|(_, value)| value.unwrap_or_default());
    Ok(Address {
        street: street.to_string(),
        city: city.to_string(),
        state: state.to_string(),
        zip_code: zip_code.to_string(),
    })
}

fn validate_payment(buyer: &BuyerDraft) -> Result<PaymentCard, OrderValidationError> {
    let number: String = present(&buyer.card_number)
        .ok_or(OrderValidationError::InvalidPayment {
            field: "card number",
            reason: "Card number is required.",
        })?
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect();
    if number.len() != 16 || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(OrderValidationError::InvalidPayment {
            field: "card number",
            reason: "Must be 16 digits.",
        });
    }

    let expiry = present(&buyer.expiry_date).unwrap_or_default();
    if !EXPIRY_RE.is_match(expiry) {
        return Err(OrderValidationError::InvalidPayment {
            field: "expiry date",
            reason: "Must be in MM/YY format.",
        });
    }

    let cvv = present(&buyer.cvv).unwrap_or_default();
    if cvv.len() != 3 || !cvv.chars().all(|c| c.is_ascii_digit()) {
        return Err(OrderValidationError::InvalidPayment {
            field: "CVV",
            reason: "Must be 3 digits.",
        });
    }

    Ok(PaymentCard { number, expiry: expiry.to_string(), cvv: cvv.to_string() })
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    /// `ORD-<UTC yyyyMMddHHmmssSSS>-<8 hex>`: sorts by placement time and stays unique
    /// when two orders land in the same millisecond.
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("ORD-{}-{}", at.format("%Y%m%d%H%M%S%3f"), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted cart line. Expiry and CVV never reach this type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub line_number: u32,
    pub user_id: String,
    pub title: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub shipping_address: Address,
    pub masked_card: String,
    pub purchased_at: DateTime<Utc>,
    pub expected_delivery: DateTime<Utc>,
}

impl ValidatedOrder {
    /// Sum of line subtotals, computed with overflow checks during validation.
    pub fn total_cost(&self) -> Decimal {
        self.total_cost
    }

    pub fn to_records(
        &self,
        order_id: &OrderId,
        placed_at: DateTime<Utc>,
        lead_days: u32,
    ) -> Vec<OrderRecord> {
        let expected_delivery = placed_at + Duration::days(i64::from(lead_days));
        let masked_card = self.buyer.card.masked_number();
        self.items
            .iter()
            .zip(1u32..)
            .map(|(item, line_number)| OrderRecord {
                order_id: order_id.clone(),
                line_number,
                user_id: self.buyer.user_id.clone(),
                title: item.title.clone(),
                unit_price: item.unit_price,
                quantity: item.quantity,
                shipping_address: self.buyer.address.clone(),
                masked_card: masked_card.clone(),
                purchased_at: placed_at,
                expected_delivery,
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub total_cost: Decimal,
    pub placed_at: DateTime<Utc>,
    pub expected_delivery: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    InTransit,
    Delivered,
}

impl OrderStatus {
    pub fn at(expected_delivery: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now > expected_delivery {
            Self::Delivered
        } else {
            Self::InTransit
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::InTransit => "In Transit",
            Self::Delivered => "Delivered",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderedItem {
    pub title: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total_cost: Decimal,
    pub order_placed_on: DateTime<Utc>,
    pub expected_delivery: DateTime<Utc>,
    pub items: Vec<OrderedItem>,
    pub shipping_address: Address,
}

impl OrderSummary {
    /// Groups lines by order id, keeping the order in which ids first appear.
    pub fn group(records: &[OrderRecord], now: DateTime<Utc>) -> Vec<OrderSummary> {
        let mut summaries: Vec<OrderSummary> = Vec::new();
        for record in records {
            let item = OrderedItem {
                title: record.title.clone(),
                quantity: record.quantity,
                unit_price: record.unit_price,
            };
            // Saturates: rows already in storage are not re-validated.
            let subtotal = record
                .unit_price
                .checked_mul(Decimal::from(record.quantity))
                .unwrap_or(Decimal::MAX);

            match summaries.iter_mut().find(|summary| summary.order_id == record.order_id) {
                Some(summary) => {
                    summary.total_cost =
                        summary.total_cost.checked_add(subtotal).unwrap_or(Decimal::MAX);
                    summary.items.push(item);
                }
                None => summaries.push(OrderSummary {
                    order_id: record.order_id.clone(),
                    status: OrderStatus::at(record.expected_delivery, now),
                    total_cost: subtotal,
                    order_placed_on: record.purchased_at,
                    expected_delivery: record.expected_delivery,
                    items: vec![item],
                    shipping_address: record.shipping_address.clone(),
                }),
            }
        }
        summaries
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{
        FieldCategory, OrderId, OrderRequest, OrderStatus, OrderSummary, OrderValidationError,
    };

    fn request(value: serde_json::Value) -> OrderRequest {
        serde_json::from_value(value).expect("request json")
    }

    fn valid_payload() -> serde_json::Value {
        json!({
            "order_data": [
                {"title": "Dune", "price": 12.50, "quantity": 2},
                {"title": "Emma", "price": "7.25", "quantity": 1}
            ],
            "user_details": {
                "user_id": "user-1",
                "address": {"street": "1 Main St", "city": "Springfield", "state": "IL", "zip_code": "62701"},
                "cardNumber": "4111111111111111",
                "expiryDate": "12/29",
                "cvv": "123"
            }
        })
    }

    #[test]
    fn valid_request_totals_every_line() {
        let order = request(valid_payload()).validate().expect("valid order");
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.total_cost(), Decimal::new(3225, 2));
        assert_eq!(order.buyer.card.masked_number(), "****1111");
    }

    #[test]
    fn fifteen_digit_card_is_a_payment_error() {
        let mut payload = valid_payload();
        payload["user_details"]["cardNumber"] = json!("411111111111111");
        let error = request(payload).validate().expect_err("short card");
        assert_eq!(error.category(), FieldCategory::Payment);
        assert_eq!(error.to_string(), "Invalid card number. Must be 16 digits.");
    }

    #[test]
    fn zero_quantity_is_a_cart_error() {
        let mut payload = valid_payload();
        payload["order_data"][1]["quantity"] = json!(0);
        let error = request(payload).validate().expect_err("zero quantity");
        assert_eq!(
            error,
            OrderValidationError::CartLine {
                line: 2,
                field: "quantity",
                reason: "must be a whole number of at least 1"
            }
        );
        assert_eq!(error.category(), FieldCategory::Cart);
    }

    #[test]
    fn first_failing_category_wins() {
        let mut payload = valid_payload();
        payload["user_details"]["address"] = json!({"street": "1 Main St"});
        payload["user_details"]["cvv"] = json!("12");
        let error = request(payload).validate().expect_err("address before payment");
        assert_eq!(
            error,
            OrderValidationError::MissingAddressFields(vec!["city", "state", "zip_code"])
        );
    }

    #[test]
    fn expiry_and_cvv_shapes_are_checked() {
        struct Case {
            expiry: &'static str,
            cvv: &'static str,
            ok: bool,
        }
        let cases = [
            Case { expiry: "01/30", cvv: "000", ok: true },
            Case { expiry: "13/30", cvv: "123", ok: false },
            Case { expiry: "1/30", cvv: "123", ok: false },
            Case { expiry: "12/2030", cvv: "123", ok: false },
            Case { expiry: "12/30", cvv: "12a", ok: false },
            Case { expiry: "12/30", cvv: "1234", ok: false },
        ];
        for case in cases {
            let mut payload = valid_payload();
            payload["user_details"]["expiryDate"] = json!(case.expiry);
            payload["user_details"]["cvv"] = json!(case.cvv);
            let result = request(payload).validate();
            assert_eq!(result.is_ok(), case.ok, "expiry={} cvv={}", case.expiry, case.cvv);
        }
    }

    #[test]
    fn empty_cart_and_negative_price_are_rejected() {
        let mut payload = valid_payload();
        payload["order_data"] = json!([]);
        assert_eq!(request(payload).validate(), Err(OrderValidationError::EmptyCart));

        let mut payload = valid_payload();
        payload["order_data"][0]["price"] = json!(-1);
        let error = request(payload).validate().expect_err("negative price");
        assert_eq!(error.category(), FieldCategory::Cart);
    }

    #[test]
    fn card_details_never_appear_in_debug_output() {
        let order = request(valid_payload()).validate().expect("valid order");
        let debug = format!("{order:?}");
        assert!(!debug.contains("4111111111111111"));
        assert!(!debug.contains("12/29"));
        assert!(!debug.contains("\"123\""));
    }

    #[test]
    fn records_share_one_order_id_and_lead_time() {
        let order = request(valid_payload()).validate().expect("valid order");
        let placed_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).single().expect("timestamp");
        let order_id = OrderId::generate(placed_at);
        let records = order.to_records(&order_id, placed_at, 3);

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.order_id == order_id));
        assert!(records
            .iter()
            .all(|record| record.expected_delivery - placed_at == Duration::days(3)));
        assert!(records.iter().all(|record| record.masked_card == "****1111"));
        assert_eq!(records[1].line_number, 2);
    }

    #[test]
    fn order_ids_sort_by_time() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).single().expect("timestamp");
        let later = earlier + Duration::milliseconds(1);
        let first = OrderId::generate(earlier);
        let second = OrderId::generate(later);

        assert!(first.as_str().starts_with("ORD-20240301093000000-"));
        assert!(first < second);
        assert_ne!(OrderId::generate(earlier), OrderId::generate(earlier));
    }

    #[test]
    fn summaries_group_lines_and_derive_status() {
        let order = request(valid_payload()).validate().expect("valid order");
        let placed_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).single().expect("timestamp");
        let records = order.to_records(&OrderId::generate(placed_at), placed_at, 3);

        let summaries = OrderSummary::group(&records, placed_at + Duration::days(1));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].items.len(), 2);
        assert_eq!(summaries[0].total_cost, Decimal::new(3225, 2));
        assert_eq!(summaries[0].status, OrderStatus::InTransit);

        let later = OrderSummary::group(&records, placed_at + Duration::days(4));
        assert_eq!(later[0].status, OrderStatus::Delivered);
    }

    #[test]
    fn total_overflow_is_a_cart_error() {
        let mut payload = valid_payload();
        payload["order_data"][0]["price"] = json!(Decimal::MAX.to_string());
        let error = request(payload).validate().expect_err("total does not fit");
        assert_eq!(
            error,
            OrderValidationError::CartLine {
                line: 1,
                field: "price",
                reason: "makes the order total too large"
            }
        );
        assert_eq!(error.category(), FieldCategory::Cart);

        let mut payload = valid_payload();
        payload["order_data"][0]["price"] = json!(Decimal::MAX.to_string());
        payload["order_data"][0]["quantity"] = json!(1);
        let error = request(payload).validate().expect_err("sum does not fit");
        assert_eq!(
            error,
            OrderValidationError::CartLine {
                line: 2,
                field: "price",
                reason: "makes the order total too large"
            }
        );
    }

    #[test]
    fn oversized_stored_lines_saturate_instead_of_panicking() {
        let order = request(valid_payload()).validate().expect("valid order");
        let placed_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).single().expect("timestamp");
        let mut records = order.to_records(&OrderId::generate(placed_at), placed_at, 3);
        for record in &mut records {
            record.unit_price = Decimal::MAX;
        }

        let summaries = OrderSummary::group(&records, placed_at);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_cost, Decimal::MAX);
    }
}
