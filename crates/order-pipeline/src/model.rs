//! # Order Model
//!
//! The data carried through every processing path: [`Order`], its line [`Item`]s and
//! the monotonic [`OrderStatus`] lifecycle.
//!
//! An order is admitted from a [`NewOrder`] (the inbound request body), or decoded from
//! a queue payload. Either way it lives for exactly one processing attempt; nothing in
//! this crate stores orders.
//!
//! ## Status Lifecycle
//!
//! ```text
//! pending ──▶ processing ──┬──▶ completed
//!                          └──▶ failed
//! ```
//!
//! [`Order::advance`] rejects every other transition with a [`StatusError`], so a
//! status is never rewound.

use crate::error::{StatusError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Where an order stands in its single processing attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OrderStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Completed)
                | (OrderStatus::Processing, OrderStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of an order. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Item {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    #[validate(range(min = 0.0), custom(function = "finite"))]
    pub price: f64,
}

fn finite(value: f64) -> Result<(), validator::ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("finite"))
    }
}

/// Inbound order body accepted by the request path.
///
/// `order_id` is optional; a missing or blank id is replaced by a generated one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewOrder {
    #[serde(default)]
    pub order_id: Option<String>,
    pub customer_id: i64,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<Item>,
}

/// An order travelling through one processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Order {
    #[validate(length(min = 1))]
    pub order_id: String,
    pub customer_id: i64,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<Item>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Validates a request body and turns it into a `pending` order.
    ///
    /// Nothing outside the returned value is touched, so a rejected body has no side
    /// effects.
    pub fn admit(request: NewOrder) -> Result<Self, ValidationError> {
        request.validate()?;
        let order_id = match request.order_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => generate_order_id(),
        };
        Ok(Self {
            order_id,
            customer_id: request.customer_id,
            status: OrderStatus::Pending,
            items: request.items,
            created_at: Utc::now(),
        })
    }

    /// Moves the order to `next`, refusing anything but a forward transition.
    pub fn advance(&mut self, next: OrderStatus) -> Result<(), StatusError> {
        if !self.status.can_advance_to(next) {
            return Err(StatusError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn begin_processing(&mut self) -> Result<(), StatusError> {
        self.advance(OrderStatus::Processing)
    }

    pub fn complete(&mut self) -> Result<(), StatusError> {
        self.advance(OrderStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<(), StatusError> {
        self.advance(OrderStatus::Failed)
    }
}

/// `order-` followed by 16 hex characters of a random v4 uuid.
pub fn generate_order_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("order-{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(quantity: i64, price: f64) -> Item {
        Item {
            product_id: "widget".into(),
            quantity,
            price,
        }
    }

    #[test]
    fn admit_generates_id_when_missing_or_blank() {
        for order_id in [None, Some(String::new()), Some("   ".into())] {
            let order = Order::admit(NewOrder {
                order_id,
                customer_id: 7,
                items: vec![widget(1, 2.5)],
            })
            .unwrap();
            assert!(order.order_id.starts_with("order-"));
            assert_eq!(order.order_id.len(), "order-".len() + 16);
            assert_eq!(order.status, OrderStatus::Pending);
        }
    }

    #[test]
    fn admit_keeps_caller_supplied_id() {
        let order = Order::admit(NewOrder {
            order_id: Some("order-abc".into()),
            customer_id: 1,
            items: vec![],
        })
        .unwrap();
        assert_eq!(order.order_id, "order-abc");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_order_id();
        let b = generate_order_id();
        assert_ne!(a, b);
    }

    #[test]
    fn admit_rejects_bad_items() {
        for item in [
            widget(0, 1.0),
            widget(-3, 1.0),
            widget(1, -0.01),
            widget(1, f64::INFINITY),
        ] {
            let result = Order::admit(NewOrder {
                order_id: None,
                customer_id: 1,
                items: vec![item],
            });
            assert!(result.is_err());
        }
    }

    #[test]
    fn status_only_moves_forward() {
        let mut order = Order::admit(NewOrder {
            order_id: None,
            customer_id: 1,
            items: vec![widget(2, 10.0)],
        })
        .unwrap();

        assert!(order.complete().is_err(), "pending cannot jump to completed");
        order.begin_processing().unwrap();
        order.complete().unwrap();
        assert!(order.status.is_terminal());

        let err = order.fail().unwrap_err();
        assert_eq!(err.from, OrderStatus::Completed);
        assert_eq!(err.to, OrderStatus::Failed);
        assert!(order.begin_processing().is_err());
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let mut order = Order::admit(NewOrder {
            order_id: Some("order-1".into()),
            customer_id: 42,
            items: vec![widget(3, 1.5)],
        })
        .unwrap();
        order.begin_processing().unwrap();

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["order_id"], "order-1");
        assert_eq!(json["customer_id"], 42);
        assert_eq!(json["status"], "processing");
        assert_eq!(json["items"][0]["product_id"], "widget");
        assert!(json["created_at"].is_string());
    }
}
