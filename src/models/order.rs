use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Fulfillment axis of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Shipped,
    Completed,
    Rejected,
    Cancelled,
}

/// Payment axis of an order, independent of [`OrderStatus`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentMethod {
    Upi,
    Card,
    Cod,
}

impl PaymentMethod {
    /// Payment status an order starts with for this method.
    pub fn initial_payment_status(self) -> PaymentStatus {
        match self {
            PaymentMethod::Cod => PaymentStatus::Pending,
            PaymentMethod::Upi | PaymentMethod::Card => PaymentStatus::Processing,
        }
    }
}

/// Which side of an order a user acts for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Party {
    Buyer,
    Seller,
}

/// Why a requested status change cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDenied {
    /// The edge exists but belongs to the other party.
    WrongParty { allowed: Party },
    /// No such edge from the current status.
    NotAllowed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    /// The party entitled to move an order from `self` to `to`, if that edge exists.
    pub fn transition_owner(self, to: OrderStatus) -> Option<Party> {
        use OrderStatus::*;
        match (self, to) {
            (Pending, Accepted) | (Pending, Rejected) => Some(Party::Seller),
            (Pending, Cancelled) => Some(Party::Buyer),
            (Accepted, Shipped) | (Accepted, Completed) => Some(Party::Seller),
            (Shipped, Completed) => Some(Party::Seller),
            _ => None,
        }
    }

    pub fn check_transition(self, to: OrderStatus, party: Party) -> Result<(), TransitionDenied> {
        match self.transition_owner(to) {
            Some(allowed) if allowed == party => Ok(()),
            Some(allowed) => Err(TransitionDenied::WrongParty { allowed }),
            None => Err(TransitionDenied::NotAllowed),
        }
    }
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        self == PaymentStatus::Completed
    }

    /// Legal moves on the payment axis. Re-asserting the current value is
    /// handled by the caller as an idempotent no-op, not as an edge.
    pub fn can_transition(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum DeliveryAddress {
    Line(String),
    #[serde(rename_all = "camelCase")]
    Structured {
        street: String,
        city: String,
        state: String,
        pincode: String,
    },
}

impl DeliveryAddress {
    pub fn is_blank(&self) -> bool {
        match self {
            DeliveryAddress::Line(line) => line.trim().is_empty(),
            DeliveryAddress::Structured {
                street,
                city,
                pincode,
                ..
            } => street.trim().is_empty() || city.trim().is_empty() || pincode.trim().is_empty(),
        }
    }
}

/// Method-specific details as submitted at checkout. Never persisted as-is.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub card_number: Option<String>,
    pub cvv: Option<String>,
    pub cardholder_name: Option<String>,
    pub expiry: Option<String>,
    pub upi_id: Option<String>,
}

/// What is kept of the submitted payment details on the order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredPaymentDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_last4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardholder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upi_id: Option<String>,
}

impl PaymentDetails {
    pub fn card_digits(&self) -> Option<String> {
        self.card_number.as_ref().map(|n| {
            n.chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect()
        })
    }

    pub fn masked(&self) -> StoredPaymentDetails {
        let card_last4 = self.card_digits().and_then(|digits| {
            let chars: Vec<char> = digits.chars().collect();
            (chars.len() >= 4).then(|| chars[chars.len() - 4..].iter().collect())
        });
        StoredPaymentDetails {
            card_last4,
            cardholder_name: self.cardholder_name.clone(),
            upi_id: self.upi_id.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub farmer_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_at_purchase: Decimal,
}

impl OrderLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price_at_purchase * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: String,
    pub items: Vec<OrderLine>,
    /// Sum of line totals frozen at creation; never recomputed.
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_details: Option<StoredPaymentDetails>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub delivery_address: DeliveryAddress,
    /// Incremented by the repository on every successful write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Resolves the acting party. The token's role decides which side the
    /// user may act for.
    pub fn party_of(&self, user_id: &str, acting_as_farmer: bool) -> Option<Party> {
        if acting_as_farmer {
            self.has_farmer(user_id).then_some(Party::Seller)
        } else {
            (self.buyer_id == user_id).then_some(Party::Buyer)
        }
    }

    pub fn has_farmer(&self, farmer_id: &str) -> bool {
        self.items.iter().any(|line| line.farmer_id == farmer_id)
    }

    pub fn farmer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.items.iter().map(|l| l.farmer_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn computed_total(&self) -> Decimal {
        self.items.iter().map(OrderLine::line_total).sum()
    }
}
