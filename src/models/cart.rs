use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Rounds a display-unit amount to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Fee model applied on top of the cart subtotal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    /// Flat fee charged once for a non-empty cart.
    pub delivery_fee: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.18),
            delivery_fee: dec!(50),
        }
    }
}

/// Charges derived from a subtotal. Computed on read, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Charges {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub delivery_fee: Decimal,
    pub grand_total: Decimal,
}

impl PricingPolicy {
    pub fn charges(&self, subtotal: Decimal, has_lines: bool) -> Charges {
        let raw_tax = subtotal * self.tax_rate;
        let delivery_fee = if has_lines {
            self.delivery_fee
        } else {
            Decimal::ZERO
        };
        Charges {
            subtotal: round_money(subtotal),
            tax: round_money(raw_tax),
            delivery_fee: round_money(delivery_fee),
            grand_total: round_money(subtotal + raw_tax + delivery_fee),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub total_items: u32,
    #[serde(flatten)]
    pub charges: Charges,
}

/// A buyer's selection, owned by whoever holds it. Totals are derived from
/// `lines` on every read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cart from submitted lines. Repeated product ids are merged by
    /// summing quantities; zero-quantity lines are dropped.
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Self {
        let mut cart = Self::new();
        for line in lines.into_iter().filter(|l| l.quantity > 0) {
            match cart.position(&line.product_id) {
                Some(idx) => {
                    let existing = &mut cart.lines[idx];
                    existing.quantity = existing.quantity.saturating_add(line.quantity);
                }
                None => cart.lines.push(line),
            }
        }
        cart
    }

    fn position(&self, product_id: &str) -> Option<usize> {
        self.lines.iter().position(|l| l.product_id == product_id)
    }

    /// Adds one unit. A product already in the cart gains one unit instead of
    /// a second line; a new product starts at quantity 1.
    pub fn add_item(&mut self, item: CartLine) {
        match self.position(&item.product_id) {
            Some(idx) => {
                let line = &mut self.lines[idx];
                line.quantity = line.quantity.saturating_add(1);
            }
            None => self.lines.push(CartLine { quantity: 1, ..item }),
        }
    }

    pub fn remove_item(&mut self, product_id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        self.lines.len() != before
    }

    /// Quantities below 1 are ignored and leave the cart unchanged; returns
    /// whether a line was updated.
    pub fn set_quantity(&mut self, product_id: &str, quantity: u32) -> bool {
        if quantity < 1 {
            return false;
        }
        match self.position(product_id) {
            Some(idx) => {
                self.lines[idx].quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<CartLine> {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_items(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |acc, l| acc.saturating_add(l.quantity))
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn snapshot(&self, pricing: &PricingPolicy) -> CartSnapshot {
        CartSnapshot {
            lines: self.lines.clone(),
            total_items: self.total_items(),
            charges: pricing.charges(self.subtotal(), !self.is_empty()),
        }
    }
}
