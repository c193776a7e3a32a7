// Cart pricing
pub mod cart;

// Order creation
pub mod checkout;

// Order reads
pub mod orders;

// Fulfillment and payment transitions
pub mod order_status;

// Payment gateway and callback verification
pub mod payments;

pub use cart::{CartService, QuoteItem};
pub use checkout::{CheckoutItem, CheckoutOutcome, CheckoutRequest, CheckoutService};
pub use order_status::OrderStatusService;
pub use orders::OrderService;
pub use payments::{HttpPaymentGateway, PaymentGateway, PaymentService, Verification};
