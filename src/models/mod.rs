pub mod cart;
pub mod order;
pub mod product;

pub use cart::{round_money, Cart, CartLine, CartSnapshot, Charges, PricingPolicy};
pub use order::{
    DeliveryAddress, Order, OrderLine, OrderStatus, Party, PaymentDetails, PaymentMethod,
    PaymentStatus, StoredPaymentDetails, TransitionDenied,
};
pub use product::{Product, ProductStatus};
