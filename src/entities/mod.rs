pub mod address;
pub mod cart_item;
pub mod order;
pub mod order_history;
pub mod order_item;
pub mod product;
pub mod user;
