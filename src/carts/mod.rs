//! Carts

pub mod engine;
pub mod errors;
pub mod models;
pub mod mutations;
mod retry;
pub mod store;

pub use engine::{CartEngine, PENDING_CART_KEY};
pub use errors::CartError;
pub use retry::retry_on_conflict;
pub use store::CartStore;
