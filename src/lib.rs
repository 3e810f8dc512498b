pub mod app;
pub mod auth;
pub mod carts;
pub mod catalog;
pub mod mailer;
pub mod models;
pub mod money;
pub mod orders;
pub mod routes;
pub mod schema;
pub mod sessions;
pub mod store;

#[cfg(test)]
mod test_support;
