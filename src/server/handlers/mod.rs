pub mod health;
pub mod push;
pub mod root;
pub mod subscriptions;
