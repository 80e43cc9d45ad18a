pub mod auth;
pub mod manager;

pub use auth::AuthExtension;
pub use manager::{
    DEFAULT_CONFIRM_TIMEOUT, SubscribeRequest, SubscriptionError, SubscriptionManager,
};
