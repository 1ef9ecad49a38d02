//! Built-in authentication handlers.

pub mod accept_users;
pub mod token;

pub use accept_users::{AcceptUsersAuthenticationHandler, AcceptedUser, AccountStatus};
pub use token::TokenAuthenticationHandler;
