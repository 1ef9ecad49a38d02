//! Authentication: credentials, handlers, policies and the transaction
//! manager that turns presented credentials into an `Authentication`.

pub mod authentication;
pub mod credential;
pub mod handler;
pub mod handlers;
pub mod manager;
pub mod password_policy;
pub mod policy;
pub mod result;
pub mod transaction;
pub mod transaction_manager;

pub use authentication::{Authentication, AuthenticationBuilder, Principal};
pub use credential::{Credential, CredentialKind, CredentialMetaData};
pub use handler::{AuthenticationHandler, HandlerError, HandlerResult};
pub use manager::{AuthenticationManager, PolicyBasedAuthenticationManager};
pub use policy::AuthenticationPolicy;
pub use result::{AuthenticationResult, AuthenticationResultBuilder};
pub use transaction::AuthenticationTransaction;
pub use transaction_manager::DefaultAuthenticationTransactionManager;
