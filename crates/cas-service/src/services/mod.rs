pub mod central_authentication_service;

pub use central_authentication_service::{
    Assertion, CentralAuthenticationService, TicketExpirationPolicies, DEFAULT_ID_ATTEMPTS,
};
