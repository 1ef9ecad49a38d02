//! Service configuration loaded from the environment.
//!
//! Secrets (backend URLs, seeded passwords) are held in `SecretString` and
//! redacted from `Debug` output.

use crate::authn::AuthenticationPolicy;
use crate::crypto::{DEFAULT_BCRYPT_COST, MAX_BCRYPT_COST, MIN_BCRYPT_COST};
use crate::registry::bounded::DEFAULT_REGISTRY_TIMEOUT;
use crate::services::TicketExpirationPolicies;
use crate::tasks::TicketRegistryCleanerConfig;
use crate::tickets::ExpirationPolicy;
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8443";
const DEFAULT_ACCEPT_USERS: &str = "casuser::Mellon";
const DEFAULT_HOST_NAME: &str = "localhost";
const ACCEPT_USERS_SEPARATOR: &str = "::";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Which ticket registry backend to run against.
#[derive(Debug)]
pub enum RegistryBackend {
    Memory,
    Redis { url: SecretString },
    Postgres { url: SecretString },
}

impl RegistryBackend {
    pub fn name(&self) -> &'static str {
        match self {
            RegistryBackend::Memory => "memory",
            RegistryBackend::Redis { .. } => "redis",
            RegistryBackend::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub bind_address: String,
    pub registry_backend: RegistryBackend,
    pub registry_timeout: Duration,
    pub handler_timeout: Duration,
    pub expiration_policies: TicketExpirationPolicies,
    pub authentication_policy: AuthenticationPolicy,
    /// Username and plaintext password pairs, hashed at startup.
    pub accept_users: Vec<(String, SecretString)>,
    /// Principal id and hex SHA-256 token digest pairs. Empty disables the
    /// token handler.
    pub token_digests: Vec<(String, String)>,
    pub bcrypt_cost: u32,
    /// Suffix for generated ticket ids.
    pub host_name: String,
    pub cleaner: TicketRegistryCleanerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let registry_backend = match vars
            .get("CAS_REGISTRY_BACKEND")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("memory") => RegistryBackend::Memory,
            Some("redis") => RegistryBackend::Redis {
                url: required_secret(vars, "REDIS_URL")?,
            },
            Some("postgres") => RegistryBackend::Postgres {
                url: required_secret(vars, "DATABASE_URL")?,
            },
            Some(other) => {
                return Err(invalid(
                    "CAS_REGISTRY_BACKEND",
                    format!("unknown backend '{other}' (expected memory, redis or postgres)"),
                ))
            }
        };

        let registry_timeout = Duration::from_millis(parse_or(
            vars,
            "CAS_REGISTRY_TIMEOUT_MS",
            u64::try_from(DEFAULT_REGISTRY_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        )?);
        let handler_timeout = Duration::from_millis(parse_or(vars, "CAS_HANDLER_TIMEOUT_MS", 5_000)?);

        let expiration_policies = expiration_policies(vars)?;

        let authentication_policy = match vars.get("CAS_AUTHN_POLICY") {
            Some(raw) => AuthenticationPolicy::from_str(raw)
                .map_err(|reason| invalid("CAS_AUTHN_POLICY", reason))?,
            None => AuthenticationPolicy::default(),
        };

        let accept_users = parse_accept_users(
            vars.get("CAS_ACCEPT_USERS")
                .map(String::as_str)
                .unwrap_or(DEFAULT_ACCEPT_USERS),
        )?;

        let token_digests = parse_token_digests(
            vars.get("CAS_TOKEN_DIGESTS").map(String::as_str).unwrap_or_default(),
        )?;

        let bcrypt_cost: u32 = parse_or(vars, "CAS_BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(invalid(
                "CAS_BCRYPT_COST",
                format!("must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}, got {bcrypt_cost}"),
            ));
        }

        let host_name = vars
            .get("CAS_HOST_NAME")
            .or_else(|| vars.get("HOSTNAME"))
            .cloned()
            .unwrap_or_else(|| DEFAULT_HOST_NAME.to_string());

        let defaults = TicketRegistryCleanerConfig::default();
        let cleaner = TicketRegistryCleanerConfig {
            enabled: parse_or(vars, "CAS_CLEANER_ENABLED", defaults.enabled)?,
            start_delay_seconds: parse_or(
                vars,
                "CAS_CLEANER_START_DELAY_SECONDS",
                defaults.start_delay_seconds,
            )?,
            repeat_interval_seconds: parse_or(
                vars,
                "CAS_CLEANER_REPEAT_INTERVAL_SECONDS",
                defaults.repeat_interval_seconds,
            )?,
            batch_size: parse_or(vars, "CAS_CLEANER_BATCH_SIZE", defaults.batch_size)?,
        };

        Ok(Config {
            bind_address,
            registry_backend,
            registry_timeout,
            handler_timeout,
            expiration_policies,
            authentication_policy,
            accept_users,
            token_digests,
            bcrypt_cost,
            host_name,
            cleaner,
        })
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn required_secret(vars: &HashMap<String, String>, name: &str) -> Result<SecretString, ConfigError> {
    vars.get(name)
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::from(v.clone()))
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Parse `name` if set, else `default`. A set but malformed value is an error.
fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn seconds(vars: &HashMap<String, String>, name: &str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(vars, name, default).map(Duration::from_secs)
}

fn expiration_policies(
    vars: &HashMap<String, String>,
) -> Result<TicketExpirationPolicies, ConfigError> {
    let session = ExpirationPolicy::TicketGrantingTicket {
        max_time_to_live: seconds(vars, "CAS_TGT_MAX_TIME_TO_LIVE_SECONDS", 28_800)?,
        time_to_kill: seconds(vars, "CAS_TGT_TIME_TO_KILL_SECONDS", 7_200)?,
    };
    let ticket_granting = match vars.get("CAS_TGT_REMEMBER_ME_TIME_TO_KILL_SECONDS") {
        Some(_) => ExpirationPolicy::RememberMeDelegating {
            remember_me: Box::new(ExpirationPolicy::HardTimeout {
                time_to_kill: seconds(vars, "CAS_TGT_REMEMBER_ME_TIME_TO_KILL_SECONDS", 0)?,
            }),
            session: Box::new(session),
        },
        None => session,
    };

    let service = ExpirationPolicy::MultiTimeUseOrTimeout {
        number_of_uses: parse_or(vars, "CAS_ST_NUMBER_OF_USES", 1)?,
        time_to_kill: seconds(vars, "CAS_ST_TIME_TO_KILL_SECONDS", 10)?,
    };
    let proxy = ExpirationPolicy::MultiTimeUseOrTimeout {
        number_of_uses: parse_or(vars, "CAS_PT_NUMBER_OF_USES", 1)?,
        time_to_kill: seconds(vars, "CAS_PT_TIME_TO_KILL_SECONDS", 10)?,
    };
    let proxy_granting = ExpirationPolicy::TicketGrantingTicket {
        max_time_to_live: seconds(vars, "CAS_PGT_MAX_TIME_TO_LIVE_SECONDS", 28_800)?,
        time_to_kill: seconds(vars, "CAS_PGT_TIME_TO_KILL_SECONDS", 7_200)?,
    };

    Ok(TicketExpirationPolicies {
        ticket_granting,
        service,
        proxy,
        proxy_granting,
    })
}

/// Parse comma-separated `user::password` pairs. Empty input yields no users.
fn parse_accept_users(raw: &str) -> Result<Vec<(String, SecretString)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(ACCEPT_USERS_SEPARATOR) {
            Some((user, password)) if !user.trim().is_empty() && !password.is_empty() => Ok((
                user.trim().to_string(),
                SecretString::from(password.to_string()),
            )),
            // Never echo the entry, it carries a password
            _ => Err(invalid(
                "CAS_ACCEPT_USERS",
                "expected comma-separated user::password pairs",
            )),
        })
        .collect()
}

/// Parse comma-separated `principal::sha256-hex` pairs.
fn parse_token_digests(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (principal, digest) = entry
                .split_once(ACCEPT_USERS_SEPARATOR)
                .filter(|(p, _)| !p.trim().is_empty())
                .ok_or_else(|| {
                    invalid("CAS_TOKEN_DIGESTS", "expected comma-separated principal::digest pairs")
                })?;
            let digest = digest.trim().to_ascii_lowercase();
            if digest.len() != 64 || hex::decode(&digest).is_err() {
                return Err(invalid(
                    "CAS_TOKEN_DIGESTS",
                    format!("digest for '{}' is not 64 hex characters", principal.trim()),
                ));
            }
            Ok((principal.trim().to_string(), digest))
        })
        .collect()
}
