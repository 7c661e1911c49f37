//! CLI argument parsing, validation, and startup helpers.

use std::num::NonZeroU32;
use std::sync::Arc;

use crate::ServerConfig;
use crate::db::Database;
use crate::password::{DEFAULT_COST, MIN_PASSWORD_LENGTH, hash_password};
use crate::rate_limit::RateLimitConfig;
use crate::token::{DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS, TokenConfig};
use clap::Parser;
use tracing::{error, info};

/// Environment variable holding the password for `--create-user`.
pub const PASSWORD_ENV: &str = "RESPLAN_PASSWORD";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "resplan",
    about = "School resource planning API with bearer token authentication"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "RESPLAN_PORT")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "resplan.db", env = "RESPLAN_DATABASE")]
    pub database: String,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_ACCESS_TOKEN_TTL_SECS, value_parser = validate_ttl)]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_TOKEN_TTL_SECS, value_parser = validate_ttl)]
    pub refresh_token_ttl: u64,

    /// Login attempts allowed per client IP per minute
    #[arg(long, default_value_t = crate::DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE)]
    pub login_rate_limit: NonZeroU32,

    /// Use the X-Forwarded-For header for client IPs (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Create (or reset the password of) a user on startup. The password is read from RESPLAN_PASSWORD
    #[arg(long, value_name = "LOGIN")]
    pub create_user: Option<String>,

    /// Display name for --create-user
    #[arg(long, requires = "create_user")]
    pub display_name: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn validate_ttl(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("Lifetime must be a number of seconds: {}", s))?;
    if secs == 0 {
        return Err("Lifetime must be at least one second".to_string());
    }
    Ok(secs)
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the password for `--create-user` from the environment.
/// Returns None and logs an error if it is missing or too short.
pub fn load_password() -> Option<String> {
    let Ok(password) = std::env::var(PASSWORD_ENV) else {
        error!("{} is required when using --create-user", PASSWORD_ENV);
        return None;
    };

    // Clear the environment variable to prevent leaking
    // SAFETY: We're single-threaded at this point during startup,
    // and no other code is reading this environment variable.
    unsafe { std::env::remove_var(PASSWORD_ENV) };

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        error!(
            "Password is shorter than {} characters. Use a longer password",
            MIN_PASSWORD_LENGTH
        );
        return None;
    }

    Some(password)
}

/// Handle the --create-user flag: create the user, or reset the password
/// when the login already exists. Returns false on failure.
pub async fn handle_create_user(
    db: &Database,
    login: &str,
    display_name: Option<&str>,
    password: String,
) -> bool {
    let login = login.trim();
    if login.is_empty() {
        error!("Login cannot be empty");
        return false;
    }

    let hash = match tokio::task::spawn_blocking(move || hash_password(&password, DEFAULT_COST))
        .await
    {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => {
            error!(error = %e, "Failed to hash password");
            return false;
        }
        Err(e) => {
            error!(error = %e, "Password hashing task failed");
            return false;
        }
    };

    match db.users().get_by_login(login).await {
        Ok(Some(existing)) => match db.users().set_password_hash(existing.id, &hash).await {
            Ok(_) => {
                info!(login = %existing.login, "Password reset for existing user");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to reset password");
                false
            }
        },
        Ok(None) => match db
            .users()
            .create(login, display_name.unwrap_or(login), &hash)
            .await
        {
            Ok(_) => {
                info!(login = %login, "User created");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to create user");
                false
            }
        },
        Err(e) => {
            error!(error = %e, "Failed to check for existing user");
            false
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database) -> ServerConfig {
    ServerConfig {
        db,
        tokens: TokenConfig::new(args.access_token_ttl, args.refresh_token_ttl),
        rate_limit: Arc::new(RateLimitConfig::new(
            args.login_rate_limit,
            args.trust_forwarded_for,
        )),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ttl() {
        assert_eq!(validate_ttl("60"), Ok(60));
        assert!(validate_ttl("0").is_err());
        assert!(validate_ttl("-5").is_err());
        assert!(validate_ttl("soon").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["resplan"]);
        assert_eq!(args.port, 8000);
        assert_eq!(args.access_token_ttl, DEFAULT_ACCESS_TOKEN_TTL_SECS);
        assert_eq!(args.refresh_token_ttl, DEFAULT_REFRESH_TOKEN_TTL_SECS);
        assert_eq!(args.login_rate_limit.get(), 10);
        assert!(args.create_user.is_none());
    }

    #[test]
    fn test_display_name_requires_create_user() {
        let result = Args::try_parse_from(["resplan", "--display-name", "Alice"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_user_then_reset_password() {
        let db = Database::open(":memory:").await.unwrap();

        assert!(handle_create_user(&db, "alice", Some("Alice"), "first-password".into()).await);
        let first = db.users().get_by_login("alice").await.unwrap().unwrap();
        assert_eq!(first.display_name, "Alice");

        assert!(handle_create_user(&db, "alice", None, "second-password".into()).await);
        let second = db.users().get_by_login("alice").await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert!(crate::password::verify_password("second-password", &second.password_hash));
    }
}
