//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` switches the service to the non-persistent in-memory store.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub cors_origin: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_model: String,
    pub deepseek_model: String,
    pub perplexity_model: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    /// Accounts created with one of these e-mails get the admin role.
    pub admin_emails: Vec<String>,
}

/// Reads an optional variable, treating an empty value as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    optional_var(name).unwrap_or_else(|| default.to_string())
}

/// Splits a comma-separated e-mail list, normalized to lower case.
pub fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = optional_var("DATABASE_URL");

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:5173");

        // --- Load API Keys (as optional) ---
        let openai_api_key = optional_var("OPENAI_API_KEY");
        let anthropic_api_key = optional_var("ANTHROPIC_API_KEY");
        let deepseek_api_key = optional_var("DEEPSEEK_API_KEY");
        let perplexity_api_key = optional_var("PERPLEXITY_API_KEY");

        // --- Load Adapter-specific Settings ---
        let openai_model = var_or("OPENAI_MODEL", "gpt-4o");
        let anthropic_model = var_or("ANTHROPIC_MODEL", "claude-3-5-sonnet-latest");
        let deepseek_model = var_or("DEEPSEEK_MODEL", "deepseek-chat");
        let perplexity_model = var_or("PERPLEXITY_MODEL", "sonar");

        // --- Payments ---
        let stripe_secret_key = optional_var("STRIPE_SECRET_KEY");
        let stripe_webhook_secret = optional_var("STRIPE_WEBHOOK_SECRET");
        if stripe_secret_key.is_some() && stripe_webhook_secret.is_none() {
            return Err(ConfigError::MissingVar("STRIPE_WEBHOOK_SECRET".to_string()));
        }

        let admin_emails = optional_var("ADMIN_EMAILS")
            .map(|raw| parse_email_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            openai_api_key,
            anthropic_api_key,
            deepseek_api_key,
            perplexity_api_key,
            openai_model,
            anthropic_model,
            deepseek_model,
            perplexity_model,
            stripe_secret_key,
            stripe_webhook_secret,
            admin_emails,
        })
    }

    /// Whether an account created with `email` should be an admin.
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails.iter().any(|admin| *admin == email)
    }
}

impl Default for Config {
    /// Local-only settings: in-memory store, no providers, no payments.
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_url: None,
            log_level: Level::INFO,
            cors_origin: "http://localhost:5173".to_string(),
            openai_api_key: None,
            anthropic_api_key: None,
            deepseek_api_key: None,
            perplexity_api_key: None,
            openai_model: "gpt-4o".to_string(),
            anthropic_model: "claude-3-5-sonnet-latest".to_string(),
            deepseek_model: "deepseek-chat".to_string(),
            perplexity_model: "sonar".to_string(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            admin_emails: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_lists_are_trimmed_and_lowercased() {
        assert_eq!(
            parse_email_list(" Admin@Example.com, ,ops@example.com "),
            vec!["admin@example.com".to_string(), "ops@example.com".to_string()]
        );
    }

    #[test]
    fn admin_check_ignores_case() {
        let config = Config {
            admin_emails: vec!["admin@example.com".to_string()],
            ..Config::default()
        };
        assert!(config.is_admin_email("ADMIN@example.com"));
        assert!(!config.is_admin_email("someone@example.com"));
    }
}
