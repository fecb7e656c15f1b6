//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Per-type object ceilings used by the cardinality stage. Converters may
/// carry their own override; everything else falls back to the default.
#[derive(Debug, Clone)]
pub struct Limits {
    pub default_max_objects: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            default_max_objects: 100_000,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// JWT secret for token verification
    pub jwt_secret: String,

    /// Maximum query depth accepted by the depth guard
    pub depth_ceiling: usize,

    /// Rate-limit window in seconds (fixed window)
    pub rate_window_secs: u64,

    /// Rate-limit ceiling for account-keyed callers
    pub rate_ceiling: u64,

    /// Rate-limit ceiling for address-keyed (anonymous) callers.
    /// Typically stricter than the account-keyed ceiling.
    pub rate_ceiling_by_address: u64,

    /// Default per-type object ceiling for the cardinality stage
    pub limits: Limits,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // JWT_SECRET is always required in production; generate a throwaway
        // one for development so the server can boot without a .env file.
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            std::time::SystemTime::now().hash(&mut hasher);
            format!("dev-secret-{}", hasher.finish())
        });

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            jwt_secret,

            depth_ceiling: env::var("QUERY_DEPTH_CEILING")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("Invalid QUERY_DEPTH_CEILING")?,

            rate_window_secs: env::var("RATE_WINDOW_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid RATE_WINDOW_SECS")?,

            rate_ceiling: env::var("RATE_CEILING")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid RATE_CEILING")?,

            rate_ceiling_by_address: env::var("RATE_CEILING_BY_ADDRESS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .context("Invalid RATE_CEILING_BY_ADDRESS")?,

            limits: Limits {
                default_max_objects: env::var("DEFAULT_MAX_OBJECTS")
                    .unwrap_or_else(|_| "100000".to_string())
                    .parse()
                    .context("Invalid DEFAULT_MAX_OBJECTS")?,
            },
        })
    }
}
