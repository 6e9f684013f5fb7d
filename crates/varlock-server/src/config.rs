//! Server configuration for Varlock.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `VARLOCK_*` environment variables.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Master key as 64 hex characters (32 bytes). Wraps the data keys at
    /// rest and decrypts legacy (pre-envelope) payloads.
    pub master_key_hex: String,
    /// Shared secret for the request-integrity perimeter (HMAC-SHA256).
    pub hmac_secret: String,
    /// Shared secret gating the key-administration endpoints. When unset,
    /// those endpoints are disabled.
    pub admin_secret: Option<String>,
    /// URL shown to CLI users for entering their device code.
    pub verification_uri: String,
    /// Seconds the active-key lookup is cached before refetching.
    pub key_cache_ttl_secs: u64,
    /// Read-repair rotation worker count.
    pub rotation_workers: usize,
    /// Read-repair rotation queue depth.
    pub rotation_queue_depth: usize,
    /// Maximum secrets rewritten per scavenger batch.
    pub scavenge_batch_size: i64,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (binds to `0.0.0.0`)
    /// - `VARLOCK_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `DATABASE_URL` — PostgreSQL connection string (default: `postgres://localhost/varlock`)
    /// - `VARLOCK_LOG_LEVEL` — log filter (default: `info`)
    /// - `VARLOCK_MASTER_KEY` — 64 hex chars of master key material (required in production)
    /// - `VARLOCK_HMAC_SECRET` — request-integrity perimeter secret
    /// - `VARLOCK_ADMIN_SECRET` — enables `/v1/admin/keys/*` when set
    /// - `VARLOCK_VERIFICATION_URI` — device-code entry page shown to CLIs
    /// - `VARLOCK_KEY_CACHE_TTL` — active-key cache TTL in seconds (default: `60`)
    /// - `VARLOCK_ROTATION_WORKERS` — read-repair worker count (default: `2`)
    /// - `VARLOCK_ROTATION_QUEUE` — read-repair queue depth (default: `256`)
    /// - `VARLOCK_SCAVENGE_BATCH` — secrets per scavenger batch (default: `50`)
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = if let Ok(addr) = std::env::var("VARLOCK_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8300)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8300);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8300))
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/varlock".to_owned());

        let log_level = std::env::var("VARLOCK_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let master_key_hex = std::env::var("VARLOCK_MASTER_KEY").unwrap_or_default();

        let hmac_secret = std::env::var("VARLOCK_HMAC_SECRET").unwrap_or_default();

        let admin_secret = std::env::var("VARLOCK_ADMIN_SECRET").ok();

        let verification_uri = std::env::var("VARLOCK_VERIFICATION_URI")
            .unwrap_or_else(|_| "http://localhost:3000/auth/device".to_owned());

        let key_cache_ttl_secs = std::env::var("VARLOCK_KEY_CACHE_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let rotation_workers = std::env::var("VARLOCK_ROTATION_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let rotation_queue_depth = std::env::var("VARLOCK_ROTATION_QUEUE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        let scavenge_batch_size = std::env::var("VARLOCK_SCAVENGE_BATCH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        Self {
            bind_addr,
            database_url,
            log_level,
            master_key_hex,
            hmac_secret,
            admin_secret,
            verification_uri,
            key_cache_ttl_secs,
            rotation_workers,
            rotation_queue_depth,
            scavenge_batch_size,
        }
    }

    /// Decode the configured master key.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is missing or not exactly 64 hex
    /// characters (32 bytes).
    pub fn master_key(&self) -> Result<[u8; 32], String> {
        if self.master_key_hex.len() != 64 {
            return Err(format!(
                "VARLOCK_MASTER_KEY must be exactly 64 hex characters, got {}",
                self.master_key_hex.len()
            ));
        }
        let bytes = hex::decode(&self.master_key_hex)
            .map_err(|e| format!("VARLOCK_MASTER_KEY is not valid hex: {e}"))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config_with_key(key: &str) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8300)),
            database_url: String::new(),
            log_level: "info".to_owned(),
            master_key_hex: key.to_owned(),
            hmac_secret: String::new(),
            admin_secret: None,
            verification_uri: String::new(),
            key_cache_ttl_secs: 60,
            rotation_workers: 2,
            rotation_queue_depth: 256,
            scavenge_batch_size: 50,
        }
    }

    #[test]
    fn master_key_decodes_64_hex_chars() {
        let config = config_with_key(&"ab".repeat(32));
        assert_eq!(config.master_key().unwrap(), [0xab; 32]);
    }

    #[test]
    fn master_key_rejects_wrong_length() {
        assert!(config_with_key("abcd").master_key().is_err());
        assert!(config_with_key("").master_key().is_err());
    }

    #[test]
    fn master_key_rejects_non_hex() {
        assert!(config_with_key(&"zz".repeat(32)).master_key().is_err());
    }
}
