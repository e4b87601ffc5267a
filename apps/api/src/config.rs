//! # Application Configuration
//!
//! Environment-driven configuration with development defaults. Provider
//! credentials are optional: a rail without credentials runs in its mock /
//! fail-closed mode, so a bare `.env` still boots a working dev server.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use tiketa_payments::{CbeBirrConfig, ChapaConfig, TelebirrConfig};

/// Full configuration of the API process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket the HTTP server binds.
    pub bind_addr: SocketAddr,
    /// SQLite database file path.
    pub database_path: String,
    /// Public base URL of this API (callback URLs are built from it).
    pub api_base_url: String,
    /// Where buyers land after checkout.
    pub frontend_url: String,
    /// Service fee on ticket orders, basis points.
    pub ticket_fee_bps: u32,
    /// Service fee on shop orders, basis points.
    pub shop_fee_bps: u32,
    /// How long an order may sit PENDING before the reaper cancels it.
    pub pending_order_ttl: Duration,
    /// How often the reaper runs.
    pub expiry_sweep_interval: Duration,

    pub chapa: ChapaConfig,
    pub telebirr: TelebirrConfig,
    pub cbe_birr: CbeBirrConfig,
}

impl AppConfig {
    /// Loads configuration from the environment.
    pub fn from_env() -> Self {
        let bind_addr = var_or("BIND_ADDR", "0.0.0.0:3000")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3000)));

        AppConfig {
            bind_addr,
            database_path: var_or("DATABASE_PATH", "./tiketa.db"),
            api_base_url: var_or("API_URL", &format!("http://localhost:{}", bind_addr.port())),
            frontend_url: var_or("FRONTEND_URL", "http://localhost:8081"),
            ticket_fee_bps: parse_var("TICKET_FEE_BPS", tiketa_core::DEFAULT_TICKET_FEE_BPS),
            shop_fee_bps: parse_var("SHOP_FEE_BPS", tiketa_core::DEFAULT_SHOP_FEE_BPS),
            pending_order_ttl: Duration::from_secs(
                parse_var("ORDER_PENDING_TTL_MINUTES", 30u64) * 60,
            ),
            expiry_sweep_interval: Duration::from_secs(
                parse_var("ORDER_EXPIRY_SWEEP_SECONDS", 60u64),
            ),
            chapa: ChapaConfig {
                secret_key: var_or("CHAPA_SECRET_KEY", ""),
                api_url: var_or("CHAPA_API_URL", "https://api.chapa.co/v1"),
            },
            telebirr: TelebirrConfig {
                merchant_app_id: var_or("TELEBIRR_MERCHANT_APP_ID", ""),
                fabric_app_id: var_or("TELEBIRR_FABRIC_APP_ID", ""),
                app_secret: var_or("TELEBIRR_APP_SECRET", ""),
                short_code: var_or("TELEBIRR_SHORT_CODE", ""),
                private_key: var_or("TELEBIRR_PRIVATE_KEY", ""),
                public_key: var_or("TELEBIRR_PUBLIC_KEY", ""),
                ..TelebirrConfig::default()
            },
            cbe_birr: CbeBirrConfig {
                merchant_id: var_or("CBE_MERCHANT_ID", ""),
                api_key: var_or("CBE_API_KEY", ""),
                api_url: var_or("CBE_API_URL", ""),
            },
        }
    }

    /// Callback URL for one provider, e.g. `/api/payments/callback/chapa`.
    pub fn callback_url(&self, provider: &str) -> String {
        format!("{}/api/payments/callback/{provider}", self.api_base_url)
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_boot_without_env() {
        let config = AppConfig::from_env();
        assert_eq!(config.pending_order_ttl.as_secs() % 60, 0);
        assert!(config.api_base_url.starts_with("http"));
        assert_eq!(
            config.callback_url("chapa"),
            format!("{}/api/payments/callback/chapa", config.api_base_url)
        );
    }
}
