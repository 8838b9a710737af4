use std::env;
use std::str::FromStr;

use crate::money::Currency;

/// Requests-per-minute for the rate-limited route tiers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Endpoints that call a billing platform (verify, purchase initiation).
    pub strict_rpm: u32,
    /// Everything else under /api/v1.
    pub standard_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strict_rpm: 10,
            standard_rpm: 60,
        }
    }
}

/// CafeBazaar Pardakht API settings. Credentials are optional so the server can
/// boot without them; verification then answers 503.
#[derive(Debug, Clone)]
pub struct CafeBazaarConfig {
    pub api_base: String,
    pub package_name: Option<String>,
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MyketConfig {
    pub api_base: String,
    pub package_name: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ZarinPalConfig {
    pub api_base: String,
    pub startpay_base: String,
    pub merchant_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub response_currency: Currency,
    pub http_timeout_secs: u64,
    pub rate_limit: RateLimitConfig,
    pub pending_payment_ttl_hours: i64,
    pub maintenance_interval_secs: u64,
    pub cafebazaar: CafeBazaarConfig,
    pub myket: MyketConfig,
    pub zarinpal: ZarinPalConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Empty strings count as unset so `FOO=` in a .env file disables a store.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Requests per minute for a limiter tier. Zero would stall the limiter, so
/// the floor is one request per minute.
fn rpm_or(value: Option<String>, default: u32) -> u32 {
    parse_or(value, default).max(1)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    parse_or(env::var(key).ok(), default)
}

fn env_opt(key: &str) -> Option<String> {
    non_empty(env::var(key).ok())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("TALEBILL_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env_or("HOST", "127.0.0.1");
        let port: u16 = env_parse("PORT", 3000);
        let base_url = env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let response_currency = env::var("RESPONSE_CURRENCY")
            .ok()
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(Currency::Irr);

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            strict_rpm: rpm_or(env::var("RATE_LIMIT_STRICT_RPM").ok(), defaults.strict_rpm),
            standard_rpm: rpm_or(env::var("RATE_LIMIT_STANDARD_RPM").ok(), defaults.standard_rpm),
        };

        Self {
            host,
            port,
            database_path: env_or("DATABASE_PATH", "talebill.db"),
            base_url,
            dev_mode,
            response_currency,
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 15),
            rate_limit,
            pending_payment_ttl_hours: env_parse("PENDING_PAYMENT_TTL_HOURS", 24),
            maintenance_interval_secs: env_parse("MAINTENANCE_INTERVAL_SECS", 300),
            cafebazaar: CafeBazaarConfig {
                api_base: env_or(
                    "CAFEBAZAAR_API_BASE",
                    "https://pardakht.cafebazaar.ir/devapi/v2",
                ),
                package_name: env_opt("CAFEBAZAAR_PACKAGE_NAME"),
                api_secret: env_opt("CAFEBAZAAR_API_SECRET"),
            },
            myket: MyketConfig {
                api_base: env_or("MYKET_API_BASE", "https://developer.myket.ir"),
                package_name: env_opt("MYKET_PACKAGE_NAME"),
                access_token: env_opt("MYKET_ACCESS_TOKEN"),
            },
            zarinpal: ZarinPalConfig {
                api_base: env_or("ZARINPAL_API_BASE", "https://api.zarinpal.com/pg/v4"),
                startpay_base: env_or(
                    "ZARINPAL_STARTPAY_BASE",
                    "https://www.zarinpal.com/pg/StartPay",
                ),
                merchant_id: env_opt("ZARINPAL_MERCHANT_ID"),
            },
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
