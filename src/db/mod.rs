mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::billing::{CafeBazaarClient, MyketClient, ZarinPalClient};
use crate::config::Config;
use crate::money::Currency;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public base URL, used to build the ZarinPal callback URL
    pub base_url: String,
    /// Currency all amounts are reported in
    pub response_currency: Currency,
    pub cafebazaar: CafeBazaarClient,
    pub myket: MyketClient,
    pub zarinpal: ZarinPalClient,
}

impl AppState {
    pub fn from_config(config: &Config, db: DbPool) -> Self {
        let http = crate::billing::http_client(config.http_timeout_secs);
        Self {
            db,
            base_url: config.base_url.clone(),
            response_currency: config.response_currency,
            cafebazaar: CafeBazaarClient::new(http.clone(), &config.cafebazaar),
            myket: MyketClient::new(http.clone(), &config.myket),
            zarinpal: ZarinPalClient::new(http, &config.zarinpal),
        }
    }
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    Pool::builder().max_size(10).build(manager)
}
