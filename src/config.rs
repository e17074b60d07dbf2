//! Service configuration, loaded from the environment (optionally via a
//! local `.env` file, via `dotenvy`). Builder
//! methods follow a `ConnectionConfig`-style builder.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    /// Server-wide cap applied on top of a slot's own `max_blob_size`,
    /// in case an attribute declares no cap at all.
    pub max_blob_size_default: u64,
    /// Maximum page size `limit` may request (server-side cap).
    pub max_page_size: usize,
    pub default_page_size: usize,
    /// Role name that grants admin capabilities via `X-Roles`.
    pub admin_role: String,
    pub request_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            listen_addr: std::env::var("GLAREDB_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:9494".to_string()),
            max_blob_size_default: std::env::var("GLAREDB_MAX_BLOB_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024 * 1024 * 1024),
            max_page_size: std::env::var("GLAREDB_MAX_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            default_page_size: std::env::var("GLAREDB_DEFAULT_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25),
            admin_role: std::env::var("GLAREDB_ADMIN_ROLE").unwrap_or_else(|_| "admin".to_string()),
            request_deadline: Duration::from_secs(
                std::env::var("GLAREDB_REQUEST_DEADLINE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9494".to_string(),
            max_blob_size_default: 1024 * 1024 * 1024,
            max_page_size: 1000,
            default_page_size: 25,
            admin_role: "admin".to_string(),
            request_deadline: Duration::from_secs(60),
        }
    }
}
