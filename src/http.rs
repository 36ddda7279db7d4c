use crate::config::env_u64;
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Shared outbound client for the product backend and the geocoder.
/// Nominatim refuses requests without a user agent.
pub fn build_client() -> Client {
    let timeout = env_u64("HTTP_TIMEOUT_SECS").unwrap_or(30);
    let connect = env_u64("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5);
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .gzip(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}
