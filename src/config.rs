use once_cell::sync::Lazy;
use std::env;

pub static PRODUCT_API_ROOT: Lazy<String> = Lazy::new(|| {
    env::var("PRODUCT_API_ROOT")
        .unwrap_or_else(|_| "http://localhost:4000/api".to_string())
        .trim_end_matches('/')
        .to_string()
});

pub static PRODUCT_API_TOKEN: Lazy<Option<String>> = Lazy::new(|| {
    env::var("PRODUCT_API_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
});

pub static GEOCODER_URL: Lazy<String> = Lazy::new(|| {
    env::var("GEOCODER_URL")
        .unwrap_or_else(|_| "https://nominatim.openstreetmap.org/reverse".to_string())
});

/// Where the client lands after a listing is created.
pub static DASHBOARD_PATH: Lazy<String> =
    Lazy::new(|| env::var("DASHBOARD_PATH").unwrap_or_else(|_| "/dashboard".to_string()));

pub fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.trim().parse::<usize>().ok())
}

pub fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

pub fn parse_env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
