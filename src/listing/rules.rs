use crate::config::{env_u64, env_usize, parse_env_bool};
use serde::Serialize;
use tracing::{info, warn};

pub const MAX_IMAGES: usize = 8;
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Thresholds every wizard gate and submission check reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingRules {
    pub profile: &'static str,
    pub min_images: usize,
    pub max_images: usize,
    pub max_file_size: u64,
    pub title_max_chars: Option<usize>,
    pub description_min_chars: Option<usize>,
    pub description_max_chars: Option<usize>,
    pub buying_requires_premium: bool,
}

impl Default for ListingRules {
    fn default() -> Self {
        Self::standard()
    }
}

impl ListingRules {
    pub fn standard() -> Self {
        Self {
            profile: "standard",
            min_images: 3,
            max_images: MAX_IMAGES,
            max_file_size: MAX_FILE_SIZE,
            title_max_chars: None,
            description_min_chars: None,
            description_max_chars: Some(800),
            buying_requires_premium: false,
        }
    }

    pub fn strict() -> Self {
        Self {
            profile: "strict",
            min_images: 3,
            max_images: MAX_IMAGES,
            max_file_size: MAX_FILE_SIZE,
            title_max_chars: Some(15),
            description_min_chars: Some(50),
            description_max_chars: Some(500),
            buying_requires_premium: true,
        }
    }

    pub fn from_env() -> Self {
        let mut rules = match std::env::var("LISTING_RULES")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str()
        {
            "" | "standard" => Self::standard(),
            "strict" => Self::strict(),
            other => {
                warn!(
                    target = "barter.wizard",
                    "unknown LISTING_RULES profile `{other}`; using standard"
                );
                Self::standard()
            }
        };

        if let Some(max) = env_usize("MAX_IMAGES").filter(|v| *v >= 1) {
            rules.max_images = max;
        }
        if let Some(min) = env_usize("MIN_IMAGES") {
            rules.min_images = min;
        }
        if let Some(bytes) = env_u64("MAX_FILE_SIZE_BYTES").filter(|v| *v > 0) {
            rules.max_file_size = bytes;
        }
        if let Some(flag) = parse_env_bool("BUYING_REQUIRES_PREMIUM") {
            rules.buying_requires_premium = flag;
        }
        if rules.min_images > rules.max_images {
            warn!(
                target = "barter.wizard",
                min_images = rules.min_images,
                max_images = rules.max_images,
                "MIN_IMAGES above MAX_IMAGES; clamping"
            );
            rules.min_images = rules.max_images;
        }

        info!(
            target = "barter.wizard",
            profile = rules.profile,
            min_images = rules.min_images,
            max_images = rules.max_images,
            max_file_size = rules.max_file_size,
            "listing rules loaded"
        );
        rules
    }

    pub fn title_within_bounds(&self, title: &str) -> bool {
        let len = title.trim().chars().count();
        len > 0 && self.title_max_chars.is_none_or(|max| len <= max)
    }

    pub fn description_within_bounds(&self, description: &str) -> bool {
        let len = description.trim().chars().count();
        len > 0
            && self.description_min_chars.is_none_or(|min| len >= min)
            && self.description_max_chars.is_none_or(|max| len <= max)
    }
}
