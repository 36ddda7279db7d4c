use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;

/// How the owner is willing to part with the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMode {
    #[default]
    BarterOnly,
    BuyOnly,
    Both,
}

impl ExchangeMode {
    /// Maps the two legacy toggles onto a mode. Buying off always means barter only;
    /// both toggles on means the item accepts barter and cash.
    pub fn from_flags(allow_buying: bool, barter_only: bool) -> Self {
        match (allow_buying, barter_only) {
            (false, _) => ExchangeMode::BarterOnly,
            (true, true) => ExchangeMode::Both,
            (true, false) => ExchangeMode::BuyOnly,
        }
    }

    pub fn allow_buying(self) -> bool {
        self != ExchangeMode::BarterOnly
    }

    pub fn barter_only(self) -> bool {
        self != ExchangeMode::BuyOnly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    New,
    #[serde(rename = "Like-New")]
    LikeNew,
    Used,
    Fair,
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::New,
        Condition::LikeNew,
        Condition::Used,
        Condition::Fair,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Condition::New => "New",
            Condition::LikeNew => "Like-New",
            Condition::Used => "Used",
            Condition::Fair => "Fair",
        }
    }

    pub fn from_label(input: &str) -> Option<Self> {
        let wanted = normalize_label(input);
        Self::ALL
            .into_iter()
            .find(|c| normalize_label(c.label()) == wanted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Electronics,
    Furniture,
    Clothing,
    Books,
    Sports,
    Toys,
    #[serde(rename = "Home & Garden")]
    HomeAndGarden,
    Vehicles,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Electronics,
        Category::Furniture,
        Category::Clothing,
        Category::Books,
        Category::Sports,
        Category::Toys,
        Category::HomeAndGarden,
        Category::Vehicles,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Electronics => "Electronics",
            Category::Furniture => "Furniture",
            Category::Clothing => "Clothing",
            Category::Books => "Books",
            Category::Sports => "Sports",
            Category::Toys => "Toys",
            Category::HomeAndGarden => "Home & Garden",
            Category::Vehicles => "Vehicles",
            Category::Other => "Other",
        }
    }

    pub fn from_label(input: &str) -> Option<Self> {
        let wanted = normalize_label(input);
        Self::ALL
            .into_iter()
            .find(|c| normalize_label(c.label()) == wanted)
    }
}

fn normalize_label(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// The unsaved product record being composed in the wizard.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Draft {
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub premium: bool,
    pub exchange_mode: ExchangeMode,
    pub location: Option<String>,
    pub condition: Option<Condition>,
    pub category: Option<Category>,
}

impl Draft {
    pub fn allow_buying(&self) -> bool {
        self.exchange_mode.allow_buying()
    }

    pub fn barter_only(&self) -> bool {
        self.exchange_mode.barter_only()
    }

    pub fn has_valid_price(&self) -> bool {
        self.price.is_some_and(|p| p.is_finite() && p > 0.0)
    }
}

/// One field assignment coming from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldUpdate {
    Title(String),
    Description(String),
    Price(Option<f64>),
    Premium(bool),
    AllowBuying(bool),
    BarterOnly(bool),
    ExchangeMode(ExchangeMode),
    Location(Option<String>),
    Condition(Option<String>),
    Category(Option<String>),
}

impl FieldUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            FieldUpdate::Title(_) => "title",
            FieldUpdate::Description(_) => "description",
            FieldUpdate::Price(_) => "price",
            FieldUpdate::Premium(_) => "premium",
            FieldUpdate::AllowBuying(_) => "allow_buying",
            FieldUpdate::BarterOnly(_) => "barter_only",
            FieldUpdate::ExchangeMode(_) => "exchange_mode",
            FieldUpdate::Location(_) => "location",
            FieldUpdate::Condition(_) => "condition",
            FieldUpdate::Category(_) => "category",
        }
    }

    /// Folds `allow_buying` and `barter_only` sent in the same batch into one
    /// `exchange_mode` update, so the outcome does not depend on their order.
    /// The last value of each flag wins. Batches carrying only one of the two
    /// are returned unchanged.
    pub fn coalesce_toggles(updates: Vec<FieldUpdate>) -> Vec<FieldUpdate> {
        let allow = updates.iter().rev().find_map(|u| match u {
            FieldUpdate::AllowBuying(v) => Some(*v),
            _ => None,
        });
        let barter = updates.iter().rev().find_map(|u| match u {
            FieldUpdate::BarterOnly(v) => Some(*v),
            _ => None,
        });
        let (Some(allow), Some(barter)) = (allow, barter) else {
            return updates;
        };

        let mut merged = Some(FieldUpdate::ExchangeMode(ExchangeMode::from_flags(
            allow, barter,
        )));
        updates
            .into_iter()
            .filter_map(|update| match update {
                FieldUpdate::AllowBuying(_) | FieldUpdate::BarterOnly(_) => merged.take(),
                other => Some(other),
            })
            .collect()
    }
}

/// Why a field update was not applied. The draft is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FieldWarning {
    FieldTooLong { field: &'static str, max: usize },
    PriceRequiresBuying,
    BarterRequiredWithoutBuying,
    PremiumRequired { field: &'static str },
    InvalidValue { field: &'static str, value: String },
}

impl fmt::Display for FieldWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldWarning::FieldTooLong { field, max } => {
                write!(f, "{field} cannot exceed {max} characters")
            }
            FieldWarning::PriceRequiresBuying => {
                write!(f, "enable buying before setting a price")
            }
            FieldWarning::BarterRequiredWithoutBuying => {
                write!(f, "barter stays on while buying is disabled")
            }
            FieldWarning::PremiumRequired { field } => {
                write!(f, "{field} is only available to premium members")
            }
            FieldWarning::InvalidValue { field, value } => {
                write!(f, "`{value}` is not a valid {field}")
            }
        }
    }
}
