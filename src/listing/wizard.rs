use crate::listing::draft::{Category, Condition, Draft, ExchangeMode, FieldUpdate, FieldWarning};
use crate::listing::rules::ListingRules;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Photos,
    BasicInfo,
    ExchangeOptions,
    Price,
    Review,
}

impl WizardStep {
    pub const FIRST: WizardStep = WizardStep::Photos;
    pub const ALL: [WizardStep; 5] = [
        WizardStep::Photos,
        WizardStep::BasicInfo,
        WizardStep::ExchangeOptions,
        WizardStep::Price,
        WizardStep::Review,
    ];

    pub fn number(self) -> u8 {
        match self {
            WizardStep::Photos => 1,
            WizardStep::BasicInfo => 2,
            WizardStep::ExchangeOptions => 3,
            WizardStep::Price => 4,
            WizardStep::Review => 5,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(WizardStep::Photos),
            2 => Some(WizardStep::BasicInfo),
            3 => Some(WizardStep::ExchangeOptions),
            4 => Some(WizardStep::Price),
            5 => Some(WizardStep::Review),
            _ => None,
        }
    }

    fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    fn prev(self) -> Option<Self> {
        self.number().checked_sub(1).and_then(Self::from_number)
    }
}

/// Step index plus the draft it gates. Image count is passed in because the
/// image set lives beside the wizard and is mutated by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct WizardStateMachine {
    step: WizardStep,
    draft: Draft,
    rules: ListingRules,
    premium_user: bool,
}

impl WizardStateMachine {
    pub fn new(rules: ListingRules, premium_user: bool) -> Self {
        Self {
            step: WizardStep::FIRST,
            draft: Draft::default(),
            rules,
            premium_user,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn rules(&self) -> &ListingRules {
        &self.rules
    }

    pub fn can_proceed(&self, step: WizardStep, image_count: usize) -> bool {
        match step {
            WizardStep::Photos => image_count >= self.rules.min_images,
            WizardStep::BasicInfo => {
                self.rules.title_within_bounds(&self.draft.title)
                    && self.rules.description_within_bounds(&self.draft.description)
            }
            WizardStep::ExchangeOptions => true,
            WizardStep::Price => !self.draft.allow_buying() || self.draft.has_valid_price(),
            WizardStep::Review => true,
        }
    }

    /// Moves forward one step when the current gate holds. Returns whether it moved.
    pub fn advance(&mut self, image_count: usize) -> bool {
        let Some(next) = self.step.next() else {
            return false;
        };
        if !self.can_proceed(self.step, image_count) {
            debug!(
                target = "barter.wizard",
                step = self.step.number(),
                "advance blocked by gate"
            );
            return false;
        }
        self.step = next;
        true
    }

    pub fn retreat(&mut self) -> bool {
        match self.step.prev() {
            Some(prev) => {
                self.step = prev;
                true
            }
            None => false,
        }
    }

    pub fn set_field(&mut self, update: FieldUpdate) -> Result<(), FieldWarning> {
        match update {
            FieldUpdate::Title(value) => {
                self.check_cap("title", &value, self.rules.title_max_chars)?;
                self.draft.title = value;
            }
            FieldUpdate::Description(value) => {
                self.check_cap("description", &value, self.rules.description_max_chars)?;
                self.draft.description = value;
            }
            FieldUpdate::Price(value) => {
                if value.is_some() && !self.draft.allow_buying() {
                    return Err(FieldWarning::PriceRequiresBuying);
                }
                if let Some(price) = value
                    && !price.is_finite()
                {
                    return Err(FieldWarning::InvalidValue {
                        field: "price",
                        value: price.to_string(),
                    });
                }
                self.draft.price = value;
            }
            FieldUpdate::Premium(enabled) => {
                if enabled && !self.premium_user {
                    return Err(FieldWarning::PremiumRequired { field: "premium" });
                }
                self.draft.premium = enabled;
            }
            FieldUpdate::AllowBuying(allow) => {
                let mode = ExchangeMode::from_flags(allow, self.draft.barter_only());
                self.set_exchange_mode(mode, "allow_buying")?;
            }
            FieldUpdate::BarterOnly(false) if !self.draft.allow_buying() => {
                return Err(FieldWarning::BarterRequiredWithoutBuying);
            }
            FieldUpdate::BarterOnly(barter_only) => {
                let mode = ExchangeMode::from_flags(self.draft.allow_buying(), barter_only);
                self.set_exchange_mode(mode, "barter_only")?;
            }
            FieldUpdate::ExchangeMode(mode) => self.set_exchange_mode(mode, "exchange_mode")?,
            FieldUpdate::Location(value) => {
                self.draft.location = value
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
            }
            FieldUpdate::Condition(value) => {
                self.draft.condition = match value.as_deref().map(str::trim) {
                    None | Some("") => None,
                    Some(label) => Some(Condition::from_label(label).ok_or_else(|| {
                        FieldWarning::InvalidValue {
                            field: "condition",
                            value: label.to_string(),
                        }
                    })?),
                };
            }
            FieldUpdate::Category(value) => {
                self.draft.category = match value.as_deref().map(str::trim) {
                    None | Some("") => None,
                    Some(label) => Some(Category::from_label(label).ok_or_else(|| {
                        FieldWarning::InvalidValue {
                            field: "category",
                            value: label.to_string(),
                        }
                    })?),
                };
            }
        }
        Ok(())
    }

    /// Used by the geolocation flow, which bypasses the field-update path.
    pub fn set_location(&mut self, location: String) {
        self.draft.location = Some(location);
    }

    fn check_cap(
        &self,
        field: &'static str,
        value: &str,
        max: Option<usize>,
    ) -> Result<(), FieldWarning> {
        match max {
            Some(max) if value.trim().chars().count() > max => {
                Err(FieldWarning::FieldTooLong { field, max })
            }
            _ => Ok(()),
        }
    }

    fn set_exchange_mode(
        &mut self,
        mode: ExchangeMode,
        field: &'static str,
    ) -> Result<(), FieldWarning> {
        if mode.allow_buying()
            && !self.draft.allow_buying()
            && self.rules.buying_requires_premium
            && !self.premium_user
        {
            return Err(FieldWarning::PremiumRequired { field });
        }
        self.draft.exchange_mode = mode;
        if !mode.allow_buying() {
            self.draft.price = None;
        }
        Ok(())
    }
}
