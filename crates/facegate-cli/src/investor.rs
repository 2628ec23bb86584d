//! Investor categories recorded at enrollment and greeted on recognition.

use facegate_core::Profile;

pub const MENU: &str = "Investor types: [1] Conservative  [2] Moderate  [3] Aggressive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvestorType {
    #[default]
    Conservative,
    Moderate,
    Aggressive,
}

impl InvestorType {
    /// Accepts `1`/`2`/`3` or a category name in any case. Anything else
    /// falls back to Conservative.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "1" | "conservative" => InvestorType::Conservative,
            "2" | "moderate" => InvestorType::Moderate,
            "3" | "aggressive" => InvestorType::Aggressive,
            _ => InvestorType::default(),
        }
    }

    /// Stored label, as written to the profile's `category` field.
    pub fn as_str(self) -> &'static str {
        match self {
            InvestorType::Conservative => "Conservative",
            InvestorType::Moderate => "Moderate",
            InvestorType::Aggressive => "Aggressive",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Conservative" => Some(InvestorType::Conservative),
            "Moderate" => Some(InvestorType::Moderate),
            "Aggressive" => Some(InvestorType::Aggressive),
            _ => None,
        }
    }

    pub fn greeting(self) -> &'static str {
        match self {
            InvestorType::Conservative => "Welcome, conservative investor!",
            InvestorType::Moderate => "Welcome, moderate investor!",
            InvestorType::Aggressive => "Welcome, aggressive investor!",
        }
    }

    pub fn profile(self) -> Profile {
        Profile::with_category(self.as_str())
    }
}

/// Greeting for a stored profile, if it carries a known category.
pub fn greeting_for(profile: Option<&Profile>) -> Option<&'static str> {
    profile
        .and_then(Profile::category)
        .and_then(InvestorType::from_label)
        .map(InvestorType::greeting)
}
