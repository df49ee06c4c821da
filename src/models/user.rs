use serde::{Deserialize, Serialize};
use strum::EnumString;
use uuid::Uuid;

/// Subscription tier stored on the user's profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Plan {
    Free,
    Basic,
    Pro,
    Ultra,
    Edu,
    /// A tier stored on the profile that this service has no name for.
    #[serde(untagged)]
    #[strum(default)]
    Other(String),
}

impl Plan {
    /// Parse the plan column. Unrecognised tiers are kept as [`Plan::Other`].
    pub fn from_profile(value: &str) -> Self {
        value
            .parse()
            .unwrap_or_else(|_| Plan::Other(value.to_string()))
    }

    /// Image generation is closed to the free tier only.
    pub fn can_generate_images(&self) -> bool {
        !matches!(self, Plan::Free)
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub plan: Plan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_tiers() {
        assert_eq!(Plan::from_profile("free"), Plan::Free);
        assert_eq!(Plan::from_profile("basic"), Plan::Basic);
        assert_eq!(Plan::from_profile("edu"), Plan::Edu);
        assert_eq!(
            Plan::from_profile("enterprise"),
            Plan::Other("enterprise".to_string())
        );
    }

    #[test]
    fn test_only_free_tier_is_refused() {
        assert!(!Plan::Free.can_generate_images());
        assert!(Plan::Basic.can_generate_images());
        assert!(Plan::Ultra.can_generate_images());
        assert!(Plan::Other("enterprise".to_string()).can_generate_images());
    }
}
