//! Builds the provider prompt from enhanced user text and the image options
//! picked in the chat UI.

use std::str::FromStr;

use strum::EnumString;

pub const DEFAULT_STYLE: &str = "Default";
pub const DEFAULT_QUALITY: &str = "High";
pub const DEFAULT_TEMPERATURE: f64 = 0.5;

const MODEL_VERSION_DIRECTIVE: &str = " --v 5.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

impl Quality {
    /// Unknown values fall back to the highest quality.
    pub fn parse_or_default(value: &str) -> Self {
        Quality::from_str(value).unwrap_or_default()
    }

    fn directive(self) -> &'static str {
        match self {
            Quality::High => " --quality 1",
            Quality::Medium => " --quality .5",
            Quality::Low => " --quality .25",
        }
    }
}

/// Temperatures below 0.5 get no chaos directive at all.
fn chaos_directive(temperature: f64) -> Option<&'static str> {
    if temperature == 0.5 {
        Some(" --chaos 5")
    } else if temperature > 0.5 {
        Some(" --chaos 50")
    } else {
        None
    }
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn build(user_text: &str, style: &str, quality: &str, temperature: f64) -> String {
    let mut prompt = user_text.to_string();

    if style != DEFAULT_STYLE {
        prompt.push_str(", ");
        prompt.push_str(&capitalize_first(style));
    }

    prompt.push_str(Quality::parse_or_default(quality).directive());

    if let Some(chaos) = chaos_directive(temperature) {
        prompt.push_str(chaos);
    }

    prompt.push_str(MODEL_VERSION_DIRECTIVE);
    prompt
}

/// Same as [`build`], filling in the UI defaults for missing options.
pub fn build_with_defaults(
    user_text: &str,
    style: Option<&str>,
    quality: Option<&str>,
    temperature: Option<f64>,
) -> String {
    build(
        user_text,
        style.unwrap_or(DEFAULT_STYLE),
        quality.unwrap_or(DEFAULT_QUALITY),
        temperature.unwrap_or(DEFAULT_TEMPERATURE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_table() {
        let cases = [
            ("Default", "Medium", 0.5, "cat --quality .5 --chaos 5 --v 5.1"),
            ("Default", "High", 0.8, "cat --quality 1 --chaos 50 --v 5.1"),
            ("Default", "Low", 0.0, "cat --quality .25 --v 5.1"),
            ("Default", "Ultra", 0.5, "cat --quality 1 --chaos 5 --v 5.1"),
            ("watercolor", "High", 0.5, "cat, Watercolor --quality 1 --chaos 5 --v 5.1"),
            ("Anime", "Low", 1.0, "cat, Anime --quality .25 --chaos 50 --v 5.1"),
        ];

        for (style, quality, temperature, expected) in cases {
            assert_eq!(
                build("cat", style, quality, temperature),
                expected,
                "style={style} quality={quality} temperature={temperature}"
            );
        }
    }

    #[test]
    fn test_low_temperature_has_no_chaos() {
        let prompt = build("a red bicycle", "Default", "High", 0.3);
        assert!(prompt.ends_with(" --quality 1 --v 5.1"));
        assert!(!prompt.contains("--chaos"));
    }

    #[test]
    fn test_defaults_when_options_missing() {
        assert_eq!(
            build_with_defaults("owl", None, None, None),
            "owl --quality 1 --chaos 5 --v 5.1"
        );
    }

    #[test]
    fn test_quality_names_are_case_sensitive() {
        assert_eq!(Quality::parse_or_default("medium"), Quality::High);
        assert_eq!(Quality::parse_or_default("Medium"), Quality::Medium);
    }
}
