use serde::{Deserialize, Serialize};

/// Known display names and the organisation behind each
const MODEL_PROVIDERS: &[(&str, &str)] = &[
    ("DeepSeek V3.1", "DeepSeek"),
    ("DeepSeek Chat V3.1", "DeepSeek"),
    ("Qwen3 Max", "Alibaba"),
    ("Qwen 3 Max", "Alibaba"),
    ("Claude Sonnet 4.5", "Anthropic"),
    ("Claude 4.5 Sonnet", "Anthropic"),
    ("Grok 4", "xAI"),
    ("GPT-5", "OpenAI"),
    ("Gemini 2.5 Pro", "Google"),
];

pub const UNKNOWN_PROVIDER: &str = "Unknown";

/// Stable identity of a tracked participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    /// Display name, unique across the store
    pub name: String,
    pub provider: String,
    /// Identifier used by the external source (URL slug / API id)
    pub external_id: String,
}

impl ModelRef {
    /// Build a reference from a display name, resolving provider and external id
    /// when the source did not supply them.
    pub fn new(name: &str, provider: Option<&str>, external_id: Option<&str>) -> Self {
        let name = name.trim().to_string();
        let provider = provider
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| provider_for(&name).to_string());
        let external_id = external_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| slug(&name));

        ModelRef {
            name,
            provider,
            external_id,
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Look up the provider of a known model name
pub fn provider_for(name: &str) -> &'static str {
    MODEL_PROVIDERS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
        .map(|(_, provider)| *provider)
        .unwrap_or(UNKNOWN_PROVIDER)
}

pub fn slug(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_resolved_from_known_names() {
        let model = ModelRef::new("Claude Sonnet 4.5", None, None);
        assert_eq!(model.provider, "Anthropic");
        assert_eq!(model.external_id, "claude-sonnet-4.5");

        let unknown = ModelRef::new("Mystery Model", None, None);
        assert_eq!(unknown.provider, UNKNOWN_PROVIDER);
    }

    #[test]
    fn test_explicit_fields_win() {
        let model = ModelRef::new(" GPT-5 ", Some("Acme"), Some("gpt-5-main"));
        assert_eq!(model.name, "GPT-5");
        assert_eq!(model.provider, "Acme");
        assert_eq!(model.external_id, "gpt-5-main");
    }

    #[test]
    fn test_blank_fields_fall_back() {
        let model = ModelRef::new("Grok 4", Some("  "), Some(""));
        assert_eq!(model.provider, "xAI");
        assert_eq!(model.external_id, "grok-4");
    }
}
