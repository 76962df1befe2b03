//! Model construction from a per-session config, plus the model catalog
//! (context windows and pricing).

use std::sync::Arc;

use co_domain::config::SessionModelConfig;
use co_domain::{Error, Result};

use crate::anthropic::AnthropicModel;
use crate::openai_compat::OpenAiCompatModel;
use crate::traits::LanguageModel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub context_window: u64,
    /// USD per million (input, output) tokens.
    pub pricing: (f64, f64),
}

/// Known model families, matched by prefix. Unknown models get a
/// conservative default.
pub fn catalog_entry(model: &str) -> CatalogEntry {
    const TABLE: &[(&str, u64, (f64, f64))] = &[
        ("claude-opus-4", 200_000, (15.0, 75.0)),
        ("claude-sonnet-4", 200_000, (3.0, 15.0)),
        ("claude-3-7-sonnet", 200_000, (3.0, 15.0)),
        ("claude-3-5-haiku", 200_000, (0.8, 4.0)),
        ("gpt-4o-mini", 128_000, (0.15, 0.6)),
        ("gpt-4o", 128_000, (2.5, 10.0)),
        ("gpt-4.1-mini", 1_047_576, (0.4, 1.6)),
        ("gpt-4.1", 1_047_576, (2.0, 8.0)),
        ("o3", 200_000, (2.0, 8.0)),
        ("o4-mini", 200_000, (1.1, 4.4)),
        ("deepseek", 64_000, (0.27, 1.1)),
    ];
    for (prefix, window, pricing) in TABLE {
        if model.starts_with(prefix) {
            return CatalogEntry {
                context_window: *window,
                pricing: *pricing,
            };
        }
    }
    CatalogEntry {
        context_window: 128_000,
        pricing: (1.0, 2.0),
    }
}

fn default_small_model(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "claude-3-5-haiku-20241022",
        _ => "gpt-4o-mini",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The large (conversation) and small (titles, summaries) models built
/// for one session.
#[derive(Clone)]
pub struct ModelPair {
    pub large: Arc<dyn LanguageModel>,
    pub small: Arc<dyn LanguageModel>,
}

/// Build the model pair described by a session's model config.
pub fn build_models(config: &SessionModelConfig) -> Result<ModelPair> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| Error::Config(format!("no API key for provider {}", config.provider)))?;
    let small_name = config
        .small_model
        .clone()
        .unwrap_or_else(|| default_small_model(&config.provider).to_string());

    let large = build_one(config, &config.model, &api_key)?;
    let small = build_one(config, &small_name, &api_key)?;
    Ok(ModelPair { large, small })
}

fn build_one(
    config: &SessionModelConfig,
    model: &str,
    api_key: &str,
) -> Result<Arc<dyn LanguageModel>> {
    let entry = catalog_entry(model);
    let window = config.context_window.unwrap_or(entry.context_window);
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicModel::new(
            model,
            api_key,
            config.base_url.clone(),
            window,
            entry.pricing,
        )?)),
        // Everything else speaks the OpenAI-compatible dialect.
        _ => Ok(Arc::new(OpenAiCompatModel::new(
            model,
            api_key,
            config.base_url.clone(),
            window,
            entry.pricing,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use co_domain::config::AutoModelConfig;

    #[test]
    fn catalog_prefix_matching() {
        assert_eq!(
            catalog_entry("claude-sonnet-4-20250514").context_window,
            200_000
        );
        assert_eq!(catalog_entry("gpt-4o-mini").pricing, (0.15, 0.6));
        // gpt-4o-mini must win over the gpt-4o prefix.
        assert_ne!(catalog_entry("gpt-4o-mini").pricing, (2.5, 10.0));
        assert_eq!(catalog_entry("mystery-model").context_window, 128_000);
    }

    #[test]
    fn build_models_requires_api_key() {
        let config = SessionModelConfig::from_auto(&AutoModelConfig::default());
        assert!(matches!(build_models(&config), Err(Error::Config(_))));
    }

    #[test]
    fn build_models_picks_provider_and_small_model() {
        let mut config = SessionModelConfig::from_auto(&AutoModelConfig::default());
        config.api_key = Some("sk-test".into());
        let pair = build_models(&config).unwrap();
        assert_eq!(pair.large.provider(), "anthropic");
        assert_eq!(pair.small.id(), "claude-3-5-haiku-20241022");

        config.provider = "openai".into();
        config.model = "gpt-4o".into();
        let pair = build_models(&config).unwrap();
        assert_eq!(pair.large.provider(), "openai");
        assert_eq!(pair.small.id(), "gpt-4o-mini");
    }

    #[test]
    fn context_window_override_wins() {
        let mut config = SessionModelConfig::from_auto(&AutoModelConfig::default());
        config.api_key = Some("sk-test".into());
        config.context_window = Some(10_000);
        let pair = build_models(&config).unwrap();
        assert_eq!(pair.large.context_window(), 10_000);
    }
}
