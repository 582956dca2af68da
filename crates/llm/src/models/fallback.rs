//! Hand-curated Gemini model families
//!
//! Served whenever the remote listing has never succeeded, and used as the
//! base that discovered models are merged into.

use super::{ModelFamily, ModelVersion};

pub fn fallback_models() -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(
            "gemini-2.5-pro",
            "Gemini 2.5 Pro",
            "Most capable thinking model for complex reasoning and coding",
            1_048_576,
        )
        .thinking()
        .preferred_for_thinking()
        .with_version(ModelVersion::new("gemini-2.5-pro", "Gemini 2.5 Pro (stable)").caching().preferred())
        .with_version(ModelVersion::new("gemini-2.5-pro-preview-06-05", "Gemini 2.5 Pro Preview 06-05").caching()),
        ModelFamily::new(
            "gemini-2.5-flash",
            "Gemini 2.5 Flash",
            "Fast thinking model with the best price-performance, suited to cached contexts",
            1_048_576,
        )
        .thinking()
        .preferred_for_caching()
        .with_version(ModelVersion::new("gemini-2.5-flash", "Gemini 2.5 Flash (stable)").caching().preferred())
        .with_version(ModelVersion::new("gemini-2.5-flash-preview-05-20", "Gemini 2.5 Flash Preview 05-20").caching()),
        ModelFamily::new(
            "gemini-2.0-flash",
            "Gemini 2.0 Flash",
            "Low-latency multimodal model with native tool use and search grounding",
            1_048_576,
        )
        .preferred_for_search()
        .with_version(ModelVersion::new("gemini-2.0-flash-001", "Gemini 2.0 Flash 001").caching().preferred())
        .with_version(ModelVersion::new("gemini-2.0-flash-exp", "Gemini 2.0 Flash Experimental")),
        ModelFamily::new(
            "gemini-2.0-flash-lite",
            "Gemini 2.0 Flash-Lite",
            "Cost-efficient model for high-volume, simple tasks",
            1_048_576,
        )
        .with_version(ModelVersion::new("gemini-2.0-flash-lite-001", "Gemini 2.0 Flash-Lite 001").preferred()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fallback_ids_are_unique() {
        let models = fallback_models();
        let family_ids: HashSet<_> = models.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(family_ids.len(), models.len());

        for family in &models {
            let version_ids: HashSet<_> = family.versions.iter().map(|v| v.id.as_str()).collect();
            assert_eq!(version_ids.len(), family.versions.len(), "{}", family.id);
        }
    }

    #[test]
    fn test_caching_preference_has_caching_version() {
        for family in fallback_models().iter().filter(|f| f.preferred_for_caching) {
            assert!(family.versions.iter().any(|v| v.supports_caching), "{}", family.id);
        }
    }
}
