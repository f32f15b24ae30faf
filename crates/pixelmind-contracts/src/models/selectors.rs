use super::registry::{ModelRegistry, ModelSpec, IMAGE_PROMPT_CAPABILITY};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    /// Set when the caller asked for a model that cannot take a photo prompt,
    /// or when the configured default had to be replaced.
    pub fallback_reason: Option<String>,
}

/// Picks the Leonardo model for a photo job: the caller's choice when it
/// accepts image prompts, else the deployment default, else the first
/// catalog model that does.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(&self, requested: Option<&str>, default: &str) -> Result<ModelSelection, String> {
        let requested = requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let mut reasons = Vec::new();

        if let Some(name) = requested.as_deref() {
            match self.registry.get(name) {
                Some(model) if model.supports(IMAGE_PROMPT_CAPABILITY) => {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested,
                        fallback_reason: None,
                    });
                }
                Some(_) => reasons.push(format!("model '{name}' cannot take a photo prompt")),
                None => reasons.push(format!("model '{name}' is not in the catalog")),
            }
        }

        let model = match self.registry.ensure(default, IMAGE_PROMPT_CAPABILITY) {
            Some(model) => model,
            None => {
                reasons.push(format!("default model '{}' is unusable", default.trim()));
                let Some(model) = self
                    .registry
                    .by_capability(IMAGE_PROMPT_CAPABILITY)
                    .into_iter()
                    .next()
                else {
                    return Err("no catalog model accepts a photo prompt".to_string());
                };
                model
            }
        };
        let fallback_reason = (!reasons.is_empty())
            .then(|| format!("{}; using '{}'", reasons.join("; "), model.name));
        Ok(ModelSelection {
            model,
            requested,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::Map;

    use super::super::registry::{ModelRegistry, ModelSpec, DEFAULT_IMAGE_MODEL};
    use super::ModelSelector;

    fn spec(name: &str, capabilities: &[&str]) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            model_id: format!("{name}-id"),
            label: name.to_string(),
            capabilities: capabilities.iter().map(|item| item.to_string()).collect(),
            payload_defaults: Map::new(),
        }
    }

    fn catalog(models: &[ModelSpec]) -> ModelSelector {
        let map: IndexMap<String, ModelSpec> = models
            .iter()
            .map(|model| (model.name.clone(), model.clone()))
            .collect();
        ModelSelector::new(Some(ModelRegistry::new(Some(map))))
    }

    #[test]
    fn no_request_uses_configured_default_silently() -> Result<(), String> {
        let selection = ModelSelector::new(None).select(None, "kino-xl")?;
        assert_eq!(selection.model.name, "kino-xl");
        assert_eq!(selection.requested, None);
        assert_eq!(selection.fallback_reason, None);
        Ok(())
    }

    #[test]
    fn known_request_by_alias_or_model_id_wins() -> Result<(), String> {
        let selector = ModelSelector::new(None);
        let by_alias = selector.select(Some(" photoreal-v2 "), DEFAULT_IMAGE_MODEL)?;
        let by_id = selector.select(
            Some("aa77f04e-3eec-4034-9c07-d0f619684628"),
            DEFAULT_IMAGE_MODEL,
        )?;
        assert_eq!(by_alias.model.name, "photoreal-v2");
        assert_eq!(by_alias.requested.as_deref(), Some("photoreal-v2"));
        assert!(by_alias.fallback_reason.is_none());
        assert_eq!(by_id.model.name, "kino-xl");
        Ok(())
    }

    #[test]
    fn unknown_request_falls_back_to_default_with_reason() -> Result<(), String> {
        let selection = ModelSelector::new(None).select(Some("sdxl"), DEFAULT_IMAGE_MODEL)?;
        assert_eq!(selection.model.name, DEFAULT_IMAGE_MODEL);
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("model 'sdxl' is not in the catalog; using 'leonardo-default'")
        );
        Ok(())
    }

    #[test]
    fn text_only_models_are_never_picked_for_photo_jobs() -> Result<(), String> {
        let selector = catalog(&[
            spec("text-only", &["text_to_image"]),
            spec("photo", &["image_prompt"]),
        ]);
        let selection = selector.select(Some("text-only"), "text-only")?;
        assert_eq!(selection.model.name, "photo");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some(
                "model 'text-only' cannot take a photo prompt; \
                 default model 'text-only' is unusable; using 'photo'"
            )
        );
        Ok(())
    }

    #[test]
    fn catalog_without_photo_models_is_an_error() {
        let selector = catalog(&[spec("text-only", &["text_to_image"])]);
        let err = selector.select(None, "text-only").err();
        assert_eq!(err.as_deref(), Some("no catalog model accepts a photo prompt"));
    }
}
