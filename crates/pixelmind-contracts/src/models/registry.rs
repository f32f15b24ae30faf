use indexmap::IndexMap;
use serde_json::{json, Map, Value};

pub const DEFAULT_IMAGE_MODEL: &str = "leonardo-default";
/// Accepts an uploaded photo as an image prompt; every photo job needs it.
pub const IMAGE_PROMPT_CAPABILITY: &str = "image_prompt";

/// A remote generation model: catalog alias, remote `modelId`, and the
/// payload fields it always sends alongside the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub model_id: String,
    pub label: String,
    pub capabilities: Vec<String>,
    pub payload_defaults: Map<String, Value>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    /// Looks a model up by catalog alias or by its remote model id.
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        let trimmed = name.trim();
        self.models.get(trimmed).or_else(|| {
            self.models
                .values()
                .find(|model| model.model_id.eq_ignore_ascii_case(trimmed))
        })
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      model_id: &str,
                      label: &str,
                      capabilities: &[&str],
                      payload_defaults: Value| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                model_id: model_id.to_string(),
                label: label.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                payload_defaults: payload_defaults.as_object().cloned().unwrap_or_default(),
            },
        );
    };

    insert(
        DEFAULT_IMAGE_MODEL,
        "6bef9f1b-29cb-40c7-b9df-32b51c1f67d3",
        "Leonardo Creative",
        &["image_prompt", "text_to_image"],
        json!({}),
    );
    insert(
        "photoreal-v2",
        "1e60896f-3c26-4296-8ecc-53e2afecc132",
        "PhotoReal v2",
        &["image_prompt"],
        json!({
            "guidance_scale": 7,
            "strength": 0.3,
            "promptMagic": true,
            "photoReal": true,
            "num_inference_steps": 15,
            "presetStyle": "CINEMATIC",
        }),
    );
    insert(
        "kino-xl",
        "aa77f04e-3eec-4034-9c07-d0f619684628",
        "Leonardo Kino XL",
        &["image_prompt", "text_to_image"],
        json!({
            "alchemy": true,
        }),
    );

    map
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ModelRegistry, DEFAULT_IMAGE_MODEL};

    #[test]
    fn default_catalog_leads_with_default_model() {
        let registry = ModelRegistry::new(None);
        let first = registry.by_capability("image_prompt");
        assert_eq!(first[0].name, DEFAULT_IMAGE_MODEL);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn lookup_accepts_alias_or_remote_model_id() {
        let registry = ModelRegistry::new(None);
        let by_alias = registry.get("photoreal-v2").map(|model| model.model_id.clone());
        let by_id = registry
            .get("1E60896F-3C26-4296-8ECC-53E2AFECC132")
            .map(|model| model.name.clone());
        assert_eq!(
            by_alias.as_deref(),
            Some("1e60896f-3c26-4296-8ecc-53e2afecc132")
        );
        assert_eq!(by_id.as_deref(), Some("photoreal-v2"));
    }

    #[test]
    fn photoreal_carries_payload_defaults() {
        let registry = ModelRegistry::new(None);
        let model = registry.ensure("photoreal-v2", "image_prompt");
        let defaults = model.map(|model| model.payload_defaults).unwrap_or_default();
        assert_eq!(defaults.get("photoReal"), Some(&json!(true)));
        assert_eq!(defaults.get("presetStyle"), Some(&json!("CINEMATIC")));
        assert!(registry.ensure("photoreal-v2", "text_to_image").is_none());
    }
}
