//! The model catalog: id → descriptor, plus the fixed per-task defaults.
//!
//! Built once at startup and shared read-only by every request.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::catalog::descriptor::{Modality, ModelDescriptor, ModelSchema};
use crate::config::CatalogConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("default {task} model {id:?} is not in the catalog")]
    UnknownDefault { task: Modality, id: String },

    #[error("default {task} model {id:?} has modality {actual}")]
    DefaultModalityMismatch {
        task: Modality,
        id: String,
        actual: Modality,
    },

    #[error("model {0:?} declares a provider or modality that contradicts its schema")]
    InconsistentDescriptor(String),

    #[error("image model {0:?} cannot support streaming")]
    StreamingImage(String),
}

/// Built-in descriptors for the models the service ships with.
pub fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("amazon.titan-text-express-v1", ModelSchema::TitanText, true),
        ModelDescriptor::new("amazon.titan-text-lite-v1", ModelSchema::TitanText, true),
        ModelDescriptor::new("amazon.nova-micro-v1:0", ModelSchema::Nova, true),
        ModelDescriptor::new("us.amazon.nova-lite-v1:0", ModelSchema::Nova, true),
        ModelDescriptor::new("mistral.mistral-7b-instruct-v0:2", ModelSchema::Mistral, true),
        ModelDescriptor::new("meta.llama3-8b-instruct-v1:0", ModelSchema::Llama3, true),
        ModelDescriptor::new(
            "us.anthropic.claude-haiku-4-5-20251001-v1:0",
            ModelSchema::AnthropicMessages,
            true,
        ),
        ModelDescriptor::new("amazon.titan-image-generator-v1", ModelSchema::TitanImage, false),
        ModelDescriptor::new("stability.stable-diffusion-xl-v1", ModelSchema::StabilityImage, false),
        ModelDescriptor::new("llama3.2", ModelSchema::OllamaGenerate, true),
    ]
}

/// Read-only model catalog.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: HashMap<String, Arc<ModelDescriptor>>,
    /// Insertion order, for stable listings.
    order: Vec<String>,
    default_text: Arc<ModelDescriptor>,
    default_image: Arc<ModelDescriptor>,
}

impl ModelCatalog {
    /// Build a catalog from descriptors and the two default ids.
    pub fn new(
        descriptors: impl IntoIterator<Item = ModelDescriptor>,
        default_text: &str,
        default_image: &str,
    ) -> Result<Self, CatalogError> {
        let mut models = HashMap::new();
        let mut order = Vec::new();

        for descriptor in descriptors {
            if descriptor.provider != descriptor.schema.provider()
                || descriptor.modality != descriptor.schema.modality()
            {
                return Err(CatalogError::InconsistentDescriptor(descriptor.id));
            }
            if descriptor.modality == Modality::Image && descriptor.supports_streaming {
                return Err(CatalogError::StreamingImage(descriptor.id));
            }
            if !models.contains_key(&descriptor.id) {
                order.push(descriptor.id.clone());
            }
            models.insert(descriptor.id.clone(), Arc::new(descriptor));
        }

        let default_text = Self::resolve_default(&models, Modality::Text, default_text)?;
        let default_image = Self::resolve_default(&models, Modality::Image, default_image)?;

        debug!(
            models = order.len(),
            default_text = %default_text.id,
            default_image = %default_image.id,
            "Model catalog built"
        );

        Ok(Self {
            models,
            order,
            default_text,
            default_image,
        })
    }

    /// Built-in models extended by the configured ones (config entries win on id clashes).
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let descriptors = builtin_models().into_iter().chain(config.models.iter().cloned());
        Self::new(
            descriptors,
            &config.default_text_model,
            &config.default_image_model,
        )
    }

    fn resolve_default(
        models: &HashMap<String, Arc<ModelDescriptor>>,
        task: Modality,
        id: &str,
    ) -> Result<Arc<ModelDescriptor>, CatalogError> {
        let descriptor = models.get(id).ok_or_else(|| CatalogError::UnknownDefault {
            task,
            id: id.to_string(),
        })?;
        if descriptor.modality != task {
            return Err(CatalogError::DefaultModalityMismatch {
                task,
                id: id.to_string(),
                actual: descriptor.modality,
            });
        }
        Ok(descriptor.clone())
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<ModelDescriptor>> {
        self.models.get(id).cloned()
    }

    pub fn default_for(&self, task: Modality) -> Arc<ModelDescriptor> {
        match task {
            Modality::Text => self.default_text.clone(),
            Modality::Image => self.default_image.clone(),
        }
    }

    /// Descriptors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.order.iter().filter_map(|id| self.models.get(id))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::descriptor::Provider;

    #[test]
    fn test_builtin_defaults() {
        let catalog = ModelCatalog::from_config(&CatalogConfig::default()).unwrap();
        assert_eq!(
            catalog.default_for(Modality::Text).id,
            "amazon.titan-text-express-v1"
        );
        assert_eq!(
            catalog.default_for(Modality::Image).id,
            "amazon.titan-image-generator-v1"
        );
        assert!(catalog
            .iter()
            .filter(|d| d.modality == Modality::Image)
            .all(|d| !d.supports_streaming));
    }

    #[test]
    fn test_lookup() {
        let catalog = ModelCatalog::from_config(&CatalogConfig::default()).unwrap();
        let mistral = catalog.lookup("mistral.mistral-7b-instruct-v0:2").unwrap();
        assert_eq!(mistral.provider, Provider::Bedrock);
        assert_eq!(mistral.schema, ModelSchema::Mistral);
        assert!(catalog.lookup("gpt-nonexistent").is_none());
    }

    #[test]
    fn test_config_models_override_builtin() {
        let mut config = CatalogConfig::default();
        config.models.push(ModelDescriptor::new(
            "amazon.titan-text-express-v1",
            ModelSchema::TitanText,
            false,
        ));
        config.models.push(ModelDescriptor::new("qwen2.5", ModelSchema::OllamaGenerate, true));
        let catalog = ModelCatalog::from_config(&config).unwrap();

        assert!(!catalog.lookup("amazon.titan-text-express-v1").unwrap().supports_streaming);
        assert_eq!(catalog.iter().last().unwrap().id, "qwen2.5");
        assert_eq!(catalog.len(), builtin_models().len() + 1);
    }

    #[test]
    fn test_bad_defaults_rejected() {
        let mut config = CatalogConfig::default();
        config.default_text_model = "amazon.titan-image-generator-v1".to_string();
        assert!(matches!(
            ModelCatalog::from_config(&config),
            Err(CatalogError::DefaultModalityMismatch { .. })
        ));

        let mut config = CatalogConfig::default();
        config.default_image_model = "missing".to_string();
        assert!(matches!(
            ModelCatalog::from_config(&config),
            Err(CatalogError::UnknownDefault { .. })
        ));
    }

    #[test]
    fn test_streaming_image_rejected() {
        let descriptors = vec![
            ModelDescriptor::new("t", ModelSchema::TitanText, true),
            ModelDescriptor::new("i", ModelSchema::TitanImage, true),
        ];
        assert_eq!(
            ModelCatalog::new(descriptors, "t", "i").unwrap_err(),
            CatalogError::StreamingImage("i".to_string())
        );
    }

    #[test]
    fn test_inconsistent_descriptor_rejected() {
        let mut bad = ModelDescriptor::new("x", ModelSchema::Nova, true);
        bad.modality = Modality::Image;
        let descriptors = vec![bad, ModelDescriptor::new("i", ModelSchema::TitanImage, false)];
        assert!(matches!(
            ModelCatalog::new(descriptors, "x", "i"),
            Err(CatalogError::InconsistentDescriptor(_))
        ));
    }
}
