use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const MODEL_FAMILY: &str = "Transformer";

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationResponse {
    pub translation: String,
    pub processing_time: f64,
    pub note: String,
    pub model_info: serde_json::Map<String, serde_json::Value>,
}

impl TranslationResponse {
    pub fn new(translation: Translation, processing_time: f64) -> Self {
        let mut model_info = serde_json::Map::new();
        model_info.insert("model".into(), MODEL_FAMILY.into());

        Self {
            translation: translation.text,
            processing_time,
            note: translation.note,
            model_info,
        }
    }
}

/// Output of a model's translate call. `note` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelMetadata {
    pub name: String,
    pub weights_path: PathBuf,
    pub size_bytes: u64,
    pub device: String,
}

/// Outcome of the startup load, as reported on `/health`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadStatus {
    NotAttempted,
    WeightsMissing { path: PathBuf },
    Loaded { metadata: ModelMetadata },
}

impl LoadStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadStatus::Loaded { .. })
    }
}
