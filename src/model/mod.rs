#[cfg(feature = "tch-backend")]
mod loader;
mod provider;
mod registry;
mod types;

#[cfg(feature = "tch-backend")]
pub use loader::{TorchProvider, TorchTranslator};
pub use provider::{ModelProvider, TranslationModel};
pub use registry::ModelRegistry;
pub use types::{
    LoadStatus, MODEL_FAMILY, ModelMetadata, Translation, TranslationRequest, TranslationResponse,
};
