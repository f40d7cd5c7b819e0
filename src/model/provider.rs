use std::path::Path;

use crate::{
    error::ServiceError,
    model::{ModelMetadata, Translation},
};

/// Constructs model architectures that are ready to receive trained weights.
pub trait ModelProvider {
    type Model: TranslationModel + 'static;

    fn build(&self) -> Result<Self::Model, ServiceError>;
}

pub trait TranslationModel: Send + Sync {
    /// Fills the architecture with the parameters stored at `path`.
    fn load_weights(&mut self, path: &Path) -> Result<(), ServiceError>;

    fn translate(&self, text: &str) -> Result<Translation, ServiceError>;

    fn metadata(&self) -> ModelMetadata;
}
