use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;
use tokio::task;
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    model::{
        LoadStatus, TranslationRequest, TranslationResponse,
        provider::{ModelProvider, TranslationModel},
    },
};

/// Result of the single startup attempt.
enum Outcome {
    WeightsMissing(PathBuf),
    Loaded(Arc<dyn TranslationModel>),
}

/// Process-wide holder of the translation model. The outcome cell is written
/// at most once; nothing ever clears it.
#[derive(Default)]
pub struct ModelRegistry {
    outcome: OnceCell<Outcome>,
}

impl ModelRegistry {
    pub fn unloaded() -> Self {
        Self::default()
    }

    /// Runs the startup sequence against a fresh registry.
    pub fn initialize<P: ModelProvider>(
        weights_path: &Path,
        provider: &P,
    ) -> Result<Self, ServiceError> {
        let registry = Self::unloaded();
        registry.load_from(weights_path, provider)?;
        Ok(registry)
    }

    /// Builds the model and loads `weights_path` into it if the file exists.
    /// A missing file leaves the registry unloaded for good; a failing load is
    /// returned to the caller and records nothing. Once an outcome is
    /// recorded, further calls return it unchanged.
    pub fn load_from<P: ModelProvider>(
        &self,
        weights_path: &Path,
        provider: &P,
    ) -> Result<LoadStatus, ServiceError> {
        let outcome = self.outcome.get_or_try_init(|| {
            if !weights_path.exists() {
                warn!(
                    path = %weights_path.display(),
                    "weights artifact not found, serving without a model"
                );
                return Ok(Outcome::WeightsMissing(weights_path.to_path_buf()));
            }

            let mut model = provider.build()?;
            model.load_weights(weights_path)?;
            let metadata = model.metadata();
            info!(
                path = %metadata.weights_path.display(),
                size_bytes = metadata.size_bytes,
                device = %metadata.device,
                "model weights loaded"
            );
            Ok::<_, ServiceError>(Outcome::Loaded(
                Arc::new(model) as Arc<dyn TranslationModel>
            ))
        })?;

        Ok(status_of(outcome))
    }

    pub fn is_loaded(&self) -> bool {
        self.model().is_some()
    }

    pub fn status(&self) -> LoadStatus {
        self.outcome
            .get()
            .map(status_of)
            .unwrap_or(LoadStatus::NotAttempted)
    }

    fn model(&self) -> Option<&Arc<dyn TranslationModel>> {
        match self.outcome.get()? {
            Outcome::Loaded(model) => Some(model),
            Outcome::WeightsMissing(_) => None,
        }
    }

    pub async fn translate(
        &self,
        request: TranslationRequest,
    ) -> Result<TranslationResponse, ServiceError> {
        let model = self.model().cloned().ok_or(ServiceError::ModelNotLoaded)?;

        let start = Instant::now();
        let text = request.text;
        let translation = task::spawn_blocking(move || model.translate(&text))
            .await
            .map_err(|err| {
                ServiceError::TranslationFailed(format!("translation task failed: {err}"))
            })?
            .map_err(|err| match err {
                ServiceError::TranslationFailed(_) => err,
                other => ServiceError::TranslationFailed(other.to_string()),
            })?;
        let processing_time = round_to_millis(start.elapsed());

        Ok(TranslationResponse::new(translation, processing_time))
    }
}

fn status_of(outcome: &Outcome) -> LoadStatus {
    match outcome {
        Outcome::WeightsMissing(path) => LoadStatus::WeightsMissing { path: path.clone() },
        Outcome::Loaded(model) => LoadStatus::Loaded {
            metadata: model.metadata(),
        },
    }
}

pub(crate) fn round_to_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
