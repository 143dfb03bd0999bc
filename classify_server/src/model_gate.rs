//! Lazy, load-once access to the classifier.
//!
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::{
    error::ClassifyError,
    nn::{ModelHandle, ModelLocation, ModelProvider},
};

pub struct ModelGate {
    provider: Arc<dyn ModelProvider>,
    location: ModelLocation,
    model: OnceCell<ModelHandle>,
}

impl ModelGate {
    pub fn new(provider: Arc<dyn ModelProvider>, location: ModelLocation) -> Self {
        Self {
            provider,
            location,
            model: OnceCell::new(),
        }
    }

    /// Load the model on the first call and hand out the cached one afterwards.
    ///
    /// A failed load is not cached, the next call tries again.
    pub async fn ensure_loaded(&self) -> Result<ModelHandle, ClassifyError> {
        self.model
            .get_or_try_init(|| self.provider.load(&self.location))
            .await
            .cloned()
    }

    /// The model, if it was loaded already.
    pub fn get(&self) -> Option<ModelHandle> {
        self.model.get().cloned()
    }
}
