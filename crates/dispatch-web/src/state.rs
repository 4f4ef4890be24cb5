use std::sync::Arc;

use dispatchd::{DispatchError, DispatchService, Subscription};

use crate::error::WebError;

#[derive(Debug, Clone)]
pub struct WebState {
    service: Arc<DispatchService>,
}

impl WebState {
    pub fn new(service: Arc<DispatchService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &DispatchService {
        &self.service
    }

    pub fn subscribe(&self) -> Subscription {
        self.service.subscribe()
    }

    /// Run a blocking service call off the async workers.
    pub async fn call<T, F>(&self, f: F) -> Result<T, WebError>
    where
        F: FnOnce(&DispatchService) -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let result = tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|err| WebError::Internal {
                message: format!("service task failed: {err}"),
            })?;
        Ok(result?)
    }
}
