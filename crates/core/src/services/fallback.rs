use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use uuid::Uuid;

use crate::errors::{CoreError, Recovery};
use crate::logging::Logger;
use crate::models::aggregated::SourceFailure;
use crate::models::news::Sentiment;
use crate::normalize::Normalized;
use crate::providers::traits::MarketDataProvider;

/// A provider response the chain can judge for emptiness.
/// An empty successful response counts as a failure.
pub trait ChainPayload {
    fn has_data(&self) -> bool;
}

impl<T> ChainPayload for Normalized<T> {
    fn has_data(&self) -> bool {
        !self.items.is_empty()
    }
}

impl ChainPayload for Vec<Sentiment> {
    fn has_data(&self) -> bool {
        !self.is_empty()
    }
}

/// Outcome of walking the provider list for one logical request.
#[derive(Debug)]
pub enum Resolution<T> {
    /// `provider` delivered `value`; earlier providers in `failures` did not.
    Success {
        provider: String,
        value: T,
        failures: Vec<SourceFailure>,
    },
    /// Every provider failed or returned nothing.
    Exhausted { failures: Vec<SourceFailure> },
}

/// Tries providers in fixed priority order and returns the first
/// successful, non-empty result.
///
/// - Transient errors are retried once on the same provider after `retry_delay`.
/// - Anything else, credential errors included, moves on to the next provider.
/// - When no provider delivers and one of them failed on credentials, that
///   error is returned instead of [`Resolution::Exhausted`].
#[derive(Clone)]
pub struct FallbackChain {
    retry_delay: Duration,
    logger: Arc<dyn Logger>,
}

impl FallbackChain {
    pub fn new(retry_delay: Duration, logger: Arc<dyn Logger>) -> Self {
        Self {
            retry_delay,
            logger,
        }
    }

    /// Walk `providers` sequentially. `what` names the request in logs.
    ///
    /// A credential failure never hides behind placeholders: a later provider
    /// may still serve the request, but an exhausted chain reports the first
    /// credential error so the caller can ask for a new login.
    pub async fn resolve<T, F, Fut>(
        &self,
        what: &str,
        request_id: Uuid,
        providers: &[Arc<dyn MarketDataProvider>],
        mut call: F,
    ) -> Result<Resolution<T>, CoreError>
    where
        T: ChainPayload,
        F: FnMut(Arc<dyn MarketDataProvider>) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut failures = Vec::new();
        let mut login_error: Option<CoreError> = None;

        for provider in providers {
            let id = provider.id().to_string();
            debug!("{what} [{request_id}]: trying {id}");

            let mut outcome = call(Arc::clone(provider)).await;
            if let Err(e) = &outcome {
                if e.recovery() == Recovery::RetryOnce {
                    debug!("{what} [{request_id}]: {id} transient, retrying once: {e}");
                    tokio::time::sleep(self.retry_delay).await;
                    outcome = call(Arc::clone(provider)).await;
                }
            }

            let error = match outcome {
                Ok(value) if value.has_data() => {
                    debug!("{what} [{request_id}]: served by {id}");
                    return Ok(Resolution::Success {
                        provider: id,
                        value,
                        failures,
                    });
                }
                Ok(_) => format!("{id} returned no data"),
                Err(e) if e.recovery() == Recovery::Propagate => {
                    self.logger.error(
                        &format!("{what}: {e}"),
                        &[("request_id", request_id.to_string()), ("provider", id.clone())],
                    );
                    failures.push(SourceFailure::login(id, e.to_string()));
                    if login_error.is_none() {
                        login_error = Some(e);
                    }
                    continue;
                }
                Err(e) => e.to_string(),
            };

            self.logger.warn(
                &format!("{what}: source failed: {error}"),
                &[("request_id", request_id.to_string()), ("provider", id.clone())],
            );
            failures.push(SourceFailure::new(id, error));
        }

        match login_error {
            Some(e) => Err(e),
            None => Ok(Resolution::Exhausted { failures }),
        }
    }
}
