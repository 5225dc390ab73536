//! Tower middleware over the admission engine.
//!
//! [`AdmissionLayer`] wraps any [`tower::Service`] so every call first
//! acquires against the distributed limiter. The lease commits after a
//! successful inner call and releases (returning the tokens) when the
//! inner call fails.

use crate::admission::AcquireRequest;
use crate::error::Error;
use crate::RateLimiter;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error as ThisError;
use tollgate_core::RateLimitExceeded;
use tollgate_storage::StorageAdapter;
use tower::{Layer, Service};

/// Function that derives the admission parameters from a request.
pub type RequestExtractor<Req> = Arc<dyn Fn(&Req) -> AcquireRequest + Send + Sync>;

/// Errors returned by the [`Admission`] service.
#[derive(Debug, ThisError)]
pub enum AdmissionError<E> {
    /// The distributed limiter denied the call.
    #[error(transparent)]
    Limited(RateLimitExceeded),

    /// Admission failed for a non-limit reason (unavailable store under a
    /// BLOCK policy, validation, unknown entity).
    #[error("admission failed: {0}")]
    Admission(Error),

    /// An error returned by the inner service.
    #[error("inner service error: {0}")]
    Inner(E),
}

impl<E> AdmissionError<E> {
    /// True if the error is an admission denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AdmissionError::Limited(_))
    }

    /// Returns the inner service error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            AdmissionError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// A Tower [`Layer`] that gates a service behind the distributed limiter.
///
/// # Examples
///
/// ```
/// use tollgate::{AcquireRequest, AdmissionLayer, LimiterConfig, RateLimiter};
/// use tollgate_storage::MemoryStore;
/// use tower::ServiceBuilder;
///
/// # async fn example() -> Result<(), tollgate::Error> {
/// let limiter = RateLimiter::connect(MemoryStore::new(), LimiterConfig::builder().build()).await?;
///
/// let layer = AdmissionLayer::new(limiter, |request: &String| {
///     AcquireRequest::new(request.clone(), "search").consume("rpm", 1)
/// });
///
/// let service = ServiceBuilder::new()
///     .layer(layer)
///     .service(tower::service_fn(|request: String| async move {
///         Ok::<_, std::io::Error>(format!("handled {request}"))
///     }));
/// # Ok(())
/// # }
/// ```
pub struct AdmissionLayer<S, Req> {
    limiter: RateLimiter<S>,
    extractor: RequestExtractor<Req>,
}

impl<S, Req> AdmissionLayer<S, Req> {
    /// Creates the layer from a limiter handle and an extractor deriving
    /// `(entity, resource, consume)` from each request.
    pub fn new<F>(limiter: RateLimiter<S>, extractor: F) -> Self
    where
        F: Fn(&Req) -> AcquireRequest + Send + Sync + 'static,
    {
        Self {
            limiter,
            extractor: Arc::new(extractor),
        }
    }
}

impl<S: Clone, Req> Clone for AdmissionLayer<S, Req> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<Svc, S: Clone, Req> Layer<Svc> for AdmissionLayer<S, Req> {
    type Service = Admission<Svc, S, Req>;

    fn layer(&self, inner: Svc) -> Self::Service {
        Admission {
            inner,
            limiter: self.limiter.clone(),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

/// A Tower [`Service`] produced by [`AdmissionLayer`].
pub struct Admission<Svc, S, Req> {
    inner: Svc,
    limiter: RateLimiter<S>,
    extractor: RequestExtractor<Req>,
}

impl<Svc: Clone, S: Clone, Req> Clone for Admission<Svc, S, Req> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<Svc, S, Req> Service<Req> for Admission<Svc, S, Req>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Response: Send + 'static,
    Svc::Error: Send + 'static,
    S: StorageAdapter,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = AdmissionError<Svc::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let mut inner = self.inner.clone();
        let limiter = self.limiter.clone();
        let acquire = (self.extractor)(&req);

        Box::pin(async move {
            let mut lease = match limiter.acquire(acquire).await {
                Ok(lease) => lease,
                Err(Error::RateLimitExceeded(exceeded)) => {
                    return Err(AdmissionError::Limited(exceeded))
                }
                Err(other) => return Err(AdmissionError::Admission(other)),
            };

            match inner.call(req).await {
                Ok(response) => {
                    // No adjustments were recorded, so this is pure
                    // bookkeeping and cannot fail meaningfully.
                    let _ = lease.commit().await;
                    Ok(response)
                }
                Err(error) => {
                    lease.release().await;
                    Err(AdmissionError::Inner(error))
                }
            }
        })
    }
}
