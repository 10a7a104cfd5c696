use std::future::Future;

use crate::error::SaveError;

/// Persists the latest payload of one logical resource.
///
/// Implementations classify their own failures through
/// [`SaveErrorKind`](crate::error::SaveErrorKind); the engine decides retries
/// purely from that kind.
#[async_trait::async_trait]
pub trait RemoteSave<T>: Send + Sync {
    async fn save(&self, data: T) -> Result<(), SaveError>;
}

/// Adapts an async closure into a [`RemoteSave`].
pub struct SaveFn<F>(F);

impl<F> SaveFn<F> {
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<F, Fut, T> RemoteSave<T> for SaveFn<F>
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SaveError>> + Send,
    T: Send + 'static,
{
    async fn save(&self, data: T) -> Result<(), SaveError> {
        (self.0)(data).await
    }
}

pub const fn save_fn<F>(f: F) -> SaveFn<F> {
    SaveFn::new(f)
}
