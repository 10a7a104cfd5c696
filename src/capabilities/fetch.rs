use std::future::Future;

use crate::error::FetchError;
use crate::model::{Page, PageParams};

/// Loads one page of a query.
#[async_trait::async_trait]
pub trait PageFetcher<T>: Send + Sync {
    async fn fetch_page(&self, params: PageParams) -> Result<Page<T>, FetchError>;
}

/// Adapts an async closure into a [`PageFetcher`].
pub struct FetchFn<F>(F);

impl<F> FetchFn<F> {
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<F, Fut, T> PageFetcher<T> for FetchFn<F>
where
    F: Fn(PageParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>, FetchError>> + Send,
    T: Send + 'static,
{
    async fn fetch_page(&self, params: PageParams) -> Result<Page<T>, FetchError> {
        (self.0)(params).await
    }
}

pub const fn fetch_fn<F>(f: F) -> FetchFn<F> {
    FetchFn::new(f)
}
