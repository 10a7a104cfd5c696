//! Remote collaborators.
//!
//! The sync core never talks to a backend directly. Consumers inject an
//! implementation of [`RemoteSave`] into the engine and of [`PageFetcher`]
//! into each paginated query; both are opaque async operations.

mod fetch;
mod save;

pub use self::fetch::{fetch_fn, FetchFn, PageFetcher};
pub use self::save::{save_fn, RemoteSave, SaveFn};
