//! Gallery services for imagehoard
//!
//! [`RandomSelector`] draws assets with an attempt-bounded retry loop, and
//! [`Gallery`] ties storage, selection, derivatives, thumbnails and downloads
//! together behind one service object.

pub mod error;
pub mod selector;
pub mod service;

pub use error::{GalleryError, GalleryResult, SelectionError, SelectionResult};
pub use selector::{CollectionChoice, RandomSelector, SelectionConfig};
pub use service::{AssetListing, Gallery, RefreshReport, ServeMode, ServeRequest, Served};
