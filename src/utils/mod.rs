//! Utility functions for unseal

pub mod cache;
pub mod json;
pub mod url;

pub use cache::*;
pub use self::url::*;
