//! Provider side of resolution: transport, registry, hop walking and
//! payload extraction

pub mod extractor;
pub mod registry;
pub mod transport;
pub mod unpack;
pub mod walker;

#[cfg(test)]
pub(crate) mod fake;

pub use extractor::*;
pub use registry::*;
pub use transport::*;
pub use walker::*;
