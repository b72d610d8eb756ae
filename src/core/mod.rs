//! Resolution core: validation, locator construction and the resolver

pub mod locator;
pub mod resolver;
pub mod validation;

pub use locator::*;
pub use resolver::*;
pub use validation::*;
