//! Core domain types, numeric parsing and allocation.
//!
//! Everything here is synchronous and store-agnostic; the `nfe` module builds
//! these types from XML and the `store` module persists them.

mod allocation;
mod error;
pub mod numeric;
mod types;

pub use allocation::*;
pub use error::*;
pub use numeric::{parse_locale_decimal, parse_optional_decimal};
pub use types::*;
