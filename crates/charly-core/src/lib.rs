//! Charly core types.
//!
//! Shared identifiers and the error hierarchy used by the bytecode backend.
//!
//! ## Modules
//!
//! - [`ids`]: Label and symbol identifiers
//! - [`error`]: Code generation errors

pub mod error;
pub mod ids;

pub use error::{CodegenError, CodegenResult, UnresolvedLabel};
pub use ids::{LabelId, SymbolId};
