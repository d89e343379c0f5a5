//! Shared helpers.

pub mod decimal;

pub use decimal::{format_usd, relative_change, safe_div, to_basis_points};
