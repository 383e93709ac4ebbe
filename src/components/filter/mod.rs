//! Filters

pub mod field;

pub use field::FieldFilter;
