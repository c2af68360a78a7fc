//! Port definitions (traits for adapters)

pub mod object_store;
