//! Shared data types: criteria trees, metadata value descriptors, and SQL
//! parameter values.

pub mod criteria;
pub mod metadata;
pub mod params;
