//! Small shared helpers.

pub mod wildcard;
