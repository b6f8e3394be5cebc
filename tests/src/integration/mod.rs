//! Cross-component tests.

pub mod end_to_end;
pub mod scenarios;
