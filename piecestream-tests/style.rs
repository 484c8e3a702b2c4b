//! Style Enforcement Tests
//!
//! Checks patterns clippy does not catch on its own.
//!
//! - `dead_code_enforcement` - Prevents #[allow(dead_code)] in production code

#[path = "style/dead_code_enforcement.rs"]
mod dead_code_enforcement;
