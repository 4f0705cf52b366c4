//! Identifier types shared across the order orchestration crates.

mod types;

pub use types::{OrderId, Version};
