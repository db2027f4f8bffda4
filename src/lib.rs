//! Bridge between a BLE indoor trainer and a single local stream consumer.

pub mod domain;
pub mod error;
pub mod infrastructure;
