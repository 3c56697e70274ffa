//! Tier backend implementations

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::InMemoryTier;
pub use postgres::PostgresTier;
pub use self::redis::RedisTier;
