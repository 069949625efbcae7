pub mod client;
pub mod errors;
pub mod redis_connection;
pub mod resp;

pub use client::{Connector, StoreClient};
pub use redis_connection::{RedisConnection, RedisConnector};
