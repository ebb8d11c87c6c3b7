// Database layer module

pub mod pool;
pub mod redis;

pub use pool::DbPool;
pub use redis::RedisPool;
