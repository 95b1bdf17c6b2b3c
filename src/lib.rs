//! devpool: prioritized worker pools for developer-assistance tasks.

pub mod channels;
pub mod config;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod payload;
pub mod pool;
