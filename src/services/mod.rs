pub mod access;
pub mod keygen;
pub mod kv_service;
pub mod rate_limit;
pub mod sweeper;
