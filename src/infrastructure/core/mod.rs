pub mod circuit_breaker;
pub mod http_client_factory;
pub mod rate_limiter;
pub mod retry;
pub mod ttl_cache;
