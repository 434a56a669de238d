pub mod broker;
pub mod chat;
pub mod core;
pub mod event_bus;
pub mod market_data;
pub mod mock;
pub mod persistence;
pub mod risk_ai;
pub mod shared_cache;
