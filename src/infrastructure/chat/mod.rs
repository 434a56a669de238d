pub mod blocks;
pub mod client;
pub mod events;
pub mod server;
pub mod signature;
