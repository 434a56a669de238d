pub mod alerts;
pub mod audit;
pub mod errors;
pub mod events;
pub mod ports;
pub mod repositories;
pub mod trading;
pub mod user;
