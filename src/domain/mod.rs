pub mod account;
pub mod errors;
pub mod exchange;
pub mod ports;
pub mod repositories;
pub mod types;
