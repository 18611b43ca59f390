mod client;

pub use client::{BybitClient, BybitConfig};
