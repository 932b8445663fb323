pub mod auth;
pub mod client;
mod models;

pub use client::CoinbaseClient;
