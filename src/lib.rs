pub mod accounts;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod http;
pub mod logging;
pub mod models;
pub mod notify;
pub mod oauth;
pub mod schema;
pub mod service;
pub mod spotify;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use logging::LOG;
