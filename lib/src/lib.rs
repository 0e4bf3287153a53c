pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod group;
pub mod service;
pub mod util;

pub use error::Error;
