pub mod base64;
pub mod decimal;
pub mod time;
