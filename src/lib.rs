pub mod config;
pub mod interfaces;
pub mod persistence;
pub mod services;
pub mod utils;
