pub mod config;
pub mod geo;
mod header_tools;
pub mod non_zero_duration;
pub mod service;
mod uri_tools;
