pub mod bundle;
pub mod config;
pub mod generate;
pub mod logs;
