pub mod audio;
pub mod cli;
pub mod commands;
pub mod config;
pub mod reporting;
pub mod terminal;
