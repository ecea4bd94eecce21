pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod orchestration;
pub mod storage;
