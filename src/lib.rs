#![doc = include_str!("../README.md")]
pub mod accuracy;
pub mod app;
pub mod asr;
pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod map;
pub mod pose;
pub mod store;
