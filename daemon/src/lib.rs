pub mod config;
pub mod continuous;
pub mod device;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod file_monitor;
pub mod focus_monitor;
pub mod input_hook;
pub mod launcher;
pub mod logging;
pub mod network_monitor;
pub mod paths;
pub mod roles;
pub mod throttle;
pub mod window_tracker;
