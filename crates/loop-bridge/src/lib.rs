pub mod cli;
pub mod config;
pub mod runtime;

mod decode;
mod device;
mod engine;
mod http_api;
mod monitor;
mod playback;
mod sntp;
mod time_sync;
mod timeline;
