pub mod buffer;
pub mod config;
pub mod convert;
pub mod events;
pub mod renderer;
pub mod session;
pub mod sync;
pub mod timing;
