pub mod config;
pub mod logging;

pub mod downloader;
pub mod error;
pub mod events;
pub mod executor;
pub mod net;
pub mod range;
pub mod storage;
pub mod sync;
pub mod task;
pub mod tracker;
