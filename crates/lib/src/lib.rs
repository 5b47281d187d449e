//! EVCam remote control: DingTalk stream client, chat command parsing and dispatch,
//! shared by the CLI and any host that owns the actual camera.

pub mod api;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod init;
pub mod recorder;
pub mod remote;
pub mod stream;

pub use remote::{RemoteControl, RemoteOptions};
