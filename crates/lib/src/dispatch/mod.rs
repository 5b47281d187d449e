//! Command dispatch: parse routed chat events, queue replies, notify the host.

mod dispatcher;
mod main_context;
mod reply;

pub use dispatcher::CommandDispatcher;
pub use main_context::{
    deliver, run_listener, CommandListener, MainContext, MainReceiver, RecordRequest, UiEvent,
};
pub use reply::ReplyQueue;
