//! Command dispatcher: the stream client's [`MessageCallback`].
//!
//! Bot-mentioning chat events are parsed into commands; replies go to the reply queue and
//! listener notifications to the main context, so nothing here blocks the socket task.

use crate::api::Reply;
use crate::command::{self, Command};
use crate::dispatch::main_context::{MainContext, RecordRequest, UiEvent};
use crate::dispatch::reply::ReplyQueue;
use crate::stream::{ChatEvent, MessageCallback};

pub struct CommandDispatcher {
    replies: ReplyQueue,
    main: MainContext,
}

impl CommandDispatcher {
    pub fn new(replies: ReplyQueue, main: MainContext) -> Self {
        Self { replies, main }
    }

    fn reply_to(&self, event: &ChatEvent, text: String) {
        self.replies.submit(Reply {
            conversation_id: event.conversation_id.clone(),
            conversation_type: event.conversation_type.clone(),
            user_id: event.sender_id.clone(),
            text,
        });
    }
}

impl MessageCallback for CommandDispatcher {
    fn on_connected(&self) {
        log::info!("stream connection established");
        self.main.post(UiEvent::ConnectionStatusChanged(true));
    }

    fn on_disconnected(&self) {
        log::info!("stream connection lost");
        self.main.post(UiEvent::ConnectionStatusChanged(false));
    }

    fn on_message(&self, event: ChatEvent) {
        log::info!(
            "message from {} in {} (type {}): {}",
            event.sender_id,
            event.conversation_id,
            event.conversation_type,
            event.text
        );
        match command::parse(&event.text) {
            Command::Record { duration_seconds } => {
                log::info!("record command: {}s", duration_seconds);
                self.reply_to(&event, command::confirmation_text(duration_seconds));
                self.main.post(UiEvent::Record(RecordRequest {
                    conversation_id: event.conversation_id,
                    conversation_type: event.conversation_type,
                    sender_id: event.sender_id,
                    duration_seconds,
                }));
            }
            Command::Unrecognized { raw_text } => {
                log::info!("unrecognized command: {:?}", raw_text);
                self.reply_to(&event, command::HELP_TEXT.to_string());
            }
        }
    }

    fn on_error(&self, error: &str) {
        log::error!("stream error: {}", error);
    }
}
