pub mod config;
pub mod conversation;
pub mod error;
pub mod handler;
pub mod message;
pub mod paths;

pub use config::{
    Config, ConfigStore, FileConfigStore, MemoryConfigStore, ProviderConfig, ProviderKind,
    TelegramMode,
};
pub use conversation::{
    ConversationRecord, ConversationSink, JsonlConversationLog, NullConversationLog,
};
pub use error::{Error, Result};
pub use handler::MessageHandler;
pub use message::{InboundMessage, OutboundMessage};
pub use paths::Paths;
