pub mod ask;
pub mod onboard;
pub mod probe;
pub mod run_cmd;
pub mod status;
mod watch;

use homebot_core::{
    Config, ConfigStore, ConversationSink, FileConfigStore, JsonlConversationLog, NullConversationLog,
    Paths,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Where the config lives and where logs go.
pub struct Context {
    pub paths: Paths,
    pub config_path: PathBuf,
}

impl Context {
    pub fn new(config_override: Option<PathBuf>) -> Self {
        let paths = Paths::new();
        let config_path = config_override.unwrap_or_else(|| paths.config_file());
        Self { paths, config_path }
    }

    pub fn store(&self) -> FileConfigStore {
        FileConfigStore::new(self.config_path.clone())
    }

    pub fn load(&self) -> anyhow::Result<Config> {
        Ok(self.store().load()?)
    }

    pub fn conversation_sink(&self, config: &Config) -> Arc<dyn ConversationSink> {
        if !config.conversation_log.enabled {
            return Arc::new(NullConversationLog);
        }
        let path = config
            .conversation_log
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.paths.conversation_log());
        Arc::new(JsonlConversationLog::spawn(path))
    }
}
