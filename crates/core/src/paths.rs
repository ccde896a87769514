use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".homebot"))
            .unwrap_or_else(|| PathBuf::from(".homebot"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn conversation_log(&self) -> PathBuf {
        self.logs_dir().join("conversations.jsonl")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
