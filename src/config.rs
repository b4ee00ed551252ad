//! Configuration loading and management

use std::path::PathBuf;

use anyhow::Result;

/// Default endpoint of the conversational service.
const DEFAULT_CHAT_ENDPOINT: &str = "http://localhost:8080/api/v1/chat/audio";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint receiving recorded utterances
    pub chat_endpoint: String,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voicechat");

        let socket_path = data_dir.join("daemon.sock");

        let chat_endpoint = std::env::var("VOICECHAT_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_CHAT_ENDPOINT.to_string());

        Ok(Self {
            chat_endpoint,
            socket_path,
            data_dir,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.socket_path.to_string_lossy().contains("voicechat"));
        assert!(config.chat_endpoint.contains("/api/v1/chat/audio"));
    }
}
