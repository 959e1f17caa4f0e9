//! Client-side configuration with the front end's defaults.

use serde::{Deserialize, Serialize};

use crate::request::{ChatMessage, ChatRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Backend base URL; the completions path is appended to it.
    pub base_url: String,
    /// Model used when the caller does not pick one.
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            model: "qwen3:30b".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ChatConfig {
    /// Builds a streaming request for `messages` with this configuration's
    /// model and sampling settings.
    pub fn request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        let mut request = ChatRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_front_end() {
        let config = ChatConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.model, "qwen3:30b");
        assert_eq!(config.temperature, None);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: ChatConfig =
            serde_json::from_str(r#"{ "model": "llama3:8b", "temperature": 0.2 }"#).unwrap();
        assert_eq!(config.model, "llama3:8b");
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.base_url, "http://localhost:8000");
    }

    #[test]
    fn request_carries_sampling_settings() {
        let config = ChatConfig {
            temperature: Some(0.5),
            max_tokens: Some(256),
            ..Default::default()
        };
        let request = config.request(vec![ChatMessage::user("hi")]);
        assert_eq!(request.model, "qwen3:30b");
        assert!(request.stream);
        assert_eq!(request.temperature, Some(0.5));
        assert_eq!(request.max_tokens, Some(256));
    }
}
