//! Letta agent adapter
//!
//! Implements [`AgentClient`] against a Letta server's REST API. A
//! conversation maps onto a Letta agent; the transcript is the agent's
//! message history filtered down to the user-visible message types.

use async_trait::async_trait;
use convomux_core::config::AgentConfig;
use convomux_core::{
    AgentClient, ConversationInfo, Error, Result, TurnReceipt, VisibleContent, VisibleMessage,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;

/// Agent descriptor as returned by the Letta API
#[derive(Debug, Deserialize)]
struct LettaAgent {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// One message of a Letta agent's history
#[derive(Debug, Deserialize)]
struct LettaMessage {
    id: String,
    message_type: String,
    #[serde(default)]
    content: serde_json::Value,
}

/// HTTP client for a Letta server
pub struct LettaClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl LettaClient {
    /// Create a client from agent configuration.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let auth = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| Error::Config(format!("invalid agent api key: {}", e)))?;
            default_headers.insert(AUTHORIZATION, auth);
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn agent_url(&self, agent_id: &str) -> String {
        format!("{}/v1/agents/{}", self.base_url, urlencoding::encode(agent_id))
    }

    fn messages_url(&self, agent_id: &str) -> String {
        format!("{}/messages", self.agent_url(agent_id))
    }

    /// Turn a non-success Letta response into an error, consuming it.
    async fn check(response: reqwest::Response, agent_id: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ConversationNotFound(agent_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("letta returned {}: {}", status, body)));
        }
        Ok(response)
    }
}

fn transport_err(e: reqwest::Error) -> Error {
    Error::Agent(e.to_string())
}

/// Map one Letta history message onto the visible transcript, if it is a
/// user-visible type at all.
fn to_visible(message: LettaMessage) -> Option<VisibleMessage> {
    let role = match message.message_type.as_str() {
        "user_message" => "user",
        "assistant_message" => "assistant",
        // reasoning, tool calls, system: not part of the visible transcript
        _ => return None,
    };
    Some(VisibleMessage {
        id: message.id,
        role: role.to_string(),
        content: content_parts(&message.content),
    })
}

/// Letta message content is either a bare string or a list of typed parts.
fn content_parts(content: &serde_json::Value) -> Vec<VisibleContent> {
    match content {
        serde_json::Value::String(text) => vec![VisibleContent {
            content_type: "text".to_string(),
            text: text.clone(),
        }],
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .map(|text| VisibleContent {
                content_type: "text".to_string(),
                text: text.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl AgentClient for LettaClient {
    async fn create_conversation(&self) -> Result<ConversationInfo> {
        let name = format!("convomux-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        let response = self
            .http_client
            .post(format!("{}/v1/agents/", self.base_url))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(transport_err)?;
        let agent: LettaAgent = Self::check(response, "")
            .await?
            .json()
            .await
            .map_err(transport_err)?;

        Ok(ConversationInfo {
            id: agent.id,
            topic: agent.name,
        })
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>> {
        let response = self
            .http_client
            .get(format!("{}/v1/agents/", self.base_url))
            .send()
            .await
            .map_err(transport_err)?;
        let agents: Vec<LettaAgent> = Self::check(response, "")
            .await?
            .json()
            .await
            .map_err(transport_err)?;

        Ok(agents
            .into_iter()
            .map(|a| ConversationInfo {
                id: a.id,
                topic: a.name,
            })
            .collect())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(self.agent_url(conversation_id))
            .send()
            .await
            .map_err(transport_err)?;
        Self::check(response, conversation_id).await?;
        Ok(())
    }

    async fn transcript(&self, conversation_id: &str) -> Result<Vec<VisibleMessage>> {
        let response = self
            .http_client
            .get(self.messages_url(conversation_id))
            .send()
            .await
            .map_err(transport_err)?;
        let messages: Vec<LettaMessage> = Self::check(response, conversation_id)
            .await?
            .json()
            .await
            .map_err(transport_err)?;

        Ok(messages.into_iter().filter_map(to_visible).collect())
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<TurnReceipt> {
        let body = serde_json::json!({
            "messages": [{ "role": "user", "content": text }]
        });
        let response = self
            .http_client
            .post(self.messages_url(conversation_id))
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;
        Self::check(response, conversation_id).await?;

        // Letta's send response carries agent-side message envelopes; the
        // stable visible ids come from the history
        let transcript = self.transcript(conversation_id).await?;
        let last_id = |role: &str| {
            transcript
                .iter()
                .rev()
                .find(|m| m.role == role)
                .map(|m| m.id.clone())
        };

        match (last_id("user"), last_id("assistant")) {
            (Some(user_message_id), Some(assistant_message_id)) => Ok(TurnReceipt {
                user_message_id,
                assistant_message_id,
            }),
            _ => Err(Error::Agent(
                "agent accepted the message but produced no visible reply".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_assistant_messages_are_visible() {
        let msg: LettaMessage = serde_json::from_str(
            r#"{"id": "m1", "message_type": "user_message", "content": "hello"}"#,
        )
        .unwrap();
        let visible = to_visible(msg).unwrap();
        assert_eq!(visible.role, "user");
        assert_eq!(visible.content[0].text, "hello");
    }

    #[test]
    fn reasoning_messages_are_filtered_out() {
        let msg: LettaMessage = serde_json::from_str(
            r#"{"id": "m2", "message_type": "reasoning_message", "content": "hmm"}"#,
        )
        .unwrap();
        assert!(to_visible(msg).is_none());
    }

    #[test]
    fn structured_content_keeps_text_parts() {
        let content = serde_json::json!([
            {"type": "text", "text": "part one"},
            {"type": "image", "url": "http://example/x.png"},
            {"type": "text", "text": "part two"}
        ]);
        let parts = content_parts(&content);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text, "part one");
        assert_eq!(parts[1].text, "part two");
    }
}
