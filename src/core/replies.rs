use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Free-form conversational replies for non-command messages. The
/// scheduling core never calls this; only the router's chit-chat path does.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    content: String,
}

const PERSONA: &str = "You are a sweet, playful Telegram companion bot. \
Reply warmly in one or two short sentences, Singlish flavour welcome.";

/// OpenAI-compatible chat completions backend.
pub struct ChatCompletionGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionGenerator {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for ChatCompletionGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: PERSONA,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(anyhow!("completion API error: {}", res.status()));
        }

        let parsed: ChatResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion response had no choices"))
    }
}

/// No-API fallback: a tiny pool of canned replies.
pub struct CannedReplies;

pub const CANNED_POOL: &[&str] = &[
    "Hehe hii 👋💕",
    "Aww, thinking of you too! 🥰",
    "Okie okie, noted! 💌",
    "Hehe I blur liao 😅 but I'm listening!",
];

#[async_trait]
impl ReplyGenerator for CannedReplies {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        let idx = rand::thread_rng().gen_range(0..CANNED_POOL.len());
        Ok(CANNED_POOL[idx].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_replies_always_answer_from_the_pool() {
        let r#gen = CannedReplies;
        for _ in 0..20 {
            let reply = r#gen.generate("anything").await.unwrap();
            assert!(CANNED_POOL.contains(&reply.as_str()));
        }
    }
}
