use std::future::Future;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AiError;
use crate::models::Category;
use crate::settings::AiSettings;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// What the categorization service gets to see about one expense.
#[derive(Debug, Clone, Copy)]
pub struct AiRequest<'a> {
    pub merchant: &'a str,
    pub description: &'a str,
    pub amount: f64,
}

/// An external service that suggests a category for one expense.
///
/// Implementations make a single attempt; timeouts, retries and the
/// concurrency ceiling are applied by the classifier.
pub trait AiCategorizer {
    fn suggest(&self, req: &AiRequest<'_>) -> impl Future<Output = Result<Category, AiError>>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions client
// ---------------------------------------------------------------------------

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(settings: &AiSettings, api_key: String) -> Result<Self, AiError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }

    /// Builds a client when AI is enabled and an API key is in the environment.
    pub fn from_env(settings: &AiSettings) -> Option<Self> {
        if !settings.enabled {
            log::info!("AI categorization disabled in settings");
            return None;
        }
        let key = match std::env::var(API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                log::info!("{API_KEY_VAR} not set; AI categorization disabled");
                return None;
            }
        };
        match Self::new(settings, key) {
            Ok(client) => Some(client),
            Err(e) => {
                log::warn!("Could not build AI client: {e}");
                None
            }
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You are an expert financial categorization assistant. \
Be precise and consider Brazilian merchant patterns.";

pub fn build_prompt(req: &AiRequest<'_>) -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Categorize this card transaction.\n\n\
         Merchant: {}\n\
         Amount: {:.2}\n\
         Description: {}\n\n\
         Available categories: {categories}.\n\
         IFD* is iFood (food delivery). MP* is MercadoPago and EC* is an e-commerce processor.\n\
         Use other only if no category clearly applies.\n\
         Respond with only the category name in lowercase.",
        req.merchant,
        req.amount.abs(),
        if req.description.is_empty() { "N/A" } else { req.description },
    )
}

/// Maps the first choice of a completion to a category.
pub fn category_from_reply(response: ChatResponse) -> Result<Category, AiError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(AiError::EmptyResponse)?;
    Category::from_label(&text).ok_or(AiError::UnrecognizedLabel(text))
}

impl AiCategorizer for OpenAiClient {
    async fn suggest(&self, req: &AiRequest<'_>) -> Result<Category, AiError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(req),
                },
            ],
            temperature: 0.1,
            max_tokens: 20,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AiError::Status(status.as_u16()));
        }
        let parsed: ChatResponse = response.json().await?;
        category_from_reply(parsed)
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    /// Answers every request with the same category.
    #[derive(Clone, Default)]
    pub struct StaticAi {
        pub category: Option<Category>,
        pub calls: Arc<AtomicUsize>,
    }

    impl StaticAi {
        pub fn new(category: Category) -> Self {
            Self {
                category: Some(category),
                calls: Arc::default(),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AiCategorizer for StaticAi {
        async fn suggest(&self, _req: &AiRequest<'_>) -> Result<Category, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.category.ok_or(AiError::EmptyResponse)
        }
    }

    /// Fails the first `failures` calls with HTTP 503, then answers.
    #[derive(Clone, Default)]
    pub struct FlakyAi {
        pub failures: usize,
        pub category: Option<Category>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FlakyAi {
        pub fn always_failing() -> Self {
            Self {
                failures: usize::MAX,
                category: None,
                calls: Arc::default(),
            }
        }

        pub fn failing_then(failures: usize, category: Category) -> Self {
            Self {
                failures,
                category: Some(category),
                calls: Arc::default(),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AiCategorizer for FlakyAi {
        async fn suggest(&self, _req: &AiRequest<'_>) -> Result<Category, AiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(AiError::Status(503));
            }
            self.category.ok_or(AiError::EmptyResponse)
        }
    }

    /// Sleeps before answering and records the peak number of overlapping calls.
    #[derive(Clone)]
    pub struct SlowAi {
        pub delay: Duration,
        pub category: Category,
        pub in_flight: Arc<AtomicUsize>,
        pub peak: Arc<AtomicUsize>,
    }

    impl SlowAi {
        pub fn new(delay: Duration, category: Category) -> Self {
            Self {
                delay,
                category,
                in_flight: Arc::default(),
                peak: Arc::default(),
            }
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl AiCategorizer for SlowAi {
        async fn suggest(&self, _req: &AiRequest<'_>) -> Result<Category, AiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.category)
        }
    }
}
