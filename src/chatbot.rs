//! Question answering for the dashboard assistant.
//!
//! With an API key configured the question goes to an OpenAI-compatible
//! chat completion endpoint. API failures are shown to the user as the
//! answer itself; without a key a keyword matcher answers from the
//! caller's own data.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug)]
pub enum ChatError {
    Transport(String),
    Status { code: u16, body: String },
    EmptyReply,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Transport(e) => f.write_str(e),
            ChatError::Status { code, body } => write!(f, "{code} {body}"),
            ChatError::EmptyReply => f.write_str("empty reply"),
        }
    }
}

#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, system: &str, question: &str) -> Result<String, ChatError>;
}

pub type SharedChatClient = Arc<dyn ChatClient>;

/// The configured client, if any. Without one the keyword fallback answers.
#[derive(Clone, Default)]
pub struct ChatBackend(pub Option<SharedChatClient>);

impl ChatBackend {
    pub fn client(&self) -> Option<&dyn ChatClient> {
        self.0.as_deref()
    }
}

pub struct OpenAiCompatible {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatible {
    pub fn new(url: String, api_key: String, model: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(OpenAiCompatible {
            http,
            url,
            api_key,
            model,
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl ChatClient for OpenAiCompatible {
    async fn complete(&self, system: &str, question: &str) -> Result<String, ChatError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: question,
                },
            ],
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let completion = response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ChatError::EmptyReply)
    }
}

/// What the assistant knows about the caller.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub username: String,
    pub clubs: Vec<String>,
    pub upcoming_events: Vec<String>,
    pub badges: Vec<String>,
    pub contributions: i64,
    pub registrations: i64,
}

impl ChatContext {
    fn system_prompt(&self) -> String {
        let clubs = if self.clubs.is_empty() {
            "aucun".to_string()
        } else {
            self.clubs.join(", ")
        };
        let events = if self.upcoming_events.is_empty() {
            "aucun".to_string()
        } else {
            self.upcoming_events.join(", ")
        };
        let badges = if self.badges.is_empty() {
            "aucun".to_string()
        } else {
            self.badges.join(", ")
        };
        format!(
            "Tu es l'assistant de la plateforme des clubs universitaires. \
             Réponds en français, brièvement. Utilisateur : {}. Clubs : {}. \
             Événements à venir : {}. Badges : {}. Contributions : {}. Inscriptions : {}.",
            self.username, clubs, events, badges, self.contributions, self.registrations
        )
    }
}

pub fn fallback_answer(question: &str, ctx: &ChatContext) -> String {
    let question = question.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| question.contains(w));

    if mentions(&["combien", "total", "nombre"]) {
        format!(
            "Tu as {} contribution(s) et {} événement(s) inscrits.",
            ctx.contributions, ctx.registrations
        )
    } else if mentions(&["badge", "récompense", "recompense"]) {
        if ctx.badges.is_empty() {
            "Tu n'as pas encore de badge.".to_string()
        } else {
            format!("Badges obtenus: {}", ctx.badges.join(", "))
        }
    } else if mentions(&["club"]) {
        if ctx.clubs.is_empty() {
            "Tu n'es membre d'aucun club actif.".to_string()
        } else {
            format!("Membre de : {}", ctx.clubs.join(", "))
        }
    } else if mentions(&["événement", "evenement", "event"]) {
        if ctx.upcoming_events.is_empty() {
            "Aucun événement à venir.".to_string()
        } else {
            format!("Prochains événements : {}", ctx.upcoming_events.join(", "))
        }
    } else {
        "Désolé, je n'ai pas compris. Essaie : 'Combien de contributions', 'Badges', 'Clubs', 'Événements'."
            .to_string()
    }
}

pub async fn answer(client: Option<&dyn ChatClient>, question: &str, ctx: &ChatContext) -> String {
    let Some(client) = client else {
        return fallback_answer(question, ctx);
    };
    match client.complete(&ctx.system_prompt(), question).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "chat completion failed");
            format!("Erreur API: {e}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait::async_trait]
    impl ChatClient for Failing {
        async fn complete(&self, _: &str, _: &str) -> Result<String, ChatError> {
            Err(ChatError::Status {
                code: 401,
                body: "invalid api key".to_string(),
            })
        }
    }

    struct Echo;

    #[async_trait::async_trait]
    impl ChatClient for Echo {
        async fn complete(&self, system: &str, question: &str) -> Result<String, ChatError> {
            assert!(system.contains("Chess"));
            Ok(format!("echo: {question}"))
        }
    }

    fn ctx() -> ChatContext {
        ChatContext {
            username: "ada".to_string(),
            clubs: vec!["Chess".to_string(), "Robotics".to_string()],
            upcoming_events: vec![],
            badges: vec![],
            contributions: 2,
            registrations: 3,
        }
    }

    #[test]
    fn keywords_pick_the_fallback_answer() {
        assert_eq!(
            fallback_answer("Combien de contributions ?", &ctx()),
            "Tu as 2 contribution(s) et 3 événement(s) inscrits."
        );
        assert_eq!(
            fallback_answer("mes CLUBS", &ctx()),
            "Membre de : Chess, Robotics"
        );
        assert_eq!(
            fallback_answer("quels événements ?", &ctx()),
            "Aucun événement à venir."
        );
        assert!(fallback_answer("bonjour", &ctx()).starts_with("Désolé"));
    }

    #[tokio::test]
    async fn api_errors_become_the_answer() {
        let reply = answer(Some(&Failing), "hello", &ctx()).await;
        assert_eq!(reply, "Erreur API: 401 invalid api key");
    }

    #[tokio::test]
    async fn configured_client_gets_the_context() {
        let reply = answer(Some(&Echo), "hello", &ctx()).await;
        assert_eq!(reply, "echo: hello");
    }
}
