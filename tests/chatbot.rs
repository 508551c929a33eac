use async_trait::async_trait;
use campus_club_hub::chatbot::{self, ChatBackend, ChatClient, ChatContext, ChatError};
use std::sync::Arc;

struct Unreachable;

#[async_trait]
impl ChatClient for Unreachable {
    async fn complete(&self, _system: &str, _question: &str) -> Result<String, ChatError> {
        Err(ChatError::Transport("connection refused".to_string()))
    }
}

struct Canned(&'static str);

#[async_trait]
impl ChatClient for Canned {
    async fn complete(&self, _system: &str, _question: &str) -> Result<String, ChatError> {
        Ok(self.0.to_string())
    }
}

fn context() -> ChatContext {
    ChatContext {
        username: "ada".to_string(),
        clubs: vec!["Robotics".to_string(), "Chess".to_string()],
        upcoming_events: vec![],
        badges: vec!["Pionnier".to_string(), "Orateur".to_string()],
        contributions: 4,
        registrations: 2,
    }
}

#[tokio::test]
async fn without_a_client_keywords_answer() {
    let backend = ChatBackend::default();
    let answer = chatbot::answer(backend.client(), "Combien de contributions ?", &context()).await;
    assert_eq!(answer, "Tu as 4 contribution(s) et 2 événement(s) inscrits.");

    let answer = chatbot::answer(backend.client(), "mes clubs", &context()).await;
    assert_eq!(answer, "Membre de : Robotics, Chess");
}

#[tokio::test]
async fn badge_questions_list_earned_badges() {
    let backend = ChatBackend::default();
    let answer = chatbot::answer(backend.client(), "Quels BADGES ai-je ?", &context()).await;
    assert_eq!(answer, "Badges obtenus: Pionnier, Orateur");

    let answer = chatbot::answer(backend.client(), "mes récompenses", &context()).await;
    assert_eq!(answer, "Badges obtenus: Pionnier, Orateur");

    let without = ChatContext {
        badges: vec![],
        ..context()
    };
    let answer = chatbot::answer(backend.client(), "un badge ?", &without).await;
    assert_eq!(answer, "Tu n'as pas encore de badge.");
}

#[tokio::test]
async fn unknown_questions_suggest_keywords() {
    let answer = chatbot::answer(None, "bonjour", &context()).await;
    assert!(answer.contains("'Badges'"));
}

#[tokio::test]
async fn api_failures_become_the_answer() {
    let backend = ChatBackend(Some(Arc::new(Unreachable)));
    let answer = chatbot::answer(backend.client(), "bonjour", &context()).await;
    assert_eq!(answer, "Erreur API: connection refused");
}

#[tokio::test]
async fn client_replies_are_passed_through() {
    let backend = ChatBackend(Some(Arc::new(Canned("Salut Ada !"))));
    let answer = chatbot::answer(backend.client(), "combien ?", &context()).await;
    assert_eq!(answer, "Salut Ada !");
}
