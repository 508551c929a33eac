use crate::config::Config;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, Address, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

const SENDER_NAME: &str = "Campus Club Hub";

#[derive(Debug)]
pub enum EmailError {
    Disabled,
    InvalidAddress(String),
    Send(anyhow::Error),
}

impl std::fmt::Display for EmailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmailError::Disabled => f.write_str("email is not configured"),
            EmailError::InvalidAddress(addr) => write!(f, "invalid email address `{addr}`"),
            EmailError::Send(e) => write!(f, "failed to send email: {e}"),
        }
    }
}

impl std::error::Error for EmailError {}

struct Smtp {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// Outgoing mail. Without SMTP credentials every send fails with
/// [`EmailError::Disabled`] and callers decide whether that matters.
#[derive(Clone)]
pub struct Mailer {
    smtp: Option<Arc<Smtp>>,
    pub frontend_host: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> anyhow::Result<Mailer> {
        let smtp = match (&config.email_username, &config.email_password) {
            (Some(username), Some(password)) => {
                let address = username.parse::<Address>()?;
                let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_relay)?
                    .credentials(Credentials::new(username.clone(), password.clone()))
                    .build();
                Some(Arc::new(Smtp {
                    transport,
                    from: Mailbox::new(Some(SENDER_NAME.to_string()), address),
                }))
            }
            _ => None,
        };
        Ok(Mailer {
            smtp,
            frontend_host: config.frontend_host.clone(),
        })
    }

    pub fn disabled(frontend_host: impl Into<String>) -> Mailer {
        Mailer {
            smtp: None,
            frontend_host: frontend_host.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.smtp.is_some()
    }

    /// Builds a link into the frontend, e.g. `link(&["password", uid])`.
    pub fn link(&self, segments: &[&str]) -> String {
        let base = self.frontend_host.trim_end_matches('/');
        match url::Url::parse(base) {
            Ok(mut url) => {
                if let Ok(mut path) = url.path_segments_mut() {
                    path.pop_if_empty().extend(segments);
                }
                url.to_string()
            }
            Err(_) => format!("{base}/{}", segments.join("/")),
        }
    }

    /// Checks the relay is reachable and accepts the credentials.
    pub async fn sanity_check(&self) -> Result<(), EmailError> {
        let smtp = self.smtp.as_ref().ok_or(EmailError::Disabled)?;
        match smtp.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EmailError::Send(anyhow::anyhow!("relay refused the connection"))),
            Err(e) => Err(EmailError::Send(e.into())),
        }
    }

    pub async fn send(
        &self,
        to_name: &str,
        to_address: &str,
        subject: &str,
        body: String,
    ) -> Result<(), EmailError> {
        let smtp = self.smtp.as_ref().ok_or(EmailError::Disabled)?;
        let destination = to_address
            .parse::<Address>()
            .map_err(|_| EmailError::InvalidAddress(to_address.to_string()))?;

        let message = Message::builder()
            .from(smtp.from.clone())
            .to(Mailbox::new(Some(to_name.to_string()), destination))
            .subject(subject)
            .body(body)
            .map_err(|e| EmailError::Send(e.into()))?;

        smtp.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| EmailError::Send(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_mailer_refuses_to_send() {
        let mailer = Mailer::disabled("http://localhost:3000");
        assert!(!mailer.is_enabled());
        let err = mailer
            .send("ada", "ada@example.com", "hi", "hello".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::Disabled));
    }

    #[test]
    fn links_are_joined_onto_the_frontend_host() {
        let mailer = Mailer::disabled("http://localhost:3000/");
        assert_eq!(
            mailer.link(&["password", "abc123"]),
            "http://localhost:3000/password/abc123"
        );
    }
}
