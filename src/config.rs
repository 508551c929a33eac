use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub db_url: String,
    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,
    #[envconfig(from = "FRONTEND_HOST", default = "http://localhost:3000")]
    pub frontend_host: String,
    #[envconfig(from = "MEDIA_ROOT", default = "media")]
    pub media_root: String,
    #[envconfig(from = "SMTP_RELAY", default = "smtp.gmail.com")]
    pub smtp_relay: String,
    #[envconfig(from = "EMAIL_USERNAME")]
    pub email_username: Option<String>,
    #[envconfig(from = "EMAIL_PASSWORD")]
    pub email_password: Option<String>,
    #[envconfig(from = "CHATBOT_API_KEY")]
    pub chatbot_api_key: Option<String>,
    #[envconfig(
        from = "CHATBOT_API_URL",
        default = "https://api.openai.com/v1/chat/completions"
    )]
    pub chatbot_api_url: String,
    #[envconfig(from = "CHATBOT_MODEL", default = "gpt-4o-mini")]
    pub chatbot_model: String,
}
