//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Maximum characters of one attachment's text forwarded to the model.
pub const DEFAULT_ATTACHMENT_CHAR_LIMIT: usize = 3000;

/// Subject token that starts a fresh conversation.
pub const DEFAULT_RESET_MARKER: &str = "new";

pub const DEFAULT_STORE_PATH: &str = "conversation_store.json";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// How the subject line is matched against the reset marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Marker appears anywhere in the subject, case-insensitive.
    /// "Renewed license" resets too.
    Substring(String),
    /// Marker appears as a whole word, case-insensitive.
    Word(String),
}

impl ResetPolicy {
    /// Whether `subject` asks for a fresh conversation.
    pub fn is_reset(&self, subject: &str) -> bool {
        let subject = subject.to_lowercase();
        match self {
            Self::Substring(marker) => {
                !marker.is_empty() && subject.contains(&marker.to_lowercase())
            }
            Self::Word(marker) => {
                let marker = marker.to_lowercase();
                !marker.is_empty()
                    && subject
                        .split(|c: char| !c.is_alphanumeric())
                        .any(|word| word == marker)
            }
        }
    }

    fn parse(mode: &str, marker: String) -> Result<Self, ConfigError> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "substring" => Ok(Self::Substring(marker)),
            "word" => Ok(Self::Word(marker)),
            other => Err(ConfigError::InvalidValue {
                key: "RELAY_RESET_MATCH".into(),
                message: format!("expected `substring` or `word`, got `{other}`"),
            }),
        }
    }
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self::Substring(DEFAULT_RESET_MARKER.to_string())
    }
}

/// Mailbox settings for the IMAP/SMTP transport.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// Chat capability settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub api_base: String,
    pub model: String,
    /// Sent ahead of every conversation, never persisted.
    pub system_prompt: Option<String>,
}

/// Conversation assembly settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub allowed_senders: Vec<String>,
    pub attachment_char_limit: usize,
    pub reset_policy: ResetPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allowed_senders: Vec::new(),
            attachment_char_limit: DEFAULT_ATTACHMENT_CHAR_LIMIT,
            reset_policy: ResetPolicy::default(),
        }
    }
}

/// Everything the relay binary needs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub email: EmailConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub store_path: PathBuf,
    pub poll_interval: Duration,
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let username = require("EMAIL_USERNAME")?;
        let password = SecretString::from(require("EMAIL_PASSWORD")?);
        let from_address = get("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());

        let email = EmailConfig {
            imap_host: get("EMAIL_IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".into()),
            imap_port: parse_or(get("EMAIL_IMAP_PORT"), "EMAIL_IMAP_PORT", 993)?,
            smtp_host: get("EMAIL_SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".into()),
            smtp_port: parse_or(get("EMAIL_SMTP_PORT"), "EMAIL_SMTP_PORT", 465)?,
            username,
            password,
            from_address,
        };

        let llm = LlmConfig {
            api_key: SecretString::from(require("OPENAI_API_KEY")?),
            api_base: get("RELAY_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.into()),
            model: get("RELAY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            system_prompt: get("RELAY_SYSTEM_PROMPT"),
        };

        let marker = get("RELAY_RESET_MARKER")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_RESET_MARKER.into());
        let reset_policy = match get("RELAY_RESET_MATCH") {
            Some(mode) => ResetPolicy::parse(&mode, marker)?,
            None => ResetPolicy::Substring(marker),
        };

        let pipeline = PipelineConfig {
            allowed_senders: split_list(get("RELAY_ALLOWED_SENDERS").as_deref()),
            attachment_char_limit: parse_or(
                get("RELAY_ATTACHMENT_CHAR_LIMIT"),
                "RELAY_ATTACHMENT_CHAR_LIMIT",
                DEFAULT_ATTACHMENT_CHAR_LIMIT,
            )?,
            reset_policy,
        };

        let poll_secs: u64 = parse_or(get("RELAY_POLL_INTERVAL_SECS"), "RELAY_POLL_INTERVAL_SECS", 5)?;

        Ok(Self {
            email,
            llm,
            pipeline,
            store_path: get("RELAY_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            poll_interval: Duration::from_secs(poll_secs),
            log_dir: get("RELAY_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("`{raw}`: {e}"),
        }),
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("EMAIL_USERNAME", "bot@example.com"),
        ("EMAIL_PASSWORD", "hunter2"),
        ("OPENAI_API_KEY", "sk-test"),
    ];

    // ── Defaults ────────────────────────────────────────────────────

    #[test]
    fn defaults_applied_when_only_required_set() {
        let cfg = RelayConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(cfg.email.imap_host, "imap.gmail.com");
        assert_eq!(cfg.email.imap_port, 993);
        assert_eq!(cfg.email.smtp_port, 465);
        assert_eq!(cfg.email.from_address, "bot@example.com");
        assert_eq!(cfg.email.password.expose_secret(), "hunter2");
        assert_eq!(cfg.llm.model, DEFAULT_MODEL);
        assert_eq!(cfg.llm.api_base, DEFAULT_API_BASE);
        assert!(cfg.llm.system_prompt.is_none());
        assert_eq!(cfg.pipeline.attachment_char_limit, 3000);
        assert_eq!(cfg.pipeline.reset_policy, ResetPolicy::Substring("new".into()));
        assert!(cfg.pipeline.allowed_senders.is_empty());
        assert_eq!(cfg.store_path, PathBuf::from(DEFAULT_STORE_PATH));
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn missing_password_is_reported() {
        let err = RelayConfig::from_lookup(lookup(&[
            ("EMAIL_USERNAME", "bot@example.com"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "EMAIL_PASSWORD"));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[2] = ("OPENAI_API_KEY", "   ");
        let err = RelayConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn invalid_port_is_reported() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("EMAIL_IMAP_PORT", "not-a-port"));
        let err = RelayConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "EMAIL_IMAP_PORT"));
    }

    #[test]
    fn allowed_senders_split_and_trimmed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_ALLOWED_SENDERS", " a@x.com, ,B@y.org "));
        let cfg = RelayConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.pipeline.allowed_senders, vec!["a@x.com", "B@y.org"]);
    }

    #[test]
    fn api_base_trailing_slash_trimmed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_API_BASE", "http://localhost:8080/v1/"));
        let cfg = RelayConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.llm.api_base, "http://localhost:8080/v1");
    }

    #[test]
    fn reset_match_word_selected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_RESET_MATCH", "Word"));
        pairs.push(("RELAY_RESET_MARKER", "fresh"));
        let cfg = RelayConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.pipeline.reset_policy, ResetPolicy::Word("fresh".into()));
    }

    #[test]
    fn reset_match_unknown_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_RESET_MATCH", "regex"));
        assert!(RelayConfig::from_lookup(lookup(&pairs)).is_err());
    }

    // ── Reset policy ────────────────────────────────────────────────

    #[test]
    fn substring_policy_is_case_insensitive() {
        let policy = ResetPolicy::default();
        assert!(policy.is_reset("NEW question"));
        assert!(policy.is_reset("a New topic"));
        assert!(!policy.is_reset("Re: Question"));
        assert!(!policy.is_reset(""));
    }

    #[test]
    fn substring_policy_matches_inside_words() {
        assert!(ResetPolicy::default().is_reset("renewed license"));
    }

    #[test]
    fn word_policy_requires_whole_word() {
        let policy = ResetPolicy::Word("new".into());
        assert!(policy.is_reset("[NEW] question"));
        assert!(policy.is_reset("Re: new"));
        assert!(!policy.is_reset("renewed license"));
        assert!(!policy.is_reset("newsletter"));
    }

    #[test]
    fn empty_marker_never_resets() {
        assert!(!ResetPolicy::Substring(String::new()).is_reset("anything"));
        assert!(!ResetPolicy::Word(String::new()).is_reset("anything"));
    }
}
