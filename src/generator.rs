use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::PersonalityConfig;
use crate::llm::{describe_failure, TextBackend};

/// Which pipeline a response is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Direct,
    Admin,
    GroupMention,
    /// Unsolicited message sent on a schedule, with no incoming text.
    Scheduled,
}

impl GenerationMode {
    pub fn timeout(self) -> Duration {
        match self {
            GenerationMode::Scheduled => Duration::from_secs(10),
            _ => Duration::from_secs(30),
        }
    }

    /// Text sent instead of a generated reply whenever the backend fails.
    pub fn fallback(self) -> &'static str {
        match self {
            GenerationMode::Direct => "holdd one one sec, busy!! 💕",
            GenerationMode::Admin => "Admin command failed, backend unavailable.",
            GenerationMode::GroupMention => "Sorry, I'm a bit slow right now! 🤖",
            GenerationMode::Scheduled => "I love you! 💕",
        }
    }

    fn default_persona(self) -> &'static str {
        match self {
            GenerationMode::Direct => "Be a warm, playful and affectionate partner.",
            GenerationMode::Admin => "You are a helpful AI assistant.",
            GenerationMode::GroupMention => "Be a helpful and friendly AI assistant.",
            GenerationMode::Scheduled => "",
        }
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Direct => write!(f, "direct"),
            GenerationMode::Admin => write!(f, "admin"),
            GenerationMode::GroupMention => write!(f, "group"),
            GenerationMode::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedResponse {
    pub text: String,
    pub mode: GenerationMode,
    /// True when `text` is the mode's fallback rather than backend output.
    pub fallback: bool,
}

/// Persona templates read from a flat JSON object of `key -> text`.
///
/// The file is re-read on every generation so edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct PersonaSource {
    path: PathBuf,
    keys: PersonalityConfig,
}

impl PersonaSource {
    pub fn new(path: impl Into<PathBuf>, keys: PersonalityConfig) -> Self {
        Self {
            path: path.into(),
            keys,
        }
    }

    fn key_for(&self, mode: GenerationMode) -> Option<&str> {
        match mode {
            GenerationMode::Direct => Some(self.keys.direct_key.as_str()),
            GenerationMode::Admin => Some(self.keys.admin_key.as_str()),
            GenerationMode::GroupMention => Some(self.keys.group_key.as_str()),
            GenerationMode::Scheduled => None,
        }
    }

    pub async fn persona(&self, mode: GenerationMode) -> String {
        let Some(key) = self.key_for(mode) else {
            return mode.default_persona().to_string();
        };

        let personas = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Invalid personality file {}: {}", self.path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) => {
                warn!("Could not read personality file {}: {}", self.path.display(), e);
                HashMap::new()
            }
        };

        personas
            .get(key)
            .cloned()
            .unwrap_or_else(|| mode.default_persona().to_string())
    }
}

/// Builds mode-specific prompts and turns backend output into a reply.
pub struct Generator {
    backend: Arc<dyn TextBackend>,
    personas: PersonaSource,
    assistant_name: String,
}

impl Generator {
    pub fn new(backend: Arc<dyn TextBackend>, personas: PersonaSource, assistant_name: &str) -> Self {
        Self {
            backend,
            personas,
            assistant_name: assistant_name.to_string(),
        }
    }

    /// Generate a reply. Never fails: backend errors yield the mode's fallback.
    pub async fn generate(
        &self,
        mode: GenerationMode,
        recent: &[String],
        incoming: &str,
    ) -> GeneratedResponse {
        let persona = self.personas.persona(mode).await;
        if !recent.is_empty() {
            debug!("Avoiding {} recent phrases", recent.len());
        }
        let prompt = build_prompt(mode, &persona, &self.assistant_name, recent, incoming);

        match self.backend.complete(&prompt, mode.timeout()).await {
            Ok(raw) => {
                let text = strip_quotes(raw.trim()).to_string();
                if text.trim().is_empty() {
                    warn!("Backend returned an empty {} response, using fallback", mode);
                    return fallback(mode);
                }
                info!("Generated {} response: {}", mode, text);
                GeneratedResponse {
                    text,
                    mode,
                    fallback: false,
                }
            }
            Err(e) => {
                warn!(
                    "Error generating {} response ({}), using fallback",
                    mode,
                    describe_failure(&e)
                );
                fallback(mode)
            }
        }
    }
}

fn fallback(mode: GenerationMode) -> GeneratedResponse {
    GeneratedResponse {
        text: mode.fallback().to_string(),
        mode,
        fallback: true,
    }
}

/// Anti-repetition block listing recent replies verbatim.
fn avoid_block(recent: &[String]) -> String {
    if recent.is_empty() {
        return String::new();
    }
    let listed = serde_json::to_string(recent).unwrap_or_default();
    format!(
        "\n\nCRITICAL - DO NOT repeat these phrases or patterns from recent messages: {}\n\
         Use DIFFERENT words, reactions, and sentence structures!",
        listed
    )
}

/// Assemble the single instruction block sent to the backend.
pub fn build_prompt(
    mode: GenerationMode,
    persona: &str,
    assistant_name: &str,
    recent: &[String],
    incoming: &str,
) -> String {
    let avoid = avoid_block(recent);
    match mode {
        GenerationMode::Direct => format!(
            "You are texting my girlfriend as me. NEVER ASK QUESTIONS - ONLY STATEMENTS. \
             Do not call her man, girl, bro or dude, and avoid any gendered nicknames. \
             {}{}\n\nThey sent: \"{}\"\n\nYour response (STATEMENT ONLY, NO QUESTIONS):",
            persona, avoid, incoming
        ),
        GenerationMode::Admin => format!(
            "{} You are answering the operator who runs you. Be direct and useful.{}\n\n\
             Admin command: \"{}\"\n\nYour response:",
            persona, avoid, incoming
        ),
        GenerationMode::GroupMention => format!(
            "You are {}, a helpful AI assistant in a group chat. Be friendly, witty, and engaging. \
             {}{}\n\nGroup message: \"{}\"\n\nYour response:",
            assistant_name, persona, avoid, incoming
        ),
        GenerationMode::Scheduled => format!("{}{}", incoming, avoid),
    }
}

/// Remove exactly one pair of surrounding double quotes.
pub fn strip_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;

    /// Backend returning canned replies (or a failure) and recording prompts.
    #[derive(Default)]
    pub struct ScriptedBackend {
        pub reply: Mutex<Option<String>>,
        pub prompts: Mutex<Vec<(String, Duration)>>,
    }

    impl ScriptedBackend {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Mutex::new(Some(reply.to_string())),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self::default()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .map(|(p, _)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TextBackend for ScriptedBackend {
        async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), timeout));
            match self.reply.lock().unwrap().clone() {
                Some(reply) => Ok(reply),
                None => anyhow::bail!("operation timed out"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    fn generator(backend: Arc<ScriptedBackend>, dir: &tempfile::TempDir) -> Generator {
        let personas = PersonaSource::new(
            dir.path().join("personality.json"),
            PersonalityConfig::default(),
        );
        Generator::new(backend, personas, "JARVIS")
    }

    #[test]
    fn test_strip_quotes_single_layer() {
        assert_eq!(strip_quotes("\"hello\""), "hello");
        assert_eq!(strip_quotes("\"\"hello\"\""), "\"hello\"");
        assert_eq!(strip_quotes("\"hello"), "\"hello");
        assert_eq!(strip_quotes("\""), "\"");
        assert_eq!(strip_quotes("plain"), "plain");
    }

    #[test]
    fn test_prompt_lists_recent_phrases_verbatim() {
        let recent = vec!["miss you too".to_string(), "so \"cute\"".to_string()];
        let prompt = build_prompt(GenerationMode::Direct, "Be sweet.", "JARVIS", &recent, "hi");
        assert!(prompt.contains("DO NOT repeat"));
        assert!(prompt.contains("miss you too"));
        assert!(prompt.contains(r#"so \"cute\""#));
        assert!(prompt.contains("Be sweet."));
        assert!(prompt.contains("They sent: \"hi\""));
        assert!(prompt.contains("NO QUESTIONS"));
    }

    #[test]
    fn test_prompt_without_recent_has_no_avoid_block() {
        let prompt = build_prompt(GenerationMode::Direct, "p", "JARVIS", &[], "hi");
        assert!(!prompt.contains("DO NOT repeat"));
    }

    #[test]
    fn test_admin_and_group_prompts() {
        let admin = build_prompt(GenerationMode::Admin, "Ops.", "JARVIS", &[], "status");
        assert!(admin.contains("Admin command: \"status\""));

        let group = build_prompt(GenerationMode::GroupMention, "Fun.", "JARVIS", &[], "hello all");
        assert!(group.contains("You are JARVIS"));
        assert!(group.contains("Group message: \"hello all\""));
    }

    #[test]
    fn test_mode_timeouts_and_fallbacks() {
        assert_eq!(GenerationMode::Scheduled.timeout(), Duration::from_secs(10));
        assert_eq!(GenerationMode::Direct.timeout(), Duration::from_secs(30));
        let fallbacks = [
            GenerationMode::Direct.fallback(),
            GenerationMode::Admin.fallback(),
            GenerationMode::GroupMention.fallback(),
            GenerationMode::Scheduled.fallback(),
        ];
        for (i, a) in fallbacks.iter().enumerate() {
            assert!(!a.is_empty());
            for b in &fallbacks[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn test_generate_strips_quotes_and_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::replying("  \"thinking of you\"  \n"));
        let response = generator(backend.clone(), &dir)
            .generate(GenerationMode::Direct, &[], "hi")
            .await;
        assert_eq!(response.text, "thinking of you");
        assert!(!response.fallback);
        assert_eq!(response.mode, GenerationMode::Direct);
    }

    #[tokio::test]
    async fn test_generate_keeps_whitespace_inside_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::replying("\" hi \""));
        let response = generator(backend.clone(), &dir)
            .generate(GenerationMode::Direct, &[], "hi")
            .await;
        assert_eq!(response.text, " hi ");
        assert!(!response.fallback);

        let blank = Arc::new(ScriptedBackend::replying("\"   \""));
        let response = generator(blank, &dir)
            .generate(GenerationMode::Direct, &[], "hi")
            .await;
        assert!(response.fallback);
    }

    #[tokio::test]
    async fn test_generate_uses_mode_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::replying("ok"));
        generator(backend.clone(), &dir)
            .generate(GenerationMode::Scheduled, &[], "Say something nice")
            .await;
        let calls = backend.prompts.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Say something nice");
        assert_eq!(calls[0].1, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_backend_failure_yields_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::failing());
        let response = generator(backend, &dir)
            .generate(GenerationMode::GroupMention, &[], "hi")
            .await;
        assert_eq!(response.text, GenerationMode::GroupMention.fallback());
        assert!(response.fallback);
    }

    #[tokio::test]
    async fn test_empty_output_yields_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::replying("\"\""));
        let response = generator(backend, &dir)
            .generate(GenerationMode::Admin, &[], "status")
            .await;
        assert_eq!(response.text, GenerationMode::Admin.fallback());
    }

    #[tokio::test]
    async fn test_persona_read_from_file_by_mode_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("personality.json"),
            r#"{"girlfriend_personality": "Be extra sweet.", "admin_personality": "Be terse."}"#,
        )
        .unwrap();
        let backend = Arc::new(ScriptedBackend::replying("ok"));
        let gen = generator(backend.clone(), &dir);
        gen.generate(GenerationMode::Direct, &[], "hi").await;
        gen.generate(GenerationMode::Admin, &[], "status").await;

        let prompts = backend.prompts();
        assert!(prompts[0].contains("Be extra sweet."));
        assert!(prompts[1].contains("Be terse."));
    }

    #[tokio::test]
    async fn test_missing_persona_file_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let personas = PersonaSource::new(
            dir.path().join("absent.json"),
            PersonalityConfig::default(),
        );
        assert_eq!(
            personas.persona(GenerationMode::Admin).await,
            "You are a helpful AI assistant."
        );
    }
}
