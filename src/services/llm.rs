use crate::core::model::{Character, DialogueRow};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

// --- Config ---

/// Any server speaking the OpenAI chat-completions API.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    /// Falls back to `OPENAI_API_KEY` when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn key_or_env(key: &str, var: &str) -> Result<String> {
    if !key.is_empty() {
        return Ok(key.to_string());
    }
    std::env::var(var).with_context(|| format!("API key missing and {} not set", var))
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    let key = key_or_env(&config.api_key, "OPENAI_API_KEY")?;
    let client = OpenAIClient::new(&key, &config.model, config.base_url.as_deref());
    info!("Initializing LLM client {} at {}", client.model, client.base_url);
    Ok(Box::new(client))
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

// --- Dialogue writing ---

#[derive(Debug, Clone, Default)]
pub struct DialogueInstructions {
    /// Number of lines to ask for.
    pub line_count: usize,
    pub tone: Option<String>,
    pub extra: Option<String>,
}

#[derive(Deserialize)]
struct GeneratedLine {
    speaker: String,
    text: String,
}

const WRITER_SYSTEM_PROMPT: &str = "You write dialogue for audio drama. Reply with valid JSON only.";

/// Turns characters and a plot into speaker-tagged lines. The caller must
/// still check the speakers against the character table before use.
#[derive(Debug)]
pub struct DialogueWriter {
    llm: Box<dyn LlmClient>,
}

impl DialogueWriter {
    pub fn new(llm: Box<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn generate_dialogue(
        &self,
        characters: &[Character],
        plot: Option<&str>,
        instructions: &DialogueInstructions,
    ) -> Result<Vec<DialogueRow>> {
        let prompt = format!(
            "Write a dialogue between the characters below.\n\n{}\nPlot: {}\n\n{}",
            describe_characters(characters),
            plot.filter(|p| !p.trim().is_empty()).unwrap_or("(none, invent one)"),
            format_instructions(instructions),
        );
        let response = self.llm.chat(WRITER_SYSTEM_PROMPT, &prompt).await?;
        parse_dialogue_response(&response)
    }

    pub async fn continue_dialogue(
        &self,
        characters: &[Character],
        existing: &[DialogueRow],
        instructions: &DialogueInstructions,
    ) -> Result<Vec<DialogueRow>> {
        let so_far = existing
            .iter()
            .map(|l| format!("{}: {}", l.speaker, l.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Continue the dialogue below. Return only the new lines.\n\n{}\nDialogue so far:\n{}\n\n{}",
            describe_characters(characters),
            so_far,
            format_instructions(instructions),
        );
        let response = self.llm.chat(WRITER_SYSTEM_PROMPT, &prompt).await?;
        parse_dialogue_response(&response)
    }
}

fn describe_characters(characters: &[Character]) -> String {
    let mut out = String::from("Characters:\n");
    for c in characters {
        if c.description.is_empty() {
            out.push_str(&format!("- {}\n", c.name));
        } else {
            out.push_str(&format!("- {}: {}\n", c.name, c.description));
        }
    }
    out
}

fn format_instructions(instructions: &DialogueInstructions) -> String {
    let mut out = String::new();
    if instructions.line_count > 0 {
        out.push_str(&format!("Write about {} lines.\n", instructions.line_count));
    }
    if let Some(tone) = &instructions.tone {
        out.push_str(&format!("Tone: {}\n", tone));
    }
    if let Some(extra) = &instructions.extra {
        out.push_str(extra);
        out.push('\n');
    }
    out.push_str(
        "Use only the character names listed above as speakers.\n\
         Return a JSON array: [ { \"speaker\": \"...\", \"text\": \"...\" } ]",
    );
    out
}

pub fn parse_dialogue_response(response: &str) -> Result<Vec<DialogueRow>> {
    let clean_json = strip_code_blocks(response);
    let lines: Vec<GeneratedLine> = serde_json::from_str(&clean_json)
        .with_context(|| format!("Failed to parse dialogue JSON: {}", clean_json))?;
    Ok(lines
        .into_iter()
        .filter(|l| !l.text.trim().is_empty())
        .map(|l| DialogueRow::new(l.speaker.trim(), l.text.trim()))
        .collect())
}

// --- OpenAI ---

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn chat_messages(system: &str, user: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: user.to_string(),
        },
    ]
}

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = ChatRequest {
            model: self.model.clone(),
            messages: chat_messages(system, user),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        result
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("OpenAI response empty or missing content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct ScriptedLlm {
        reply: String,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            Ok(self.reply.clone())
        }
    }

    fn character(name: &str, description: &str) -> Character {
        Character {
            name: name.to_string(),
            voice_label: "Rachel (premade)".to_string(),
            voice_id: "id".to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("```\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("  ```json  \n  []  \n  ```  "), "[]");
    }

    #[test]
    fn test_parse_dialogue_response() {
        let rows = parse_dialogue_response(
            "```json\n[{\"speaker\": \" Ann \", \"text\": \"Hi\"}, {\"speaker\": \"Ben\", \"text\": \"  \"}]\n```",
        )
        .unwrap();
        assert_eq!(rows, vec![DialogueRow::new("Ann", "Hi")]);
        assert!(parse_dialogue_response("not json").is_err());
    }

    #[tokio::test]
    async fn test_generate_prompt_lists_characters_and_plot() -> Result<()> {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let writer = DialogueWriter::new(Box::new(ScriptedLlm {
            reply: r#"[{"speaker": "Ann", "text": "We need a boat."}]"#.to_string(),
            prompts: prompts.clone(),
        }));

        let rows = writer
            .generate_dialogue(
                &[character("Ann", "a sailor"), character("Ben", "")],
                Some("Stranded on an island"),
                &DialogueInstructions {
                    line_count: 6,
                    tone: Some("wry".into()),
                    extra: None,
                },
            )
            .await?;
        assert_eq!(rows.len(), 1);

        let prompt = prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("- Ann: a sailor"));
        assert!(prompt.contains("- Ben\n"));
        assert!(prompt.contains("Stranded on an island"));
        assert!(prompt.contains("about 6 lines"));
        assert!(prompt.contains("Tone: wry"));
        Ok(())
    }

    #[tokio::test]
    async fn test_continue_prompt_includes_existing_lines() -> Result<()> {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let writer = DialogueWriter::new(Box::new(ScriptedLlm {
            reply: "[]".to_string(),
            prompts: prompts.clone(),
        }));
        writer
            .continue_dialogue(
                &[character("Ann", "")],
                &[DialogueRow::new("Ann", "Where are we?")],
                &DialogueInstructions::default(),
            )
            .await?;
        assert!(prompts.lock().unwrap()[0].contains("Ann: Where are we?"));
        Ok(())
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "[]"
                },
                "finish_reason": "stop"
            }]
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.choices[0].message.content.as_deref(), Some("[]"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: chat_messages("sys", "hello"),
        })
        .unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_config_defaults_and_base_url() {
        let config: LlmConfig = serde_yaml_ng::from_str("api_key: sk-test\nbase_url: http://localhost:8080/v1/\n").unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        let client = OpenAIClient::new(&config.api_key, &config.model, config.base_url.as_deref());
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert!(create_llm(&config).is_ok());
    }
}
