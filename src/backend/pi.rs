//! Backend for the Pi CLI sub-agent, wrapping a child process instead of an
//! HTTP connection (spec §4.4's "Alternate framing for wrapping child
//! processes", supplemented by SPEC_FULL.md §4.8).
//!
//! Pi speaks a line-delimited JSON dialect over its own stdin/stdout: one
//! `{"type": "<command>", ...}` object per input line, one
//! `{"type": "response", ...}` or `{"type": "event", ...}` object per output
//! line. [`PiBackend`] owns the child process and translates [`LlmRequest`]s
//! into Pi's `prompt` command, reassembling event lines into the same
//! `content_chunk`/`thought_chunk`/usage contract the other client nodes use.

use super::{Backend, LlmRequest, LlmResponse, Role};
use crate::error::{ProxyError, Result};
use crate::output_parser::parse_json_value;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Pi `_meta.pi.thinkingLevel` values (spec §4.5's Translator field mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    Off,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl ThinkingLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "xhigh" => Some(Self::Xhigh),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        }
    }
}

/// A `Backend` that speaks Pi's line-delimited JSON dialect over a child
/// process's stdio instead of HTTP. `base_url` in the `Backend` contract is
/// unused here; the executable path is fixed at construction.
pub struct PiBackend {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for PiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiBackend")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish()
    }
}

impl PiBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            child: Mutex::new(None),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Build the `prompt` command sent over stdin, per spec §4.5's Pi field
    /// mapping: `message` from concatenated prompt text, plus optional
    /// thinking level.
    fn build_prompt_command(request: &LlmRequest, thinking: Option<ThinkingLevel>) -> Value {
        let mut message = request.prompt.clone();
        for msg in &request.messages {
            if msg.role == Role::User {
                message = msg.content.clone();
            }
        }

        let mut cmd = json!({
            "type": "prompt",
            "message": message,
            "model": request.model,
        });
        if let Some(level) = thinking {
            cmd["thinkingLevel"] = json!(level.as_str());
        }
        cmd
    }

    async fn spawn(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| ProxyError::Other(format!("failed to spawn Pi process {}: {}", self.program, e)))
    }

    /// Ensure a child process is running, spawning one if needed.
    async fn ensure_child<'a>(&self, guard: &'a mut Option<Child>) -> Result<&'a mut Child> {
        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }
        Ok(guard.as_mut().unwrap())
    }

    /// Extract the text payload from a Pi `event` line, distinguishing
    /// `content_chunk`-style deltas from `thought_chunk`-style ones.
    fn classify_event(event: &Value) -> Option<(bool, &str)> {
        let kind = event.get("type").and_then(|t| t.as_str())?;
        if kind != "event" {
            return None;
        }
        let event_kind = event.get("event").and_then(|t| t.as_str())?;
        let text = event.get("text").and_then(|t| t.as_str())?;
        match event_kind {
            "thinking_delta" | "thought_chunk" => Some((true, text)),
            "text_delta" | "content_chunk" => Some((false, text)),
            _ => None,
        }
    }

    fn is_done(event: &Value) -> bool {
        event.get("type").and_then(|t| t.as_str()) == Some("response")
            || event.get("event").and_then(|e| e.as_str()) == Some("done")
    }

    /// Kills the child process, if one is running. Called from a client
    /// node's `on_removed` hook so a removed graph node doesn't leak a
    /// running Pi process.
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let _ = child.start_kill();
        }
    }
}

#[async_trait]
impl Backend for PiBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let mut accumulated = String::new();
        self.run(request, &mut |text| accumulated.push_str(&text)).await?;
        Ok(LlmResponse {
            text: accumulated,
            status: 200,
            metadata: None,
        })
    }

    async fn complete_streaming(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let mut accumulated = String::new();
        self.run(request, &mut |text| {
            accumulated.push_str(&text);
            on_token(text);
        })
        .await?;
        Ok(LlmResponse {
            text: accumulated,
            status: 200,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "pi"
    }
}

impl PiBackend {
    /// Write the prompt command to the child's stdin and read event lines
    /// from stdout until a terminal `response`/`done` event, calling
    /// `on_text` for each non-thinking text delta.
    async fn run(&self, request: &LlmRequest, on_text: &mut (dyn FnMut(String) + Send)) -> Result<()> {
        let thinking = request
            .config
            .options
            .as_ref()
            .and_then(|o| o.get("thinkingLevel"))
            .and_then(|v| v.as_str())
            .and_then(ThinkingLevel::parse);
        let command = Self::build_prompt_command(request, thinking);
        let line = serde_json::to_string(&command)?;

        let mut guard = self.child.lock().await;
        let child = self.ensure_child(&mut guard).await?;

        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| ProxyError::Other("Pi process has no stdin".into()))?;
        stdin.write_all(line.as_bytes()).await.map_err(|e| ProxyError::Other(e.to_string()))?;
        stdin.write_all(b"\n").await.map_err(|e| ProxyError::Other(e.to_string()))?;
        stdin.flush().await.map_err(|e| ProxyError::Other(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProxyError::Other("Pi process has no stdout".into()))?;
        let mut reader = BufReader::new(stdout).lines();

        loop {
            let line = reader
                .next_line()
                .await
                .map_err(|e| ProxyError::Other(e.to_string()))?;
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            // Pi's line framing is usually clean, but a CLI process can still
            // wrap a line in stray prose or leave a trailing comma behind;
            // fall back to the same repair pipeline the translator output
            // parsing uses rather than failing the whole request on it.
            let event: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => parse_json_value(&line)
                    .map_err(|e| ProxyError::Other(format!("malformed Pi event line: {e}")))?,
            };
            if let Some((is_thought, text)) = Self::classify_event(&event) {
                if !is_thought {
                    on_text(text.to_string());
                }
            }
            if Self::is_done(&event) {
                // Return stdout to the child so the same process can be reused.
                child.stdout = Some(reader.into_inner().into_inner());
                return Ok(());
            }
        }
        Err(ProxyError::Other("Pi process closed stdout before a terminal event".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LlmConfig;

    fn test_request() -> LlmRequest {
        LlmRequest {
            model: "pi-default".into(),
            system_prompt: None,
            prompt: "Why is the sky blue?".into(),
            messages: Vec::new(),
            config: LlmConfig::default(),
            stream: false,
        }
    }

    #[test]
    fn thinking_level_round_trips_known_values() {
        for s in ["off", "minimal", "low", "medium", "high", "xhigh"] {
            assert_eq!(ThinkingLevel::parse(s).unwrap().as_str(), s);
        }
        assert!(ThinkingLevel::parse("ultra").is_none());
    }

    #[test]
    fn build_prompt_command_uses_latest_user_message() {
        let mut request = test_request();
        request.messages.push(crate::backend::ChatMessage {
            role: Role::User,
            content: "actual question".into(),
        });
        let cmd = PiBackend::build_prompt_command(&request, Some(ThinkingLevel::High));
        assert_eq!(cmd["type"], "prompt");
        assert_eq!(cmd["message"], "actual question");
        assert_eq!(cmd["thinkingLevel"], "high");
    }

    #[test]
    fn classify_event_separates_thinking_from_content() {
        let thought = json!({"type": "event", "event": "thinking_delta", "text": "pondering"});
        let content = json!({"type": "event", "event": "text_delta", "text": "hello"});
        assert_eq!(PiBackend::classify_event(&thought), Some((true, "pondering")));
        assert_eq!(PiBackend::classify_event(&content), Some((false, "hello")));
    }

    #[test]
    fn is_done_recognizes_response_envelope() {
        assert!(PiBackend::is_done(&json!({"type": "response"})));
        assert!(PiBackend::is_done(&json!({"type": "event", "event": "done"})));
        assert!(!PiBackend::is_done(&json!({"type": "event", "event": "text_delta"})));
    }
}
