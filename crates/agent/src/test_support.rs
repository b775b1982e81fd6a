use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// Completion client that replays a fixed script and records every request it receives.
/// An exhausted script answers with `LlmError::Transport`.
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delays: Vec<(usize, Duration)>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delays: Vec::new(),
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_delay_on_call(mut self, call_index: usize, delay: Duration) -> Self {
        self.delays.push((call_index, delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let call_index = {
            let mut requests = self.requests.lock().expect("requests lock");
            requests.push(request.clone());
            requests.len() - 1
        };

        if let Some((_, delay)) = self.delays.iter().find(|(index, _)| *index == call_index) {
            tokio::time::sleep(*delay).await;
        }

        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".to_string())))
    }
}
