// src/llm/client.rs

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::GenerationError;
use crate::llm::prompt::LlmPrompt;
use crate::llm::transport::{
    ChatMessage, ChatRequest, ChatResponse, HttpTransport, Sleeper, ThreadSleeper, Transport,
};

const STATUS_OK_RANGE: std::ops::Range<u16> = 200..300;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const ERROR_BODY_LIMIT: usize = 2_000;

#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub elapsed: Duration,
    pub completion_tokens: u64,
}

/// Anything that can turn a prompt into generated text.
pub trait Oracle {
    fn generate(
        &self,
        prompt: &LlmPrompt,
        max_tokens: Option<u32>,
    ) -> Result<Generation, GenerationError>;
}

pub struct GenerationClient {
    cfg: ApiConfig,
    transport: Box<dyn Transport>,
    sleeper: Box<dyn Sleeper>,
}

impl GenerationClient {
    /// Client that talks HTTP and really sleeps.
    pub fn new(cfg: ApiConfig) -> Result<Self, GenerationError> {
        let transport = HttpTransport::new(&cfg)?;
        Ok(Self::with_parts(cfg, Box::new(transport), Box::new(ThreadSleeper)))
    }

    pub fn with_parts(
        cfg: ApiConfig,
        transport: Box<dyn Transport>,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            cfg,
            transport,
            sleeper,
        }
    }

    fn build_request(&self, prompt: &LlmPrompt, max_tokens: Option<u32>) -> ChatRequest {
        ChatRequest {
            model: self.cfg.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.user.clone(),
                },
            ],
            max_tokens: max_tokens.unwrap_or(self.cfg.max_tokens),
            temperature: self.cfg.temperature,
            top_k: self.cfg.top_k,
        }
    }
}

impl Oracle for GenerationClient {
    /// One logical request. Rate limits are retried up to `max_retries`
    /// requests in total; every other failure status is returned at once.
    fn generate(
        &self,
        prompt: &LlmPrompt,
        max_tokens: Option<u32>,
    ) -> Result<Generation, GenerationError> {
        let request = self.build_request(prompt, max_tokens);
        let max_retries = self.cfg.max_retries.max(1);

        debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            preview = %preview(&prompt.user, 100),
            "generation request"
        );

        for attempt in 1..=max_retries {
            let started = Instant::now();
            let resp = self.transport.send(&request)?;
            let elapsed = started.elapsed();

            if STATUS_OK_RANGE.contains(&resp.status) {
                let generation = parse_success(&resp.body, elapsed)?;
                debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    completion_tokens = generation.completion_tokens,
                    "generation completed"
                );
                return Ok(generation);
            }

            if resp.status != STATUS_TOO_MANY_REQUESTS {
                return Err(GenerationError::Upstream {
                    status: resp.status,
                    body: preview(&resp.body, ERROR_BODY_LIMIT),
                });
            }

            if attempt == max_retries {
                break;
            }

            let wait = resp
                .retry_after
                .unwrap_or_else(|| self.cfg.default_retry_delay());
            warn!(
                attempt,
                max_retries,
                wait_secs = wait.as_secs_f64(),
                "rate limited; retrying"
            );
            self.sleeper.sleep(wait);
        }

        Err(GenerationError::RateLimited {
            attempts: max_retries,
        })
    }
}

fn parse_success(body: &str, elapsed: Duration) -> Result<Generation, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedResponse(format!("{e}: {}", preview(body, 200))))?;

    let text = parsed
        .choices
        .first()
        .and_then(|c| c.message.content.as_deref())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            GenerationError::MalformedResponse(format!(
                "no choices in response: {}",
                preview(body, 200)
            ))
        })?;

    Ok(Generation {
        text,
        elapsed,
        completion_tokens: parsed.usage.unwrap_or_default().completion_tokens,
    })
}

/// Char-safe prefix for logs and error bodies.
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::transport::RawResponse;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    pub(crate) struct ScriptedTransport {
        pub responses: RefCell<VecDeque<RawResponse>>,
        pub sent: Rc<RefCell<Vec<ChatRequest>>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(responses: Vec<RawResponse>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                sent: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, request: &ChatRequest) -> Result<RawResponse, GenerationError> {
            self.sent.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| GenerationError::Transport("script exhausted".into()))
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingSleeper {
        pub slept: Rc<RefCell<Vec<Duration>>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, d: Duration) {
            self.slept.borrow_mut().push(d);
        }
    }

    fn ok(text: &str, tokens: u64) -> RawResponse {
        RawResponse {
            status: 200,
            retry_after: None,
            body: serde_json::json!({
                "choices": [{ "message": { "content": text } }],
                "usage": { "completion_tokens": tokens }
            })
            .to_string(),
        }
    }

    fn limited(after: Option<u64>) -> RawResponse {
        RawResponse {
            status: 429,
            retry_after: after.map(Duration::from_secs),
            body: "slow down".into(),
        }
    }

    type Sent = Rc<RefCell<Vec<ChatRequest>>>;

    fn client(responses: Vec<RawResponse>) -> (GenerationClient, RecordingSleeper, Sent) {
        let transport = ScriptedTransport::new(responses);
        let sent = transport.sent.clone();
        let sleeper = RecordingSleeper::default();
        let c = GenerationClient::with_parts(
            ApiConfig::default(),
            Box::new(transport),
            Box::new(sleeper.clone()),
        );
        (c, sleeper, sent)
    }

    fn prompt() -> LlmPrompt {
        LlmPrompt {
            system: "sys".into(),
            user: "write f".into(),
        }
    }

    #[test]
    fn success_returns_trimmed_text_and_usage() {
        let (c, sleeper, sent) = client(vec![ok("  def f(): pass \n", 12)]);
        let g = c.generate(&prompt(), None).unwrap();
        assert_eq!(g.text, "def f(): pass");
        assert_eq!(g.completion_tokens, 12);
        assert!(sleeper.slept.borrow().is_empty());

        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].max_tokens, 400);
        assert_eq!(sent[0].messages[0].role, "system");
        assert_eq!(sent[0].messages[1].content, "write f");
    }

    #[test]
    fn token_budget_overrides_default() {
        let (c, _, sent) = client(vec![ok("x", 1)]);
        c.generate(&prompt(), Some(200)).unwrap();
        assert_eq!(sent.borrow()[0].max_tokens, 200);
    }

    #[test]
    fn honours_advised_wait_then_succeeds() {
        let (c, sleeper, sent) = client(vec![
            limited(Some(2)),
            limited(Some(2)),
            limited(Some(2)),
            ok("done", 3),
        ]);
        let g = c.generate(&prompt(), None).unwrap();
        assert_eq!(g.text, "done");
        assert_eq!(*sleeper.slept.borrow(), vec![Duration::from_secs(2); 3]);
        assert_eq!(sent.borrow().len(), 4);
    }

    #[test]
    fn falls_back_to_default_wait() {
        let (c, sleeper, _) = client(vec![limited(None), ok("done", 1)]);
        c.generate(&prompt(), None).unwrap();
        assert_eq!(*sleeper.slept.borrow(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn persistent_rate_limit_is_fatal_not_empty() {
        let (c, sleeper, sent) = client((0..10).map(|_| limited(Some(1))).collect());
        let err = c.generate(&prompt(), None).unwrap_err();
        assert!(matches!(err, GenerationError::RateLimited { attempts: 5 }));
        assert_eq!(sent.borrow().len(), 5);
        assert_eq!(sleeper.slept.borrow().len(), 4);
    }

    #[test]
    fn other_failures_are_not_retried() {
        let (c, sleeper, sent) = client(vec![
            RawResponse {
                status: 500,
                retry_after: None,
                body: "kaput".into(),
            },
            ok("never", 1),
        ]);
        match c.generate(&prompt(), None).unwrap_err() {
            GenerationError::Upstream { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "kaput");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sent.borrow().len(), 1);
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn empty_content_is_success_but_missing_choices_is_not() {
        let (c, _, _) = client(vec![ok("", 0)]);
        assert_eq!(c.generate(&prompt(), None).unwrap().text, "");

        let (c, _, _) = client(vec![RawResponse {
            status: 200,
            retry_after: None,
            body: r#"{"choices": []}"#.into(),
        }]);
        assert!(matches!(
            c.generate(&prompt(), None),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn preview_is_char_safe() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("hi", 5), "hi");
    }
}
