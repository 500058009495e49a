//! Table-driven [`VisionClient`] for tests and dry runs.

use super::client::{VisionClient, VisionReply, VisionRequest};
use crate::error::PageError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Canned {
    Reply(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Canned>,
    delay: Option<Duration>,
}

/// Answers vision requests from a per-page script.
///
/// Each page holds a queue of canned answers; the last one repeats once the
/// queue is drained. Unscripted pages answer with the default reply, which is
/// an empty object unless changed with [`StubVisionClient::with_default`].
#[derive(Debug)]
pub struct StubVisionClient {
    scripts: Mutex<HashMap<usize, Script>>,
    default_reply: String,
    calls: Mutex<Vec<usize>>,
}

impl Default for StubVisionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StubVisionClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_reply: "{}".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn push(self, page: usize, canned: Canned) -> Self {
        self.lock_scripts().entry(page).or_default().replies.push_back(canned);
        self
    }

    /// Queue a raw reply for `page`.
    pub fn with_reply(self, page: usize, content: impl Into<String>) -> Self {
        self.push(page, Canned::Reply(content.into()))
    }

    /// Queue a transport failure for `page`.
    pub fn with_failure(self, page: usize, detail: impl Into<String>) -> Self {
        self.push(page, Canned::Fail(detail.into()))
    }

    /// Delay every answer for `page`.
    pub fn with_delay(self, page: usize, delay: Duration) -> Self {
        self.lock_scripts().entry(page).or_default().delay = Some(delay);
        self
    }

    /// Reply used for unscripted pages.
    pub fn with_default(mut self, content: impl Into<String>) -> Self {
        self.default_reply = content.into();
        self
    }

    /// Pages requested so far, in request order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Script>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next(&self, page: usize) -> (Canned, Option<Duration>) {
        let mut scripts = self.lock_scripts();
        match scripts.get_mut(&page) {
            Some(script) => {
                let canned = if script.replies.len() > 1 {
                    script.replies.pop_front()
                } else {
                    script.replies.front().cloned()
                };
                (
                    canned.unwrap_or_else(|| Canned::Reply(self.default_reply.clone())),
                    script.delay,
                )
            }
            None => (Canned::Reply(self.default_reply.clone()), None),
        }
    }
}

#[async_trait]
impl VisionClient for StubVisionClient {
    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, PageError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.page);
        let (canned, delay) = self.next(request.page);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match canned {
            Canned::Reply(content) => Ok(VisionReply {
                output_tokens: content.len() / 4,
                input_tokens: request.instruction.len() / 4,
                content,
            }),
            Canned::Fail(detail) => Err(PageError::ExtractionFailed {
                page: request.page,
                detail,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgequake_llm::ImageData;

    fn request(page: usize) -> VisionRequest {
        VisionRequest {
            page,
            total_pages: 10,
            image: ImageData::new(String::new(), "image/png"),
            system_prompt: String::new(),
            instruction: String::new(),
        }
    }

    #[tokio::test]
    async fn script_drains_then_repeats_last() {
        let stub = StubVisionClient::new()
            .with_failure(3, "503")
            .with_reply(3, r#"{"pages_covered":[3]}"#);
        assert!(stub.complete(request(3)).await.is_err());
        assert_eq!(stub.complete(request(3)).await.unwrap().content, r#"{"pages_covered":[3]}"#);
        assert_eq!(stub.complete(request(3)).await.unwrap().content, r#"{"pages_covered":[3]}"#);
        assert_eq!(stub.calls(), vec![3, 3, 3]);
    }

    #[tokio::test]
    async fn unscripted_pages_get_default() {
        let stub = StubVisionClient::new().with_default(r#"{"company":{"name":"Acme"}}"#);
        assert!(stub.complete(request(1)).await.unwrap().content.contains("Acme"));
    }
}
