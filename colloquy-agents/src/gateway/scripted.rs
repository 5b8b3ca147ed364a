//! Deterministic gateway that replays canned replies. Used for demos and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{CompletionGateway, CompletionRequest, FragmentStream};
use crate::error::GatewayError;

/// One canned turn: fragments to emit, then optionally a failure.
#[derive(Debug, Clone, Default)]
pub struct Script {
    fragments: Vec<String>,
    failure: Option<String>,
}

impl Script {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            failure: None,
        }
    }

    /// Split `text` into word-sized fragments.
    pub fn reply(text: &str) -> Self {
        Self::fragments(text.split_inclusive(' '))
    }

    /// Emit `fragments`, then fail with `message`.
    pub fn failing<I, S>(fragments: I, message: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failure: Some(message.to_string()),
            ..Self::fragments(fragments)
        }
    }

    pub fn fail_immediately(message: &str) -> Self {
        Self {
            fragments: Vec::new(),
            failure: Some(message.to_string()),
        }
    }
}

/// Plays scripts in order, one per call, cycling when exhausted.
pub struct ScriptedGateway {
    scripts: Vec<Script>,
    next: AtomicUsize,
    calls: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts,
            next: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Offline stand-in for a real model.
    pub fn demo() -> Self {
        Self::new(vec![
            Script::reply("Here is a first pass: split the task into three steps and ship the smallest one first."),
            Script::reply("The weakest point is step two; it assumes data we do not have yet. Fetch it first."),
            Script::reply("Agreed. Revised order: fetch data, then the smallest deliverable, then polish."),
            Script::reply("That holds up. Only open risk is the fetch latency; add a timeout and move on."),
        ])
        .with_fragment_delay(Duration::from_millis(40))
    }

    /// Sleep before each fragment so observers see incremental output.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far, in call order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    pub fn speakers(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.speaker.clone()).collect()
    }
}

impl CompletionGateway for ScriptedGateway {
    fn stream(&self, request: CompletionRequest) -> FragmentStream {
        self.calls.lock().push(request);
        let script = if self.scripts.is_empty() {
            Script::default()
        } else {
            let i = self.next.fetch_add(1, Ordering::SeqCst) % self.scripts.len();
            self.scripts[i].clone()
        };
        let delay = self.delay;

        Box::pin(async_stream::stream! {
            for fragment in script.fragments {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(fragment);
            }
            if let Some(message) = script.failure {
                yield Err(GatewayError::Script(message));
            }
        })
    }
}
