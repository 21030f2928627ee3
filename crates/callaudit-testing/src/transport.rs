//! Scripted transport for driving the audited client without a network.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use callaudit_client::{Transport, TransportError, TransportResponse};
use callaudit_core::HttpMethod;
use parking_lot::Mutex;

/// One reply the transport will hand out.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return this status and body.
    Respond(TransportResponse),
    /// Fail with this error.
    Fail(TransportError),
    /// Panic with this message.
    Panic(String),
}

/// A request the transport has received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// HTTP method
    pub method: HttpMethod,
    /// Endpoint as passed by the client
    pub endpoint: String,
    /// Request body, if any
    pub body: Option<String>,
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    fallback: Option<TransportResponse>,
    delay: Option<Duration>,
    calls: Vec<RecordedCall>,
}

/// Transport that answers from a queue of scripted replies.
///
/// Once the queue is empty the fallback reply is used; without one the
/// transport fails with a configuration error, which is never retried.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that always answers `status` with `body`.
    pub fn always(status: u16, body: &str) -> Self {
        let transport = Self::new();
        transport.set_fallback(status, body);
        transport
    }

    /// Queues a response.
    pub fn respond(&self, status: u16, body: &str) -> &Self {
        self.push(Reply::Respond(TransportResponse::new(status, body)))
    }

    /// Queues a transport failure.
    pub fn fail(&self, error: TransportError) -> &Self {
        self.push(Reply::Fail(error))
    }

    /// Queues `count` connection failures.
    pub fn fail_times(&self, count: usize) -> &Self {
        for _ in 0..count {
            self.fail(TransportError::network("connection refused"));
        }
        self
    }

    /// Queues a panic.
    pub fn panic_with(&self, message: &str) -> &Self {
        self.push(Reply::Panic(message.to_string()))
    }

    /// Queues an arbitrary reply.
    pub fn push(&self, reply: Reply) -> &Self {
        self.script.lock().replies.push_back(reply);
        self
    }

    /// Reply used once the queue is empty.
    pub fn set_fallback(&self, status: u16, body: &str) {
        self.script.lock().fallback = Some(TransportResponse::new(status, body));
    }

    /// Makes every send wait `delay` (real time) before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.lock().calls.clone()
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.script.lock().calls.len()
    }

    /// Replies still queued.
    pub fn remaining(&self) -> usize {
        self.script.lock().replies.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&str>,
    ) -> Result<TransportResponse, TransportError> {
        let (reply, delay) = {
            let mut script = self.script.lock();
            script.calls.push(RecordedCall {
                method,
                endpoint: endpoint.to_string(),
                body: body.map(str::to_string),
            });
            let reply = script
                .replies
                .pop_front()
                .or_else(|| script.fallback.clone().map(Reply::Respond));
            (reply, script.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Panic(message)) => panic!("{message}"),
            None => {
                Err(TransportError::configuration(format!("no scripted reply for {endpoint}")))
            },
        }
    }
}
