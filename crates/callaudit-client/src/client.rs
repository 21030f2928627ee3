//! The audited client.
//!
//! Every call follows the same discipline:
//!
//! 1. Serialize the payload (typed variants). A failure here returns
//!    `ClientError::Serialization` and publishes nothing.
//! 2. Build the `CallRequest` and publish `Initiated`.
//! 3. Run the attempt loop. Each failed attempt publishes `Error` with its
//!    zero-based index before the retry policy is consulted; a 2xx response
//!    publishes `Success` and ends the loop.
//! 4. Typed variants deserialize the body after `Success` was published.
//!
//! Detached (`*_async`) variants publish `Initiated` on the caller's task
//! and run steps 3 and 4 on a spawned task.

use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use callaudit_core::{
    panic_message, CallEvent, CallRequest, CallResponse, Clock, EventBus, HttpMethod, RealClock,
    RequestId,
};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    error::{ClientError, Result, TransportError},
    handle::CallHandle,
    retry::{RetryContext, RetryDecision, RetryPolicy},
    transport::Transport,
};

/// HTTP client that publishes a lifecycle event around every call.
///
/// Cheap to clone; clones share the transport, bus and policy.
#[derive(Clone)]
pub struct AuditedClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    bus: Arc<dyn EventBus>,
    retry: Option<RetryPolicy>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for AuditedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditedClient")
            .field("transport", &self.inner.transport)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AuditedClient`].
#[derive(Debug)]
pub struct AuditedClientBuilder {
    transport: Arc<dyn Transport>,
    bus: Arc<dyn EventBus>,
    retry: Option<RetryPolicy>,
    clock: Option<Arc<dyn Clock>>,
}

impl AuditedClientBuilder {
    /// Attaches a retry policy. Without one every failure is final.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Uses `clock` for event timestamps and backoff sleeps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Finishes the client.
    pub fn build(self) -> AuditedClient {
        let clock = self.clock.unwrap_or_else(|| Arc::new(RealClock::new()));
        AuditedClient {
            inner: Arc::new(Inner {
                transport: self.transport,
                bus: self.bus,
                retry: self.retry,
                clock,
            }),
        }
    }
}

impl AuditedClient {
    /// Starts building a client over `transport` publishing to `bus`.
    pub fn builder(
        transport: Arc<dyn Transport>,
        bus: Arc<dyn EventBus>,
    ) -> AuditedClientBuilder {
        AuditedClientBuilder { transport, bus, retry: None, clock: None }
    }

    /// Client without a retry policy, using the system clock.
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<dyn EventBus>) -> Self {
        Self::builder(transport, bus).build()
    }

    /// Attached retry policy, if any.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.inner.retry.as_ref()
    }

    /// GET `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` or `ClientError::RetryExhausted`
    /// when no attempt succeeded.
    pub async fn get(&self, endpoint: &str) -> Result<CallResponse> {
        let request = self.begin(HttpMethod::Get, endpoint, None);
        self.inner.run(request).await
    }

    /// POST a raw string payload to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` or `ClientError::RetryExhausted`
    /// when no attempt succeeded.
    pub async fn post(&self, endpoint: &str, payload: impl Into<String>) -> Result<CallResponse> {
        self.call(HttpMethod::Post, endpoint, Some(payload.into())).await
    }

    /// Calls `endpoint` with an optional payload. A POST without a payload
    /// goes out with no body.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` or `ClientError::RetryExhausted`
    /// when no attempt succeeded.
    pub async fn call(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Option<String>,
    ) -> Result<CallResponse> {
        let request = self.begin(method, endpoint, payload);
        self.inner.run(request).await
    }

    /// POST `body` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Serialization` before anything is published if
    /// `body` cannot be serialized, otherwise as [`AuditedClient::post`].
    pub async fn post_json<B>(&self, endpoint: &str, body: &B) -> Result<CallResponse>
    where
        B: Serialize + ?Sized,
    {
        let payload = serialize(body)?;
        self.post(endpoint, payload).await
    }

    /// GET `endpoint` and deserialize the JSON response into `T`.
    ///
    /// # Errors
    ///
    /// As [`AuditedClient::get`], plus `ClientError::Deserialization` when
    /// the call succeeded but its body is not a `T`.
    pub async fn get_typed<T>(&self, endpoint: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = self.begin(HttpMethod::Get, endpoint, None);
        let request_id = request.request_id().clone();
        let response = self.inner.run(request).await?;
        deserialize(&request_id, &response)
    }

    /// POST `body` as JSON and deserialize the JSON response into `T`.
    ///
    /// # Errors
    ///
    /// As [`AuditedClient::post_json`], plus `ClientError::Deserialization`
    /// when the call succeeded but its body is not a `T`.
    pub async fn post_typed<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serialize(body)?;
        let request = self.begin(HttpMethod::Post, endpoint, Some(payload));
        let request_id = request.request_id().clone();
        let response = self.inner.run(request).await?;
        deserialize(&request_id, &response)
    }

    /// Detached GET. `Initiated` is published before this returns.
    pub fn get_async(&self, endpoint: &str) -> CallHandle<CallResponse> {
        let request = self.begin(HttpMethod::Get, endpoint, None);
        self.spawn(request, |_, response| Ok(response))
    }

    /// Detached POST of a raw string payload.
    pub fn post_async(
        &self,
        endpoint: &str,
        payload: impl Into<String>,
    ) -> CallHandle<CallResponse> {
        self.call_async(HttpMethod::Post, endpoint, Some(payload.into()))
    }

    /// Detached [`AuditedClient::call`].
    pub fn call_async(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Option<String>,
    ) -> CallHandle<CallResponse> {
        let request = self.begin(method, endpoint, payload);
        self.spawn(request, |_, response| Ok(response))
    }

    /// Detached POST of `body` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Serialization` immediately, with nothing
    /// published and nothing spawned, if `body` cannot be serialized.
    pub fn post_json_async<B>(&self, endpoint: &str, body: &B) -> Result<CallHandle<CallResponse>>
    where
        B: Serialize + ?Sized,
    {
        let payload = serialize(body)?;
        Ok(self.post_async(endpoint, payload))
    }

    /// Detached typed GET.
    pub fn get_typed_async<T>(&self, endpoint: &str) -> CallHandle<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let request = self.begin(HttpMethod::Get, endpoint, None);
        self.spawn(request, |request_id, response| deserialize(request_id, &response))
    }

    /// Detached typed POST.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Serialization` immediately if `body` cannot be
    /// serialized.
    pub fn post_typed_async<B, T>(&self, endpoint: &str, body: &B) -> Result<CallHandle<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let payload = serialize(body)?;
        let request = self.begin(HttpMethod::Post, endpoint, Some(payload));
        Ok(self.spawn(request, |request_id, response| deserialize(request_id, &response)))
    }

    /// Builds the request and publishes `Initiated` for it.
    fn begin(&self, method: HttpMethod, endpoint: &str, payload: Option<String>) -> CallRequest {
        let request = CallRequest::new(method, endpoint, payload);
        debug!(
            request_id = %request.request_id(),
            method = %method,
            endpoint = %endpoint,
            "call initiated"
        );
        self.inner.bus.publish(CallEvent::initiated(request.clone(), self.inner.clock.now_utc()));
        request
    }

    fn spawn<T, F>(&self, request: CallRequest, finish: F) -> CallHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&RequestId, CallResponse) -> Result<T> + Send + 'static,
    {
        let request_id = request.request_id().clone();
        let inner = self.inner.clone();
        let task_request_id = request_id.clone();

        let task = tokio::spawn(async move {
            let response = inner.run(request).await?;
            finish(&task_request_id, response)
        });

        CallHandle::new(request_id, task)
    }
}

impl Inner {
    /// Attempt loop for one logical call.
    async fn run(&self, request: CallRequest) -> Result<CallResponse> {
        let mut ctx = RetryContext::new(request, self.retry.clone());

        loop {
            let attempt = ctx.attempt();
            let error = match self.attempt(ctx.request(), attempt).await {
                Ok(response) => {
                    info!(
                        request_id = %ctx.request().request_id(),
                        status = response.status_code(),
                        attempt,
                        "call succeeded"
                    );
                    self.bus.publish(CallEvent::success(
                        ctx.request().clone(),
                        response.clone(),
                        self.clock.now_utc(),
                    ));
                    return Ok(response);
                },
                Err(error) => error,
            };

            warn!(
                request_id = %ctx.request().request_id(),
                attempt,
                error = %error,
                "call attempt failed"
            );
            self.bus.publish(CallEvent::error(
                ctx.request().clone(),
                error.to_cause(),
                attempt,
                self.clock.now_utc(),
            ));

            match ctx.decide(&error) {
                RetryDecision::Retry { delay } => {
                    debug!(
                        request_id = %ctx.request().request_id(),
                        delay_ms = delay.as_millis(),
                        "retrying call"
                    );
                    self.clock.sleep(delay).await;
                    ctx.advance();
                },
                RetryDecision::Exhausted { attempts } => {
                    let request_id = ctx.into_request().request_id().clone();
                    return Err(ClientError::RetryExhausted { request_id, attempts, last: error });
                },
                RetryDecision::NotRetryable { reason } => {
                    debug!(request_id = %ctx.request().request_id(), %reason, "not retrying");
                    let request_id = ctx.into_request().request_id().clone();
                    return Err(ClientError::Transport { request_id, source: error });
                },
            }
        }
    }

    /// One transport call. Non-2xx statuses and transport panics become
    /// `TransportError`s.
    async fn attempt(
        &self,
        request: &CallRequest,
        attempt: u32,
    ) -> std::result::Result<CallResponse, TransportError> {
        let span = info_span!(
            "api_call",
            request_id = %request.request_id(),
            method = %request.method(),
            endpoint = %request.endpoint(),
            attempt
        );

        async move {
            let send =
                self.transport.send(request.method(), request.endpoint(), request.payload());
            let response = match AssertUnwindSafe(send).catch_unwind().await {
                Ok(outcome) => outcome?,
                Err(payload) => {
                    return Err(TransportError::internal(panic_message(payload.as_ref())));
                },
            };

            if !response.is_success() {
                return Err(TransportError::status(response.status_code, response.body));
            }

            Ok(CallResponse::new(response.body, response.status_code))
        }
        .instrument(span)
        .await
    }
}

fn serialize<B>(body: &B) -> Result<String>
where
    B: Serialize + ?Sized,
{
    serde_json::to_string(body).map_err(|source| ClientError::Serialization { source })
}

fn deserialize<T>(request_id: &RequestId, response: &CallResponse) -> Result<T>
where
    T: DeserializeOwned,
{
    serde_json::from_str(response.data())
        .map_err(|source| ClientError::Deserialization { request_id: request_id.clone(), source })
}
