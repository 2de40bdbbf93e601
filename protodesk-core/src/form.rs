//! # Form
//!
//! One call slot of a project: where to call ([`FormState::address`]), with which metadata
//! ([`Header`]s), which method and request text, and the last rendered response.
//!
//! A form exclusively owns its [`Connection`] and the cancellation handle of its call in
//! flight. Its fields sit behind a short-lived mutex that is never held across an `.await`,
//! so reading a form while it is calling never blocks.
use crate::config::EngineConfig;
use crate::connection::{ConnectError, Connection};
use crate::grpc::client::{GrpcClient, GrpcRequestError, Reply};
use crate::grpc::codec::{self, CodecError};
use crate::grpc::fault::{FaultDocument, decode_fault};
use crate::schema::{Generation, TypeResolver};
use futures_util::future::{AbortHandle, Abortable};
use prost_reflect::MethodDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tonic::Code;
use tonic::transport::Channel;
use uuid::Uuid;

/// Request text of a form without a selected method.
pub const EMPTY_REQUEST: &str = "{}";
/// Response text of a form that has not received anything yet.
pub const EMPTY_RESPONSE: &str = "";

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("No method is selected")]
    NoMethodSelected,
    #[error(transparent)]
    Payload(#[from] CodecError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub id: Uuid,
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The persisted fields of a form.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FormState {
    pub id: Uuid,
    pub address: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, with = "empty_as_none")]
    pub selected_method_id: Option<String>,
    #[serde(default = "empty_request")]
    pub request_text: String,
    #[serde(default)]
    pub response_text: String,
}

impl FormState {
    pub fn new(address: impl Into<String>, headers: Vec<Header>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            headers,
            selected_method_id: None,
            request_text: EMPTY_REQUEST.to_string(),
            response_text: EMPTY_RESPONSE.to_string(),
        }
    }
}

fn empty_request() -> String {
    EMPTY_REQUEST.to_string()
}

mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or_default())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = String::deserialize(d)?;
        Ok((!value.is_empty()).then_some(value))
    }
}

/// Everything a call needs from the project, captured before the project lock is released.
#[derive(Clone)]
pub struct CallTarget {
    pub method: MethodDescriptor,
    pub resolver: Option<Arc<dyn TypeResolver>>,
    pub generation: Generation,
}

struct PendingCall {
    ticket: u64,
    handle: AbortHandle,
}

pub struct Form {
    id: Uuid,
    state: Mutex<FormState>,
    connection: tokio::sync::Mutex<Connection>,
    pending: Mutex<Option<PendingCall>>,
    tickets: AtomicU64,
    // Bumped, under the fields lock, whenever the selection is replaced or cleared.
    selections: AtomicU64,
}

impl Form {
    pub fn new(state: FormState) -> Self {
        Self {
            id: state.id,
            state: Mutex::new(state),
            connection: tokio::sync::Mutex::new(Connection::new()),
            pending: Mutex::new(None),
            tickets: AtomicU64::new(0),
            selections: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> FormState {
        self.fields().clone()
    }

    pub fn selected_method_id(&self) -> Option<String> {
        self.fields().selected_method_id.clone()
    }

    pub fn set_address(&self, address: impl Into<String>) {
        self.fields().address = address.into();
    }

    pub fn set_request_text(&self, text: impl Into<String>) {
        self.fields().request_text = text.into();
    }

    pub fn add_header(&self, header: Header) {
        self.fields().headers.push(header);
    }

    pub fn set_headers(&self, headers: Vec<Header>) {
        self.fields().headers = headers;
    }

    /// Removes the header with `header_id`, returning whether it existed.
    pub fn delete_header(&self, header_id: Uuid) -> bool {
        let mut fields = self.fields();
        let before = fields.headers.len();
        fields.headers.retain(|h| h.id != header_id);
        fields.headers.len() != before
    }

    /// Selects `method_id` with its template text. The response is always reset with it, and
    /// a call still in flight for the previous selection is cancelled.
    pub fn select(&self, method_id: impl Into<String>, request_text: impl Into<String>) {
        self.replace_selection(Some(method_id.into()), request_text.into());
    }

    pub fn clear_selection(&self) {
        self.replace_selection(None, EMPTY_REQUEST.to_string());
    }

    fn replace_selection(&self, method_id: Option<String>, request_text: String) {
        self.stop();

        let mut fields = self.fields();
        self.selections.fetch_add(1, Ordering::Relaxed);
        fields.selected_method_id = method_id;
        fields.request_text = request_text;
        fields.response_text = EMPTY_RESPONSE.to_string();
    }

    /// Number of times this form had to dial its address.
    pub async fn connection_sessions(&self) -> u64 {
        self.connection.lock().await.sessions()
    }

    /// Returns this form's channel to `address`, dialing only if the live one is bound elsewhere.
    pub async fn connect(
        &self,
        address: &str,
        generation: Generation,
        timeout: Duration,
    ) -> Result<Channel, ConnectError> {
        self.connection
            .lock()
            .await
            .ensure(address, generation, timeout)
            .await
    }

    /// Sends the current request text to `target` and stores the rendered response.
    ///
    /// A call already pending on this form is cancelled first. Malformed request text and
    /// unreachable addresses fail before anything is sent, leaving the response untouched.
    /// Anything the server answers, faults included, becomes the new response text, unless
    /// the selection changed or a newer call started while this one was in flight. The
    /// rendered response is returned either way.
    pub async fn send(
        &self,
        target: CallTarget,
        config: &EngineConfig,
    ) -> Result<String, CallError> {
        let (address, headers, request_text, selection) = {
            let fields = self.fields();
            let selection = self.selections.load(Ordering::Relaxed);
            let headers = fields
                .headers
                .iter()
                .filter(|h| !h.key.trim().is_empty())
                .map(|h| (h.key.trim().to_string(), h.value.clone()))
                .collect::<Vec<_>>();
            (
                fields.address.clone(),
                headers,
                fields.request_text.clone(),
                selection,
            )
        };

        let messages = codec::request_messages(&target.method, &request_text)?;

        self.stop();

        let channel = self
            .connect(&address, target.generation, config.connect_timeout())
            .await?;

        let (handle, registration) = AbortHandle::new_pair();
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        *self.pending_slot() = Some(PendingCall { ticket, handle });

        tracing::debug!(
            form = %self.id,
            method = target.method.full_name(),
            address = %address,
            "sending request"
        );

        let mut client = GrpcClient::new(channel);
        let call = tokio::time::timeout(
            config.call_timeout(),
            client.invoke(target.method.clone(), messages, headers, config.call_timeout()),
        );
        let outcome = Abortable::new(call, registration).await;

        {
            let mut pending = self.pending_slot();
            if pending.as_ref().is_some_and(|p| p.ticket == ticket) {
                *pending = None;
            }
        }

        let response = match outcome {
            Err(_aborted) => FaultDocument::local(Code::Cancelled, "call cancelled").to_text(),
            Ok(Err(_elapsed)) => {
                FaultDocument::local(Code::DeadlineExceeded, "call timed out").to_text()
            }
            Ok(Ok(reply)) => render(reply?, target.resolver.as_deref())?,
        };

        {
            let mut fields = self.fields();
            let latest = self.tickets.load(Ordering::Relaxed) == ticket + 1;
            if latest && self.selections.load(Ordering::Relaxed) == selection {
                fields.response_text = response.clone();
            } else {
                tracing::debug!(form = %self.id, "discarding response of a superseded call");
            }
        }

        Ok(response)
    }

    /// Cancels the call in flight, if any. Idempotent.
    pub fn stop(&self) {
        if let Some(pending) = self.pending_slot().take() {
            tracing::debug!(form = %self.id, "cancelling pending call");
            pending.handle.abort();
        }
    }

    /// Cancels any pending call and releases the connection. Idempotent.
    pub async fn close(&self) {
        self.stop();
        self.connection.lock().await.close();
    }

    fn fields(&self) -> MutexGuard<'_, FormState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_slot(&self) -> MutexGuard<'_, Option<PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn render(reply: Reply, resolver: Option<&dyn TypeResolver>) -> Result<String, CodecError> {
    let value = match reply {
        Reply::Message(message) => codec::message_to_json(&message)?,
        Reply::Messages(messages) => Value::Array(
            messages
                .iter()
                .map(codec::message_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Reply::Fault(status) => decode_fault(&status, resolver).to_value(),
    };

    Ok(codec::to_text(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> Form {
        Form::new(FormState::new("localhost:50051", Vec::new()))
    }

    #[test]
    fn stop_without_pending_call_is_a_noop() {
        let form = form();
        form.stop();
        form.stop();
        assert!(form.pending_slot().is_none());
    }

    #[test]
    fn selecting_resets_the_response() {
        let form = form();
        form.fields().response_text = "{\"old\": true}".to_string();

        form.select("Greeter.SayHello", "{\n    \"name\": \"\"\n}");

        let state = form.snapshot();
        assert_eq!(state.selected_method_id.as_deref(), Some("Greeter.SayHello"));
        assert_eq!(state.response_text, EMPTY_RESPONSE);
    }

    #[tokio::test]
    async fn selecting_cancels_the_call_in_flight() {
        let form = form();
        let (handle, registration) = AbortHandle::new_pair();
        *form.pending_slot() = Some(PendingCall { ticket: 0, handle });

        form.select("Greeter.SayHello", "{}");

        let call = Abortable::new(std::future::pending::<()>(), registration);
        assert!(call.await.is_err());
        assert!(form.pending_slot().is_none());
    }

    #[test]
    fn clearing_restores_canonical_empties() {
        let form = form();
        form.select("Greeter.SayHello", "{}");
        form.clear_selection();

        let state = form.snapshot();
        assert_eq!(state.selected_method_id, None);
        assert_eq!(state.request_text, EMPTY_REQUEST);
        assert_eq!(state.response_text, EMPTY_RESPONSE);
    }

    #[test]
    fn delete_header_only_removes_the_matching_id() {
        let form = form();
        let kept = Header::new("a", "1");
        let removed = Header::new("b", "2");
        form.set_headers(vec![kept.clone(), removed.clone()]);

        assert!(form.delete_header(removed.id));
        assert!(!form.delete_header(removed.id));
        assert_eq!(form.snapshot().headers, vec![kept]);
    }

    #[test]
    fn missing_selection_serializes_as_empty_string() {
        let state = FormState::new("localhost:50051", Vec::new());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["selected_method_id"], "");

        let back: FormState = serde_json::from_value(json).unwrap();
        assert_eq!(back.selected_method_id, None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let form = form();
        form.close().await;
        form.close().await;
        assert_eq!(
            form.connection.lock().await.state(),
            crate::connection::ConnectionState::Unconnected
        );
    }
}
