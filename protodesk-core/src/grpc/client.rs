//! # Dynamic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to put `DynamicMessage`
//! values on the wire. It only needs the `MethodDescriptor` to know which path to call and
//! which message types to expect.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Metadata Handling**: Converts key/value string pairs into Tonic's `MetadataMap` for headers.
//! * **Access Patterns**: Provides specific methods for Unary, Server Streaming, Client Streaming,
//!   and Bidirectional Streaming calls, plus [`GrpcClient::invoke`] which dispatches on the
//!   method's streaming flags.
use super::codec::DynamicCodec;
use crate::BoxError;
use futures_util::{Stream, StreamExt, stream};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use std::time::Duration;
use tonic::{
    Status,
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
    #[error("'{0}' is not a valid gRPC path")]
    InvalidPath(String),
    #[error("'{0}' expects exactly one request message")]
    SingleMessageExpected(String),
}

/// What came back from a call that reached the server.
#[derive(Debug)]
pub enum Reply {
    /// The single response of a unary or client streaming call.
    Message(DynamicMessage),
    /// Every response of a server streaming or bidirectional call, in arrival order.
    Messages(Vec<DynamicMessage>),
    /// The call (or the response stream) ended with a non-OK status.
    Fault(Status),
}

/// A generic client for calling any gRPC method described by a `MethodDescriptor`.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Calls `method` with `messages`, waiting for the whole response.
    ///
    /// Streaming responses are drained until the server closes the stream. The first
    /// non-OK status (initial or mid-stream) wins and is returned as [`Reply::Fault`].
    pub async fn invoke(
        &mut self,
        method: MethodDescriptor,
        messages: Vec<DynamicMessage>,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Reply, GrpcRequestError> {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => {
                let message = single(&method, messages)?;
                let result = self.unary(method, message, headers, timeout).await?;
                Ok(result.map_or_else(Reply::Fault, Reply::Message))
            }
            (false, true) => {
                let message = single(&method, messages)?;
                match self
                    .server_streaming(method, message, headers, timeout)
                    .await?
                {
                    Ok(stream) => Ok(drain(stream).await),
                    Err(status) => Ok(Reply::Fault(status)),
                }
            }
            (true, false) => {
                let result = self
                    .client_streaming(method, stream::iter(messages), headers, timeout)
                    .await?;
                Ok(result.map_or_else(Reply::Fault, Reply::Message))
            }
            (true, true) => {
                match self
                    .bidirectional_streaming(method, stream::iter(messages), headers, timeout)
                    .await?
                {
                    Ok(stream) => Ok(drain(stream).await),
                    Err(status) => Ok(Reply::Fault(status)),
                }
            }
        }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(DynamicMessage))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to build the request or the client was not ready.
    pub async fn unary(
        &mut self,
        method: MethodDescriptor,
        payload: DynamicMessage,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Result<DynamicMessage, Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let path = http_path(&method)?;
        let request = build_request(payload, headers, timeout)?;

        match self.client.unary(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    pub async fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        payload: DynamicMessage,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<
        Result<impl Stream<Item = Result<DynamicMessage, Status>>, Status>,
        GrpcRequestError,
    > {
        self.ready().await?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let path = http_path(&method)?;
        let request = build_request(payload, headers, timeout)?;

        match self.client.server_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Client Streaming gRPC call (Stream of Requests -> Single Response).
    pub async fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = DynamicMessage> + Send + 'static,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Result<DynamicMessage, Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let path = http_path(&method)?;
        let request = build_request(payload_stream, headers, timeout)?;

        match self.client.client_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    pub async fn bidirectional_streaming(
        &mut self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = DynamicMessage> + Send + 'static,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<
        Result<impl Stream<Item = Result<DynamicMessage, Status>>, Status>,
        GrpcRequestError,
    > {
        self.ready().await?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let path = http_path(&method)?;
        let request = build_request(payload_stream, headers, timeout)?;

        match self.client.streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }
}

fn single(
    method: &MethodDescriptor,
    messages: Vec<DynamicMessage>,
) -> Result<DynamicMessage, GrpcRequestError> {
    let mut messages = messages.into_iter();

    match (messages.next(), messages.next()) {
        (Some(message), None) => Ok(message),
        _ => Err(GrpcRequestError::SingleMessageExpected(
            method.full_name().to_string(),
        )),
    }
}

async fn drain(stream: impl Stream<Item = Result<DynamicMessage, Status>>) -> Reply {
    let mut stream = std::pin::pin!(stream);
    let mut messages = Vec::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => messages.push(message),
            Err(status) => {
                tracing::debug!(
                    received = messages.len(),
                    code = ?status.code(),
                    "response stream ended with an error"
                );
                return Reply::Fault(status);
            }
        }
    }

    Reply::Messages(messages)
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).map_err(|_| GrpcRequestError::InvalidPath(path))
}

fn build_request<T>(
    payload: T,
    headers: Vec<(String, String)>,
    timeout: Duration,
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    request.set_timeout(timeout);

    for (k, v) in headers {
        let key = MetadataKey::from_str(&k.to_ascii_lowercase()).map_err(|source| {
            GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            }
        })?;
        let val = MetadataValue::from_str(&v)
            .map_err(|source| GrpcRequestError::InvalidMetadataValue { key: k, source })?;
        request.metadata_mut().append(key, val);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keys_are_lowercased_and_repeated_keys_kept() {
        let headers = vec![
            ("X-Trace".to_string(), "a".to_string()),
            ("x-trace".to_string(), "b".to_string()),
        ];

        let request = build_request((), headers, Duration::from_secs(1)).unwrap();
        let values: Vec<_> = request
            .metadata()
            .get_all("x-trace")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();

        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn invalid_header_key_is_rejected() {
        let headers = vec![("bad key".to_string(), "v".to_string())];
        let err = build_request((), headers, Duration::from_secs(1)).unwrap_err();

        assert!(matches!(
            err,
            GrpcRequestError::InvalidMetadataKey { key, .. } if key == "bad key"
        ));
    }
}
