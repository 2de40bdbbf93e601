//! # Reflection Client
//!
//! A client for `grpc.reflection.v1`.
//!
//! Every query opens one `ServerReflectionInfo` stream (a [`Session`]). Resolving symbols is a
//! conversation on that stream: each received file is inspected for imports, and any import not
//! yet seen is asked for on the same stream, until every outstanding request has been answered
//! and the collected set is closed under imports.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use super::generated::reflection_v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};
use crate::BoxError;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error("Could not open a reflection stream, the server may not support reflection: '{0}'")]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The reflection stream failed: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("The reflection stream closed before every request was answered")]
    StreamClosed,

    #[error("Could not queue a request on the reflection stream")]
    SendFailed,

    #[error("Reflection request rejected with code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Unexpected reflection response: {0}")]
    UnexpectedResponseType(String),

    #[error("Received an undecodable FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Reflection did not answer within {0:?}")]
    TimedOut(Duration),
}

// Servers ignore the host field in practice.
const HOST: &str = "";

// Requests queued ahead of the server's answers.
const OUTBOX_CAPACITY: usize = 64;

/// A generic client for the gRPC Server Reflection Protocol.
pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S) -> Self {
        Self {
            client: ServerReflectionClient::new(channel),
        }
    }

    /// Fetches the file declaring `symbol` (e.g. `my.package.MyService`) and all of its
    /// transitive imports.
    pub async fn file_descriptor_set_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        self.file_descriptor_set_by_symbols(&[symbol.to_string()]).await
    }

    /// Fetches the files declaring every one of `symbols` plus their transitive imports, over a
    /// single stream. Files shared between symbols are fetched once.
    ///
    /// # Returns
    ///
    /// * `Ok(fd_set)` - Every requested file and its dependencies.
    /// * `Err(ReflectionResolveError)` - The stream could not be opened or failed, or a symbol
    ///   is unknown.
    pub async fn file_descriptor_set_by_symbols(
        &mut self,
        symbols: &[String],
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        if symbols.is_empty() {
            return Ok(FileDescriptorSet::default());
        }

        let mut session = self.open().await?;
        let mut files = FileCollector::default();

        for symbol in symbols {
            session
                .ask(MessageRequest::FileContainingSymbol(symbol.clone()))
                .await?;
            files.outstanding += 1;
        }

        while files.outstanding > 0 {
            let reply = session.next_reply().await?;
            files.outstanding -= 1;

            let MessageResponse::FileDescriptorResponse(batch) = reply else {
                return Err(unexpected(&reply));
            };

            for missing in files.absorb(batch.file_descriptor_proto)? {
                session.ask(MessageRequest::FileByFilename(missing)).await?;
                files.outstanding += 1;
            }
        }

        Ok(files.into_set())
    }

    /// Lists the fully qualified names of every service exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let mut session = self.open().await?;

        session.ask(MessageRequest::ListServices(String::new())).await?;

        match session.next_reply().await? {
            MessageResponse::ListServicesResponse(list) => {
                Ok(list.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn open(&mut self) -> Result<Session, ReflectionResolveError> {
        let (outbox, rx) = mpsc::channel(OUTBOX_CAPACITY);

        let inbox = self
            .client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        Ok(Session { outbox, inbox })
    }
}

/// One open `ServerReflectionInfo` stream.
struct Session {
    outbox: mpsc::Sender<ServerReflectionRequest>,
    inbox: Streaming<ServerReflectionResponse>,
}

impl Session {
    async fn ask(&self, request: MessageRequest) -> Result<(), ReflectionResolveError> {
        let request = ServerReflectionRequest {
            host: HOST.to_string(),
            message_request: Some(request),
        };

        self.outbox
            .send(request)
            .await
            .map_err(|_| ReflectionResolveError::SendFailed)
    }

    /// Waits for the next answer. Error responses from the server become errors.
    async fn next_reply(&mut self) -> Result<MessageResponse, ReflectionResolveError> {
        let response = self
            .inbox
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(reply) => Ok(reply),
            None => Err(ReflectionResolveError::UnexpectedResponseType(
                "empty response".to_string(),
            )),
        }
    }
}

/// Files received so far, keyed by name, plus the bookkeeping of what was already asked for.
#[derive(Default)]
struct FileCollector {
    files: BTreeMap<String, FileDescriptorProto>,
    asked: HashSet<String>,
    outstanding: usize,
}

impl FileCollector {
    /// Stores a batch of serialized files and returns the imports that still have to be fetched.
    fn absorb(&mut self, batch: Vec<Vec<u8>>) -> Result<Vec<String>, ReflectionResolveError> {
        let mut missing = Vec::new();

        for raw in batch {
            let file = FileDescriptorProto::decode(raw.as_slice())?;
            let Some(name) = file.name.clone() else {
                continue;
            };
            if self.files.contains_key(&name) {
                continue;
            }

            self.asked.insert(name.clone());

            for import in &file.dependency {
                if !self.files.contains_key(import) && self.asked.insert(import.clone()) {
                    missing.push(import.clone());
                }
            }

            self.files.insert(name, file);
        }

        Ok(missing)
    }

    fn into_set(self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.files.into_values().collect(),
        }
    }
}

fn unexpected(reply: &MessageResponse) -> ReflectionResolveError {
    ReflectionResolveError::UnexpectedResponseType(format!("{reply:?}"))
}
