//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`, falling back to
//! `grpc.reflection.v1alpha` for servers that only speak the older protocol. Both versions
//! share the same messages, only the service path differs.
//!
//! This client is responsible for building a complete `FileDescriptorSet` by querying
//! a server that supports reflection. It handles dependency management by inspecting
//! imports and fetching missing files until the entire schema tree for the requested
//! symbols is resolved.
//!
//! Requests are queued before the stream is opened. Servers may hold back their response
//! headers until the first request arrives, so nothing is awaited before the stream has
//! something to send.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use crate::error::ErrorKind;
use http::uri::PathAndQuery;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

impl ReflectionResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServerStreamInitFailed(status) | Self::ServerStreamFailure(status) => {
                match status.code() {
                    tonic::Code::Unimplemented => ErrorKind::Unimplemented,
                    tonic::Code::NotFound => ErrorKind::NotFound,
                    tonic::Code::Unavailable => ErrorKind::Unavailable,
                    _ => ErrorKind::Internal,
                }
            }
            // gRPC NOT_FOUND, the requested symbol is unknown to the server
            Self::ServerError { code: 5, .. } => ErrorKind::NotFound,
            Self::DecodeError(_) => ErrorKind::Decode,
            _ => ErrorKind::Internal,
        }
    }
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
const EMPTY_HOST: &str = "";

/// Version of the reflection protocol spoken with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionProtocol {
    V1,
    V1Alpha,
}

impl ReflectionProtocol {
    fn path(self) -> PathAndQuery {
        match self {
            Self::V1 => PathAndQuery::from_static(
                "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
            ),
            Self::V1Alpha => PathAndQuery::from_static(
                "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
            ),
        }
    }
}

type RequestSender = mpsc::UnboundedSender<ServerReflectionRequest>;

/// A generic client for the gRPC Server Reflection Protocol.
pub struct ReflectionClient<T = Channel> {
    client: tonic::client::Grpc<T>,
    protocol: Option<ReflectionProtocol>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S) -> Self {
        let client = tonic::client::Grpc::new(channel);
        Self {
            client,
            protocol: None,
        }
    }

    /// The protocol the server accepted, `None` until a stream has been opened.
    pub fn protocol(&self) -> Option<ReflectionProtocol> {
        self.protocol
    }

    /// Opens a reflection stream with `initial` already queued on it.
    ///
    /// `v1` is tried first unless a protocol was already agreed on. A server answering
    /// `Unimplemented` gets a second attempt with `v1alpha`.
    async fn open_stream(
        &mut self,
        initial: Vec<ServerReflectionRequest>,
    ) -> Result<(Streaming<ServerReflectionResponse>, RequestSender), ReflectionResolveError> {
        let candidates: &[ReflectionProtocol] = match self.protocol {
            Some(ReflectionProtocol::V1) => &[ReflectionProtocol::V1],
            Some(ReflectionProtocol::V1Alpha) => &[ReflectionProtocol::V1Alpha],
            None => &[ReflectionProtocol::V1, ReflectionProtocol::V1Alpha],
        };

        let mut last_status = None;

        for &protocol in candidates {
            let (tx, rx) = mpsc::unbounded_channel();
            for req in &initial {
                tx.send(req.clone())
                    .map_err(|_| ReflectionResolveError::SendFailed)?;
            }

            self.client.ready().await.map_err(|e| {
                let e: BoxError = e.into();
                ReflectionResolveError::ServerStreamInitFailed(tonic::Status::unavailable(
                    crate::error::display_chain(e.as_ref()),
                ))
            })?;

            let request = tonic::Request::new(UnboundedReceiverStream::new(rx));
            let outcome: Result<tonic::Response<Streaming<ServerReflectionResponse>>, _> = self
                .client
                .streaming(request, protocol.path(), tonic_prost::ProstCodec::default())
                .await;

            match outcome {
                Ok(response) => {
                    self.protocol = Some(protocol);
                    return Ok((response.into_inner(), tx));
                }
                Err(status) if status.code() == tonic::Code::Unimplemented => {
                    tracing::debug!(?protocol, "reflection protocol not served");
                    last_status = Some(status);
                }
                Err(status) => return Err(ReflectionResolveError::ServerStreamInitFailed(status)),
            }
        }

        Err(ReflectionResolveError::ServerStreamInitFailed(
            last_status.unwrap_or_else(|| tonic::Status::unimplemented("server reflection")),
        ))
    }

    /// Asks the reflection service for the file containing the requested symbol (e.g., `my.package.MyService`).
    ///
    /// # Returns
    ///
    /// * `Ok(fd_set)` - The file defining the symbol and all of its transitive dependencies.
    /// * `Err(ReflectionResolveError)` - Failed to request file descriptors to the reflection service.
    pub async fn file_descriptor_set_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        self.file_descriptor_set_by_symbols(&[symbol.to_string()])
            .await
    }

    /// Resolves several symbols over a single reflection stream.
    ///
    /// **Recursive Resolution**:
    ///    - The server returns a `FileDescriptorProto` per symbol.
    ///    - The client inspects the imports (dependencies) of every received file.
    ///    - It requests any missing dependencies until the full `FileDescriptorSet` is built.
    ///
    /// Files shared by several symbols are fetched only once.
    pub async fn file_descriptor_set_by_symbols(
        &mut self,
        symbols: &[String],
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        if symbols.is_empty() {
            return Ok(FileDescriptorSet::default());
        }

        let requests = symbols
            .iter()
            .map(|symbol| ServerReflectionRequest {
                host: EMPTY_HOST.to_string(),
                message_request: Some(MessageRequest::FileContainingSymbol(symbol.clone())),
            })
            .collect();

        let (mut response_stream, tx) = self.open_stream(requests).await?;

        let file_map = collect_descriptors(&mut response_stream, tx, symbols.len()).await?;

        Ok(FileDescriptorSet {
            file: file_map.into_values().collect(),
        })
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(MessageRequest::ListServices(String::new())),
        };

        let (mut response_stream, tx) = self.open_stream(vec![req]).await?;
        // Nothing else is asked on this stream.
        drop(tx);

        let response = response_stream
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ListServicesResponse(resp)) => {
                let services = resp.service.into_iter().map(|s| s.name).collect();
                Ok(services)
            }
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(other) => Err(ReflectionResolveError::UnexpectedResponseType(format!(
                "{other:?}",
            ))),
            None => Err(ReflectionResolveError::UnexpectedResponseType(
                "Empty Message".into(),
            )),
        }
    }
}

async fn collect_descriptors(
    response_stream: &mut Streaming<ServerReflectionResponse>,
    request_channel: RequestSender,
    initial_requests: usize,
) -> Result<HashMap<String, FileDescriptorProto>, ReflectionResolveError> {
    let mut inflight = initial_requests;
    let mut collected_files = HashMap::new();
    let mut requested = HashSet::new();

    while inflight > 0 {
        let response = response_stream
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        inflight -= 1;

        match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(res)) => {
                let sent_count = process_descriptor_batch(
                    res.file_descriptor_proto,
                    &mut collected_files,
                    &mut requested,
                    &request_channel,
                )?;

                inflight += sent_count;
            }
            Some(MessageResponse::ErrorResponse(e)) => {
                return Err(ReflectionResolveError::ServerError {
                    message: e.error_message,
                    code: e.error_code,
                });
            }
            Some(other) => {
                return Err(ReflectionResolveError::UnexpectedResponseType(format!(
                    "{other:?}"
                )));
            }
            None => {
                return Err(ReflectionResolveError::UnexpectedResponseType(
                    "Empty Message".into(),
                ));
            }
        }
    }

    Ok(collected_files)
}

fn process_descriptor_batch(
    raw_protos: Vec<Vec<u8>>,
    collected_files: &mut HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &RequestSender,
) -> Result<usize, ReflectionResolveError> {
    let mut sent_count = 0;

    for raw in raw_protos {
        let fd = FileDescriptorProto::decode(raw.as_ref())?;

        if let Some(name) = &fd.name
            && !collected_files.contains_key(name)
        {
            // A file arriving unrequested (e.g. bundled with a symbol's file) must not
            // be requested again later.
            requested.insert(name.clone());
            sent_count += queue_dependencies(&fd, collected_files, requested, tx)?;

            collected_files.insert(name.clone(), fd);
        }
    }

    Ok(sent_count)
}

fn queue_dependencies(
    fd: &FileDescriptorProto,
    collected_files: &HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &RequestSender,
) -> Result<usize, ReflectionResolveError> {
    let mut count = 0;

    for dep in &fd.dependency {
        if !collected_files.contains_key(dep) && requested.insert(dep.clone()) {
            let req = ServerReflectionRequest {
                host: EMPTY_HOST.to_string(),
                message_request: Some(MessageRequest::FileByFilename(dep.clone())),
            };

            tx.send(req)
                .map_err(|_| ReflectionResolveError::SendFailed)?;
            count += 1;
        }
    }

    Ok(count)
}
