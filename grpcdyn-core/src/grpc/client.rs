//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to perform unary calls with dynamic
//! messages. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to handle serialization.
//! Every call goes through the streaming code path of `tonic` with a single request
//! message, which gives access to the response headers before the body and to the
//! trailers after it. This is also how methods declared as streaming are invoked with
//! a single message.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Size limits**: Oversized requests are rejected before any I/O, oversized responses by the codec.
//! * **Deadlines**: Sent as `grpc-timeout` and enforced locally.
use super::codec::DynamicCodec;
use crate::BoxError;
use http_body::Body as HttpBody;
use prost::Message;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use std::time::Duration;
use tonic::{Status, client::GrpcService, metadata::MetadataMap, transport::Channel};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Invalid gRPC path '{path}': '{source}'")]
    InvalidPath {
        path: String,
        source: http::uri::InvalidUri,
    },
}

/// Per-connection message size limits, `None` meaning the transport default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageLimits {
    pub max_receive: Option<usize>,
    pub max_send: Option<usize>,
}

/// Everything observed during one unary exchange.
#[derive(Debug)]
pub struct UnaryCall {
    /// Response headers, empty for trailers-only responses.
    pub headers: MetadataMap,
    /// The response message, or the final status.
    pub result: Result<DynamicMessage, Status>,
    /// Response trailers, or the metadata of the failing status.
    pub trailers: MetadataMap,
}

impl UnaryCall {
    fn rejected(status: Status) -> Self {
        Self {
            headers: MetadataMap::new(),
            result: Err(status),
            trailers: MetadataMap::new(),
        }
    }
}

/// A dynamic unary gRPC client.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
    limits: MessageLimits,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self::with_limits(service, MessageLimits::default())
    }

    pub fn with_limits(service: S, limits: MessageLimits) -> Self {
        let mut client = tonic::client::Grpc::new(service);

        // Configured limits are enforced with their own error messages, the transport
        // must not reject the frames first.
        if limits.max_receive.is_some() {
            client = client.max_decoding_message_size(usize::MAX);
        }
        if limits.max_send.is_some() {
            client = client.max_encoding_message_size(usize::MAX);
        }

        Self { client, limits }
    }

    pub fn limits(&self) -> MessageLimits {
        self.limits
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Arguments
    ///
    /// * `method` - The method to call, its input type must match `message`.
    /// * `message` - The request message.
    /// * `metadata` - Outgoing request metadata.
    /// * `timeout` - Deadline for the whole exchange.
    ///
    /// # Returns
    ///
    /// * `Ok(UnaryCall)` - The RPC was attempted, `result` tells whether the server answered
    ///   with a message or a status. Transport failures and deadlines are statuses as well.
    /// * `Err(GrpcRequestError)` - The request could not be built.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        message: DynamicMessage,
        metadata: MetadataMap,
        timeout: Option<Duration>,
    ) -> Result<UnaryCall, GrpcRequestError> {
        let path = http_path(method)?;

        if let Some(max) = self.limits.max_send {
            let len = message.encoded_len();
            if len > max {
                return Ok(UnaryCall::rejected(Status::resource_exhausted(format!(
                    "grpc: trying to send message larger than max ({len} vs. {max})"
                ))));
            }
        }

        let codec = DynamicCodec::new(method.input(), method.output(), self.limits.max_receive);
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = metadata;
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }

        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        let mut headers = MetadataMap::new();
        let mut trailers = MetadataMap::new();

        let exchange = async {
            self.client
                .ready()
                .await
                .map_err(|e| Status::unavailable(display_box_error(e.into())))?;

            let response = self.client.server_streaming(request, path, codec).await?;
            headers = response.metadata().clone();

            let mut stream = response.into_inner();
            let message = stream.message().await?.ok_or_else(|| {
                Status::internal("server closed the stream without sending a response message")
            })?;

            if let Some(received) = stream.trailers().await? {
                trailers = received;
            }

            Ok::<_, Status>(message)
        };

        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, exchange).await {
                // The transport may cut the stream on the `grpc-timeout` it sent before the
                // local timer fires, which surfaces as a cancellation.
                Ok(Err(_)) if tokio::time::Instant::now() >= deadline => {
                    Err(Status::deadline_exceeded("context deadline exceeded"))
                }
                Ok(outcome) => outcome,
                Err(_) => Err(Status::deadline_exceeded("context deadline exceeded")),
            },
            None => exchange.await,
        };

        if let Err(status) = &outcome
            && trailers.is_empty()
        {
            trailers = status.metadata().clone();
        }

        Ok(UnaryCall {
            headers,
            result: outcome,
            trailers,
        })
    }
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path)
        .map_err(|source| GrpcRequestError::InvalidPath { path, source })
}

fn display_box_error(error: BoxError) -> String {
    crate::error::display_chain(error.as_ref())
}
