//! # grpcdyn Client
//!
//! This module implements the script-facing API: loading definitions, connecting,
//! invoking methods and closing the connection.
//!
//! The [`Client`] keeps no global state. The host passes the current [`Phase`] to every
//! call, and each virtual user owns its own client.
//!
//! ## Example
//!
//! ```rust,no_run
//! use grpcdyn_core::{Client, Phase};
//! use grpcdyn_core::stats::Discard;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = Client::new(Arc::new(Discard));
//!
//! // Init phase: load definitions once.
//! client.load(Phase::Init, &["protos"], &["hello.proto"])?;
//!
//! // Execution phase: connect and call.
//! let params = json!({ "plaintext": true, "timeout": "2s" });
//! client.connect(Phase::Execution, "localhost:50051", Some(&params)).await?;
//!
//! let response = client
//!     .invoke(
//!         Phase::Execution,
//!         "hello.HelloService/SayHello",
//!         Some(&json!({ "greeting": "Bert" })),
//!         None,
//!     )
//!     .await?;
//! assert!(response.is_ok());
//!
//! client.close();
//! # Ok(())
//! # }
//! ```
pub mod params;
mod types;

pub use types::*;

use crate::connection::{ChannelError, Connection};
use crate::convert::{self, ConvertError};
use crate::error::ErrorKind;
use crate::grpc::client::GrpcRequestError;
use crate::grpc::metadata::{MetadataError, to_metadata_map, to_string_map};
use crate::phase::{Operation, Phase, PhaseError};
use crate::registry::{DescriptorRegistry, MethodInfo, RegistryError};
use crate::stats::{CallMeasurement, SampleSink, StatEvent, Verbosity, format_stat};
use params::{ConnectParams, ParamsError, RequestParams};
use prost::Message;
use std::path::Path;
use std::sync::Arc;
use tonic::transport::ClientTlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Phase(#[from] PhaseError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Phase(e) => e.kind(),
            Self::Registry(e) => e.kind(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Phase(#[from] PhaseError),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("failed to load descriptors through server reflection: {0}")]
    Reflection(#[source] RegistryError),
    #[error("timed out loading descriptors through server reflection after {0:?}")]
    ReflectionTimeout(std::time::Duration),
}

impl ConnectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Phase(e) => e.kind(),
            Self::Params(e) => e.kind(),
            Self::Channel(e) => e.kind(),
            Self::Reflection(e) => e.kind(),
            Self::ReflectionTimeout(_) => ErrorKind::Unavailable,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Phase(#[from] PhaseError),
    #[error("no gRPC connection")]
    NoConnection,
    #[error(transparent)]
    Method(#[from] RegistryError),
    #[error("request cannot be nil")]
    NilRequest,
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("unable to serialise request object to protocol buffer: {0}")]
    Encode(#[source] ConvertError),
    #[error("unable to convert response message: {0}")]
    Decode(#[source] ConvertError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
}

impl InvokeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Phase(e) => e.kind(),
            Self::NoConnection => ErrorKind::FailedPrecondition,
            Self::Method(e) => e.kind(),
            Self::NilRequest | Self::Metadata(_) => ErrorKind::InvalidArgument,
            Self::Params(e) => e.kind(),
            Self::Encode(e) => e.kind(),
            Self::Decode(e) => match e.kind() {
                ErrorKind::InvalidArgument => ErrorKind::Decode,
                other => other,
            },
            Self::Request(_) => ErrorKind::Internal,
        }
    }
}

/// Host-provided settings of a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// TLS settings for non-plaintext connections. Native roots when `None`.
    pub tls: Option<ClientTlsConfig>,
    /// Log every exchange at `info` level with this verbosity.
    pub debug: Option<Verbosity>,
}

/// A dynamic gRPC client owned by one virtual user.
pub struct Client {
    registry: DescriptorRegistry,
    connection: Option<Connection>,
    sink: Arc<dyn SampleSink>,
    config: ClientConfig,
}

impl Client {
    pub fn new(sink: Arc<dyn SampleSink>) -> Self {
        Self::with_config(sink, ClientConfig::default())
    }

    pub fn with_config(sink: Arc<dyn SampleSink>, config: ClientConfig) -> Self {
        Self {
            registry: DescriptorRegistry::new(),
            connection: None,
            sink,
            config,
        }
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Compiles `.proto` files and registers the methods they declare.
    ///
    /// Only allowed in the init phase. See [`DescriptorRegistry::load_from_source`].
    pub fn load<P, F>(
        &mut self,
        phase: Phase,
        import_paths: &[P],
        files: &[F],
    ) -> Result<Vec<MethodInfo>, LoadError>
    where
        P: AsRef<Path>,
        F: AsRef<Path>,
    {
        phase.check(Operation::Load)?;
        Ok(self.registry.load_from_source(import_paths, files)?)
    }

    /// Registers every method of a serialized `FileDescriptorSet`.
    ///
    /// Only allowed in the init phase.
    pub fn load_protoset(
        &mut self,
        phase: Phase,
        path: impl AsRef<Path>,
    ) -> Result<Vec<MethodInfo>, LoadError> {
        phase.check(Operation::Load)?;
        Ok(self.registry.load_from_protoset(path)?)
    }

    /// Opens a connection to `address`, replacing the current one.
    ///
    /// Parameters are validated before any network I/O. When `reflect` is set, the
    /// server's services are merged into the registry before this returns, within the
    /// connect `timeout`. If that fails the client is left without a connection.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The channel is connected.
    /// * `Err(ConnectError)` - Wrong phase, invalid parameters, unreachable server or failed reflection.
    pub async fn connect(
        &mut self,
        phase: Phase,
        address: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<(), ConnectError> {
        phase.check(Operation::Connect)?;
        let params = ConnectParams::parse(params)?;

        self.close();

        let connection = Connection::open(address, &params, self.config.tls.as_ref()).await?;

        if params.reflect {
            let mut reflection = connection.reflection();
            let load = self.registry.load_from_reflection(&mut reflection);
            tokio::time::timeout(params.timeout, load)
                .await
                .map_err(|_| ConnectError::ReflectionTimeout(params.timeout))?
                .map_err(ConnectError::Reflection)?;
        }

        self.connection = Some(connection);
        Ok(())
    }

    /// Performs a unary call of `method` (`package.Service/Method`, leading slash optional).
    ///
    /// Malformed calls (wrong phase, no connection, unknown method, missing request, bad
    /// params, request not matching the input type) fail with an [`InvokeError`] and emit
    /// no sample. Everything past that point, including RPC failures and deadlines, is
    /// reported in the returned [`InvokeResponse`] and emits exactly one sample.
    pub async fn invoke(
        &mut self,
        phase: Phase,
        method: &str,
        request: Option<&serde_json::Value>,
        params: Option<&serde_json::Value>,
    ) -> Result<InvokeResponse, InvokeError> {
        phase.check(Operation::Invoke)?;

        let connection = self
            .connection
            .as_mut()
            .ok_or(InvokeError::NoConnection)?;

        let registered = self.registry.resolve(method)?;

        let request = match request {
            None | Some(serde_json::Value::Null) => return Err(InvokeError::NilRequest),
            Some(request) => request,
        };

        let params = RequestParams::parse(params)?;
        let metadata = to_metadata_map(&params.metadata)?;
        let message = convert::encode(&self.registry, &registered.input(), request)
            .map_err(InvokeError::Encode)?;

        let full_method = registered.info().full_method.as_str();
        let timeout = params.timeout.unwrap_or(connection.timeout());
        let debug = self.config.debug;

        let mut measurement = CallMeasurement::start(
            self.sink.clone(),
            connection.address(),
            full_method,
            &params.tags,
        );

        trace_event(
            debug,
            StatEvent::OutHeader {
                full_method,
                remote_addr: connection.address(),
                metadata: &metadata,
            },
        );
        if debug.is_some() {
            trace_event(
                debug,
                StatEvent::OutPayload {
                    message: &message,
                    wire_length: message.encoded_len(),
                },
            );
        }

        let call = connection
            .grpc()
            .unary(registered.descriptor(), message, metadata, Some(timeout))
            .await?;

        measurement.set_status(match &call.result {
            Ok(_) => tonic::Code::Ok,
            Err(status) => status.code(),
        });

        trace_event(debug, StatEvent::InHeader { metadata: &call.headers });
        if let Ok(message) = &call.result {
            trace_event(
                debug,
                StatEvent::InPayload {
                    message,
                    wire_length: message.encoded_len(),
                },
            );
        }
        trace_event(debug, StatEvent::InTrailer { metadata: &call.trailers });

        let headers = to_string_map(&call.headers);
        let trailers = to_string_map(&call.trailers);

        match call.result {
            Ok(message) => {
                let value = convert::decode(&self.registry, &message).map_err(InvokeError::Decode)?;
                Ok(InvokeResponse {
                    status: tonic::Code::Ok as i32,
                    message: Some(value),
                    error: None,
                    headers,
                    trailers,
                })
            }
            Err(status) => Ok(InvokeResponse {
                status: status.code() as i32,
                message: None,
                error: Some(ErrorObject::from(&status)),
                headers,
                trailers,
            }),
        }
    }

    /// Drops the current connection, if any. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::debug!(address = connection.address(), "gRPC connection closed");
        }
    }
}

fn trace_event(verbosity: Option<Verbosity>, event: StatEvent<'_>) {
    if let Some(verbosity) = verbosity
        && let Some(text) = format_stat(&event, verbosity)
    {
        tracing::info!(target: "grpcdyn::debug", "{text}");
    }
}
