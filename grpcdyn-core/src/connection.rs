//! # Connection management
//!
//! A [`Connection`] is one open channel to one server address, together with the options
//! it was opened with. Channels are dialed eagerly, so a `connect` call fails right away
//! when the server is unreachable instead of on the first RPC.
use crate::client::params::ConnectParams;
use crate::error::{ErrorKind, display_chain};
use crate::grpc::client::{GrpcClient, MessageLimits};
use crate::reflection::client::ReflectionClient;
use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid address '{address}': {}", display_chain(.source))]
    InvalidAddress {
        address: String,
        source: tonic::transport::Error,
    },
    #[error("failed to configure TLS for '{address}': {}", display_chain(.source))]
    Tls {
        address: String,
        source: tonic::transport::Error,
    },
    #[error("failed to connect to '{address}': {}", display_chain(.source))]
    ConnectionFailed {
        address: String,
        source: tonic::transport::Error,
    },
    #[error("timed out connecting to '{address}' after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAddress { .. } | Self::Tls { .. } => ErrorKind::InvalidArgument,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => ErrorKind::Unavailable,
        }
    }
}

/// An open connection and the per-connection call settings.
pub struct Connection {
    address: String,
    channel: Channel,
    grpc: GrpcClient<Channel>,
    timeout: Duration,
}

impl Connection {
    /// Dials `address` with the given options.
    ///
    /// # Arguments
    ///
    /// * `address` - `host:port`, optionally with an `http://` or `https://` scheme.
    /// * `params` - Already validated connection options.
    /// * `tls` - TLS settings to use unless `params.plaintext` is set. Native roots when `None`.
    pub async fn open(
        address: &str,
        params: &ConnectParams,
        tls: Option<&ClientTlsConfig>,
    ) -> Result<Self, ChannelError> {
        let uri = with_scheme(address, params.plaintext);

        let mut endpoint =
            Endpoint::from_shared(uri.clone()).map_err(|source| ChannelError::InvalidAddress {
                address: address.to_string(),
                source,
            })?;

        if !params.plaintext {
            let tls = tls
                .cloned()
                .unwrap_or_else(|| ClientTlsConfig::new().with_native_roots());
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|source| ChannelError::Tls {
                    address: address.to_string(),
                    source,
                })?;
        }

        endpoint = endpoint.connect_timeout(params.timeout);

        // connect_timeout only bounds the TCP connect, the handshakes count as well.
        let channel = match tokio::time::timeout(params.timeout, endpoint.connect()).await {
            Ok(connected) => connected.map_err(|source| ChannelError::ConnectionFailed {
                address: address.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ChannelError::Timeout {
                    address: address.to_string(),
                    timeout: params.timeout,
                });
            }
        };

        tracing::debug!(
            address = %uri,
            plaintext = params.plaintext,
            timeout = ?params.timeout,
            "gRPC channel connected"
        );

        let limits = MessageLimits {
            max_receive: params.max_receive_size,
            max_send: params.max_send_size,
        };

        Ok(Self {
            address: address.to_string(),
            grpc: GrpcClient::with_limits(channel.clone(), limits),
            channel,
            timeout: params.timeout,
        })
    }

    /// The address as given by the script.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Default deadline for calls made over this connection.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn grpc(&mut self) -> &mut GrpcClient<Channel> {
        &mut self.grpc
    }

    /// A reflection client sharing this connection's channel.
    pub fn reflection(&self) -> ReflectionClient<Channel> {
        ReflectionClient::new(self.channel.clone())
    }
}

fn with_scheme(address: &str, plaintext: bool) -> String {
    if address.contains("://") {
        address.to_string()
    } else if plaintext {
        format!("http://{address}")
    } else {
        format!("https://{address}")
    }
}
