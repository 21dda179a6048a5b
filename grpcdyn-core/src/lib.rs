//! # grpcdyn Core
//!
//! `grpcdyn_core` is a dynamic gRPC invocation engine meant to be embedded in a
//! load-testing runtime. Scripts describe the services they call at runtime (with
//! `.proto` files, compiled protosets or server reflection) and exchange plain
//! `serde_json::Value` data with them.
//!
//! ## Key Components
//!
//! * **[`Client`](client::Client):** The main entry point. It gates every operation on the
//!   script [`Phase`](phase::Phase), owns the descriptor registry and the connection, and
//!   turns every RPC into an [`InvokeResponse`](client::InvokeResponse) plus one metric sample.
//! * **[`DescriptorRegistry`](registry::DescriptorRegistry):** Merges method descriptors from
//!   every source into one resolvable set.
//! * **[`convert`]:** The dynamic bridge between generic values and protobuf messages.
//! * **[`stats`]:** Metric samples, the sink abstraction and the debug event formatter.
//!
//! ## Internal clients
//!
//! The clients used internally are exposed as well:
//!
//! * **[`GrpcClient`](grpc::client::GrpcClient):** A unary dynamic gRPC client using a
//!   `DynamicMessage` codec with message size limits.
//! * **[`ReflectionClient`](reflection::client::ReflectionClient):** A gRPC Reflection client
//!   offering only the functionality needed to bootstrap the registry.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod connection;
pub mod convert;
pub mod error;
pub mod grpc;
pub mod phase;
pub mod reflection;
pub mod registry;
pub mod stats;

pub use client::{Client, ClientConfig, InvokeResponse};
pub use error::ErrorKind;
pub use phase::Phase;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
