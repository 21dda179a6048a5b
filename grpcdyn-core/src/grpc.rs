//! # Generic gRPC Transport
//!
//! This module contains the low-level building blocks for performing gRPC calls using
//! dynamic message types.
//!
//! Unlike standard `tonic` clients which are strongly typed (e.g., `HelloRequest`),
//! the components here exchange `prost_reflect::DynamicMessage`s whose schema is only
//! known at runtime.
pub mod client;
pub mod codec;
pub mod metadata;
