//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It lets the client query a server for its own Protobuf schema at runtime, so scripts can
//! call services they have no local definitions for.
pub mod client;
