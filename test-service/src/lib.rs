//! # Test Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide gRPC server stubs
//! and an encoded descriptor set for integration testing `grpcdyn_core`.
//! It is not intended for production use.
use std::path::PathBuf;

pub mod pb {
    pub mod testing {
        include!(concat!(env!("OUT_DIR"), "/grpc.testing.rs"));
    }

    pub mod any_testing {
        include!(concat!(env!("OUT_DIR"), "/grpc.any.testing.rs"));
    }

    pub mod echo {
        include!(concat!(env!("OUT_DIR"), "/grpcdyn.echo.rs"));
    }
}

pub use pb::any_testing::any_test_service_server::{AnyTestService, AnyTestServiceServer};
pub use pb::echo::echo_service_server::{EchoService, EchoServiceServer};
pub use pb::testing::test_service_server::{TestService, TestServiceServer};

/// Encoded `FileDescriptorSet` of every proto in this crate, imports included.
pub const FILE_DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/descriptors.bin"));

/// Directory holding the `.proto` sources, usable as an import path.
pub fn proto_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/proto"))
}
