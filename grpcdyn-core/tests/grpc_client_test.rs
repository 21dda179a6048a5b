use grpcdyn_core::grpc::client::{GrpcClient, MessageLimits};
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor, Value};
use stub_services::{EchoServiceImpl, StubTestService};
use test_service::{EchoServiceServer, FILE_DESCRIPTOR_SET, TestServiceServer};
use tonic::Code;
use tonic::metadata::MetadataMap;


fn method(service: &str, name: &str) -> MethodDescriptor {
    let pool = DescriptorPool::decode(FILE_DESCRIPTOR_SET).expect("Failed to decode descriptors");
    pool.get_service_by_name(service)
        .and_then(|s| s.methods().find(|m| m.name() == name))
        .expect("Method not found in descriptors")
}

fn echo_request(method: &MethodDescriptor, text: &str) -> DynamicMessage {
    let mut message = DynamicMessage::new(method.input());
    message.set_field_by_name("text", Value::String(text.to_string()));
    message
}

#[tokio::test]
async fn test_unary_echo_in_process() {
    let method = method("grpcdyn.echo.EchoService", "Echo");
    let mut client = GrpcClient::new(EchoServiceServer::new(EchoServiceImpl));

    let call = client
        .unary(&method, echo_request(&method, "hello"), MetadataMap::new(), None)
        .await
        .unwrap();

    let message = call.result.expect("Echo should succeed");
    assert_eq!(
        message.get_field_by_name("text").unwrap().as_str(),
        Some("hello")
    );
}

#[tokio::test]
async fn test_send_limit_is_checked_before_the_call() {
    let method = method("grpcdyn.echo.EchoService", "Echo");
    let limits = MessageLimits {
        max_receive: None,
        max_send: Some(3),
    };
    let mut client = GrpcClient::with_limits(EchoServiceServer::new(EchoServiceImpl), limits);
    assert_eq!(client.limits(), limits);

    let call = client
        .unary(&method, echo_request(&method, "too long"), MetadataMap::new(), None)
        .await
        .unwrap();

    let status = call.result.unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);
    assert_eq!(
        status.message(),
        "grpc: trying to send message larger than max (10 vs. 3)"
    );
}

#[tokio::test]
async fn test_receive_limit_is_enforced_by_the_codec() {
    let method = method("grpcdyn.echo.EchoService", "Echo");
    let limits = MessageLimits {
        max_receive: Some(4),
        max_send: None,
    };
    let mut client = GrpcClient::with_limits(EchoServiceServer::new(EchoServiceImpl), limits);

    let call = client
        .unary(&method, echo_request(&method, "too long"), MetadataMap::new(), None)
        .await
        .unwrap();

    let status = call.result.unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);
    assert_eq!(
        status.message(),
        "grpc: received message larger than max (10 vs. 4)"
    );
}

#[tokio::test]
async fn test_status_of_unimplemented_handler() {
    let method = method("grpc.testing.TestService", "EmptyCall");
    let mut client = GrpcClient::new(TestServiceServer::new(StubTestService::default()));

    let call = client
        .unary(
            &method,
            DynamicMessage::new(method.input()),
            MetadataMap::new(),
            None,
        )
        .await
        .unwrap();

    let status = call.result.unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
    assert_eq!(status.message(), "EmptyCall is not configured");
}
