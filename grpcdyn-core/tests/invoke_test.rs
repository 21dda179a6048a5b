use grpcdyn_core::client::InvokeError;
use grpcdyn_core::{ErrorKind, Phase};
use serde_json::json;
use std::time::Duration;
use stub_services::{StubTestService, connected_client, start};
use test_service::pb::testing::{Empty, Payload, SimpleResponse};
use tonic::metadata::MetadataMap;
use tonic::{Code, Response, Status};


fn empty_call_ok() -> StubTestService {
    StubTestService::default().with_empty_call(|_| Ok(Response::new(Empty {})))
}

#[tokio::test]
async fn test_unary_call_succeeds() {
    let addr = start(empty_call_ok()).await;
    let (mut client, mut samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 0);
    assert!(response.is_ok());
    assert_eq!(response.message, Some(json!({})));
    assert_eq!(response.error, None);

    let sample = samples.try_recv().expect("a sample for the call");
    assert_eq!(sample.metric, "grpc_req_duration");
    assert_eq!(
        sample.tag("method"),
        Some("/grpc.testing.TestService/EmptyCall")
    );
    assert_eq!(sample.tag("status"), Some("0"));
    assert!(samples.try_recv().is_err(), "exactly one sample per call");
}

#[tokio::test]
async fn test_leading_slash_is_optional() {
    let addr = start(empty_call_ok()).await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "/grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 0);
}

#[tokio::test]
async fn test_server_error_is_reported_in_the_response() {
    let addr = start(StubTestService::default().with_empty_call(|_| {
        let mut metadata = MetadataMap::new();
        metadata.insert("foo", "bar".parse().unwrap());
        Err(Status::with_metadata(Code::DataLoss, "foobar", metadata))
    }))
    .await;
    let (mut client, mut samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 15);
    assert_eq!(response.code(), Code::DataLoss);
    assert_eq!(response.message, None);

    let error = response.error.expect("error object");
    assert_eq!(error.code, 15);
    assert_eq!(error.message, "foobar");

    // Trailers-only responses carry the status metadata.
    assert_eq!(response.trailers["foo"], vec!["bar"]);

    let sample = samples.try_recv().unwrap();
    assert_eq!(sample.tag("status"), Some("15"));
}

#[tokio::test]
async fn test_response_headers_are_returned() {
    let addr = start(StubTestService::default().with_empty_call(|_| {
        let mut response = Response::new(Empty {});
        response
            .metadata_mut()
            .insert("foo", "bar".parse().unwrap());
        Ok(response)
    }))
    .await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.headers["foo"], vec!["bar"]);
}

#[tokio::test]
async fn test_request_metadata_is_lowercased_and_sent() {
    let addr = start(StubTestService::default().with_empty_call(|request| {
        let values: Vec<_> = request
            .metadata()
            .get_all("x-load-tester")
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();

        if values == ["k6"] {
            Ok(Response::new(Empty {}))
        } else {
            Err(Status::failed_precondition(format!(
                "unexpected metadata {values:?}"
            )))
        }
    }))
    .await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            Some(&json!({ "metadata": { "X-Load-Tester": "k6" } })),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 0, "{:?}", response.error);
}

#[tokio::test]
async fn test_request_and_response_messages_are_converted() {
    let addr = start(StubTestService::default().with_unary_call(|request| {
        let request = request.into_inner();
        let body = request.payload.map(|p| p.body).unwrap_or_default();

        if body != "负载测试".as_bytes() || !request.fill_username {
            return Err(Status::invalid_argument("unexpected request"));
        }

        Ok(Response::new(SimpleResponse {
            payload: Some(Payload {
                r#type: 0,
                body: b"ok".to_vec(),
            }),
            username: String::new(),
            oauth_scope: "水".to_string(),
        }))
    }))
    .await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/UnaryCall",
            Some(&json!({
                "fillUsername": true,
                "payload": { "body": "6LSf6L295rWL6K+V" },
            })),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 0, "{:?}", response.error);
    assert_eq!(
        response.message,
        Some(json!({
            "payload": { "type": "COMPRESSABLE", "body": "b2s=" },
            "username": "",
            "oauthScope": "水",
        }))
    );
}

#[tokio::test]
async fn test_any_payloads_round_trip() {
    let addr = start(StubTestService::default()).await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.any.testing.AnyTestService/Sum",
            Some(&json!({
                "data": {
                    "@type": "type.googleapis.com/grpc.any.testing.SumRequestData",
                    "a": 1,
                    "b": 2,
                }
            })),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 0, "{:?}", response.error);

    let message = response.message.unwrap();
    assert_eq!(
        message["data"]["@type"],
        "type.googleapis.com/grpc.any.testing.SumReplyData"
    );
    assert_eq!(message["data"]["v"], "3");
    assert_eq!(message["data"]["err"], "");
}

#[tokio::test]
async fn test_echo_round_trip_preserves_every_field() {
    let addr = start(StubTestService::default()).await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    let input = json!({
        "text": "héllo",
        "big": "9007199254740993",
        "ubig": "18446744073709551615",
        "ratio": 0.25,
        "flag": true,
        "blob": "AQID",
        "inner": { "label": "nested", "weight": 3 },
        "items": [
            { "label": "a", "weight": 1 },
            { "label": "b", "weight": 2 },
        ],
        "numbers": [1, 2, 3],
        "counters": { "hits": "10", "misses": "-2" },
        "lookup": { "7": { "label": "seven", "weight": 7 } },
        "extra": {
            "@type": "type.googleapis.com/grpcdyn.echo.Inner",
            "label": "packed",
            "weight": 9,
        },
        "color": "GREEN",
        "small": 1.5,
        "neg": -7,
        "displayName": "Load Tester",
        "createdAt": "2024-01-02T03:04:05Z",
        "nickname": "k6",
    });

    let response = client
        .invoke(
            Phase::Execution,
            "grpcdyn.echo.EchoService/Echo",
            Some(&input),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 0, "{:?}", response.error);
    assert_eq!(response.message, Some(input));
}

#[tokio::test]
async fn test_receive_size_limit() {
    let addr = start(StubTestService::default().with_unary_call(|_| {
        Ok(Response::new(SimpleResponse {
            payload: Some(Payload {
                r#type: 0,
                body: vec![b'x'; 64],
            }),
            ..Default::default()
        }))
    }))
    .await;
    let (mut client, mut samples) = connected_client(addr, json!({ "maxReceiveSize": 16 })).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/UnaryCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.code(), Code::ResourceExhausted);
    let error = response.error.unwrap();
    assert!(
        error.message.contains("received message larger than max"),
        "{}",
        error.message
    );
    assert_eq!(samples.try_recv().unwrap().tag("status"), Some("8"));

    // The connection stays usable.
    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/UnaryCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(response.code(), Code::ResourceExhausted);
}

#[tokio::test]
async fn test_send_size_limit() {
    let addr = start(StubTestService::default().with_unary_call(|_| {
        Ok(Response::new(SimpleResponse::default()))
    }))
    .await;
    let (mut client, mut samples) = connected_client(addr, json!({ "maxSendSize": 4 })).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/UnaryCall",
            Some(&json!({ "payload": { "body": "dGVzdE1heFNlbmRTaXpl" } })),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.code(), Code::ResourceExhausted);
    assert!(
        response
            .error
            .unwrap()
            .message
            .contains("trying to send message larger than max")
    );
    assert_eq!(samples.try_recv().unwrap().tag("status"), Some("8"));

    // Small enough messages still go through.
    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/UnaryCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(response.status, 0, "{:?}", response.error);
}

#[tokio::test]
async fn test_call_timeout_is_deadline_exceeded() {
    let addr = start(
        StubTestService::default()
            .with_delay(Duration::from_millis(500))
            .with_empty_call(|_| Ok(Response::new(Empty {}))),
    )
    .await;
    let (mut client, mut samples) = connected_client(addr, json!({})).await;

    // The server side enforces the sent grpc-timeout as well, whichever side gives up
    // first the call must end as a deadline.
    for timeout in ["10ms", "50ms", "50ms", "100ms", "200ms"] {
        let response = client
            .invoke(
                Phase::Execution,
                "grpc.testing.TestService/EmptyCall",
                Some(&json!({})),
                Some(&json!({ "timeout": timeout })),
            )
            .await
            .unwrap();

        assert_eq!(
            response.code(),
            Code::DeadlineExceeded,
            "timeout {timeout}: {:?}",
            response.error
        );
        assert_eq!(samples.try_recv().unwrap().tag("status"), Some("4"));
    }
}

#[tokio::test]
async fn test_request_tags_are_added_to_the_sample() {
    let addr = start(empty_call_ok()).await;
    let (mut client, mut samples) = connected_client(addr, json!({})).await;

    client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            Some(&json!({ "tags": { "scenario": "smoke" } })),
        )
        .await
        .unwrap();

    let sample = samples.try_recv().unwrap();
    assert_eq!(sample.tag("scenario"), Some("smoke"));
    assert_eq!(
        sample.tag("url"),
        Some(format!("{addr}/grpc.testing.TestService/EmptyCall").as_str())
    );
}

#[tokio::test]
async fn test_server_streaming_method_returns_the_first_message() {
    let addr = start(StubTestService::default()).await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    let response = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/StreamingOutputCall",
            Some(&json!({ "responseParameters": [{ "size": 2 }, { "size": 5 }] })),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.status, 0, "{:?}", response.error);
    assert_eq!(
        response.message.unwrap()["payload"]["body"],
        "eHg=" // "xx"
    );
}

#[tokio::test]
async fn test_malformed_calls_fail_without_a_sample() {
    let addr = start(StubTestService::default()).await;
    let (mut client, mut samples) = connected_client(addr, json!({})).await;

    let err = client
        .invoke(Phase::Execution, "/foo/bar", Some(&json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "method \"/foo/bar\" not found in file descriptors"
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "request cannot be nil");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            Some(&json!({ "void": true })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "unknown param: \"void\"");

    let err = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/UnaryCall",
            Some(&json!({ "fillUsername": "yes" })),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Encode(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = client
        .invoke(
            Phase::Init,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "invoking RPC methods in the init context is not supported"
    );

    assert!(samples.try_recv().is_err());
}

#[tokio::test]
async fn test_invoke_after_close_fails() {
    let addr = start(empty_call_ok()).await;
    let (mut client, _samples) = connected_client(addr, json!({})).await;

    client.close();
    client.close();
    assert!(!client.is_connected());

    let err = client
        .invoke(
            Phase::Execution,
            "grpc.testing.TestService/EmptyCall",
            Some(&json!({})),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::NoConnection));
    assert_eq!(err.to_string(), "no gRPC connection");
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}
