//! Blocking transport against a wiremock server running on its own runtime

#![cfg(feature = "blocking")]

use pushlink_transport::{BlockingSequentialTransport, SequentialTransport, TrustPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_blocking_get_and_error_status() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mock_server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"tags":[]}"#))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v3/tags/t1"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        server
    });

    let transport = BlockingSequentialTransport::new(
        SequentialTransport::builder()
            .authorization("Basic dGVzdDp0ZXN0")
            .trust_policy(TrustPolicy::WebPki),
    )
    .unwrap();

    let response = transport
        .send_get(&format!("{}/v3/tags", mock_server.uri()))
        .unwrap();
    assert_eq!(response.body(), Some(r#"{"tags":[]}"#));

    let err = transport
        .send_delete(&format!("{}/v3/tags/t1", mock_server.uri()))
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
}
