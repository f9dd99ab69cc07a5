//! Verify request building and response parsing against JSON test vectors
//! stored in `test-vectors/`.
//!
//! Each vector file lists inputs and the expected outcome. The vectors are
//! language-neutral so another client of the same backend can replay them.

use baas_core::handler::ResponseBuffer;
use baas_core::{Credentials, HttpMethod, HttpOptions, RequestFactory, ResponseSink};
use serde_json::Value;

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value[key].as_str().unwrap()
}

fn string_pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|pair| {
            let arr = pair.as_array().unwrap();
            (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Request factory
// ---------------------------------------------------------------------------

#[test]
fn request_factory_vectors() {
    let raw = include_str!("../../test-vectors/request_factory.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = str_field(case, "name");
        let creds = &case["credentials"];
        let credentials = Credentials::new(
            str_field(creds, "endpoint_url"),
            str_field(creds, "tenant_id"),
            str_field(creds, "app_id"),
            str_field(creds, "app_key"),
        );

        let mut factory = RequestFactory::new(&credentials, str_field(case, "session_token"), HttpOptions::default())
            .method(parse_method(str_field(case, "method")), str_field(case, "path"))
            .append_path(str_field(case, "append_path"))
            .params(string_pairs(&case["params"]))
            .headers(string_pairs(&case["headers"]));
        if case["session_none"].as_bool().unwrap() {
            factory = factory.session_none();
        }

        let expected = &case["expected"];
        match (factory.try_build(), expected["error"].as_str()) {
            (Ok(request), None) => {
                assert_eq!(request.method, parse_method(str_field(case, "method")), "{name}: method");
                assert_eq!(request.url, str_field(expected, "url"), "{name}: url");
                let expected_headers: Vec<&str> = expected["headers"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|h| h.as_str().unwrap())
                    .collect();
                assert_eq!(request.headers, expected_headers, "{name}: headers");
            }
            (Err(code), Some(expected_code)) => {
                assert_eq!(format!("{code:?}"), expected_code, "{name}: error code");
            }
            (outcome, expected_error) => {
                panic!("{name}: got {outcome:?}, expected error {expected_error:?}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[test]
fn response_parsing_vectors() {
    let raw = include_str!("../../test-vectors/response_parsing.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = str_field(case, "name");

        let mut buffer = ResponseBuffer::new();
        for line in case["header_lines"].as_array().unwrap() {
            buffer.header_line(line.as_str().unwrap());
        }
        buffer.write_body(str_field(case, "body").as_bytes()).unwrap();
        let response = buffer.parse();

        let expected = &case["expected"];
        assert_eq!(
            u64::from(response.status_code),
            expected["status_code"].as_u64().unwrap(),
            "{name}: status"
        );
        assert_eq!(response.reason_phrase, str_field(expected, "reason_phrase"), "{name}: reason");
        assert_eq!(response.headers, string_pairs(&expected["headers"]), "{name}: headers");
        assert_eq!(response.body_text(), str_field(expected, "body"), "{name}: body");
    }
}
