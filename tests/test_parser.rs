use bytes::BytesMut;
use hookline::config::LimitsConfig;
use hookline::http::parser::{Event, ParseError, Parser, parse_http_request, parse_http_request_with};
use hookline::http::request::{Method, Version};
use hookline::StatusCode;

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.path, "/");
    assert_eq!(parsed.version, Version::Http11);
    assert_eq!(parsed.header("Host"), Some("example.com"));
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_post_request_with_body() {
    let req = b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.path, "/api");
    assert_eq!(parsed.body, b"hello".to_vec());
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_multiple_headers() {
    let req = b"GET /path HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-client\r\nAccept: */*\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.headers.len(), 3);
    assert_eq!(parsed.header("host"), Some("example.com"));
    assert_eq!(parsed.header("User-Agent"), Some("test-client"));
    assert_eq!(parsed.header("Accept"), Some("*/*"));
}

#[test]
fn test_parse_repeated_headers_are_kept() {
    let req = b"GET / HTTP/1.1\r\nX-Tag: a\r\nX-Tag: b\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    let tags: Vec<_> = parsed.header_values("x-tag").collect();
    assert_eq!(tags, vec!["a", "b"]);
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let req = b"GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.path, "/search");
    assert_eq!(parsed.uri, "/search?q=rust");
    assert_eq!(parsed.query(), Some("q=rust"));
}

#[test]
fn test_parse_http10_request() {
    let req = b"GET / HTTP/1.0\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.version, Version::Http10);
    assert!(!parsed.keep_alive());
}

#[test]
fn test_parse_incomplete_request_missing_blank_line() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
    let result = parse_http_request(req);

    assert!(matches!(result, Err(ParseError::Incomplete)));
}

#[test]
fn test_parse_incomplete_request_partial_body() {
    let req = b"POST /api HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello";
    let result = parse_http_request(req);

    assert!(matches!(result, Err(ParseError::Incomplete)));
}

#[test]
fn test_parse_invalid_http_method() {
    let req = b"INVALID / HTTP/1.1\r\n\r\n";
    let result = parse_http_request(req);

    assert!(matches!(result, Err(ParseError::InvalidMethod(m)) if m == "INVALID"));
}

#[test]
fn test_parse_malformed_header() {
    let req = b"GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n";
    let result = parse_http_request(req);

    assert!(matches!(result, Err(ParseError::InvalidHeader)));
}

#[test]
fn test_parse_malformed_request_line() {
    let result = parse_http_request(b"GET /\r\n\r\n");

    assert!(matches!(result, Err(ParseError::InvalidRequest)));
}

#[test]
fn test_parse_various_http_methods() {
    let methods = vec![
        ("GET", Method::GET),
        ("POST", Method::POST),
        ("PUT", Method::PUT),
        ("DELETE", Method::DELETE),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("PATCH", Method::PATCH),
    ];

    for (method_str, expected_method) in methods {
        let req = format!("{} / HTTP/1.1\r\n\r\n", method_str);
        let (parsed, _) = parse_http_request(req.as_bytes()).unwrap();
        assert_eq!(parsed.method, expected_method);
    }
}

#[test]
fn test_parse_chunked_body() {
    let req = b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert!(parsed.is_chunked());
    assert_eq!(parsed.body, b"abcde".to_vec());
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_only_first_of_pipelined_requests() {
    let first = b"GET /a HTTP/1.1\r\n\r\n".as_slice();
    let raw = [first, b"GET /b HTTP/1.1\r\n\r\n"].concat();

    let (parsed, consumed) = parse_http_request(&raw).unwrap();

    assert_eq!(parsed.path, "/a");
    assert_eq!(consumed, first.len());
}

#[test]
fn test_error_statuses() {
    let small_head = LimitsConfig {
        max_header_bytes: 32,
        ..LimitsConfig::default()
    };
    let small_body = LimitsConfig {
        max_body_bytes: 4,
        ..LimitsConfig::default()
    };

    let head = parse_http_request_with(
        b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n",
        &small_head,
    )
    .unwrap_err();
    let body = parse_http_request_with(
        b"POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\n",
        &small_body,
    )
    .unwrap_err();
    let version = parse_http_request(b"GET / HTTP/2.0\r\n\r\n").unwrap_err();

    assert_eq!(head.status(), StatusCode::HEADER_FIELDS_TOO_LARGE);
    assert_eq!(body.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(version.status(), StatusCode::VERSION_NOT_SUPPORTED);
    assert_eq!(ParseError::InvalidHeader.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_parser_resumes_across_reads() {
    let mut parser = Parser::new(&LimitsConfig::default());
    let mut buf = BytesMut::new();
    let mut events = Vec::new();

    for part in [&b"GET /x?"[..], b"y=1 HTTP/1.1\r\nHo", b"st: h\r\n", b"\r\n"] {
        buf.extend_from_slice(part);
        while let Some(event) = parser.next_event(&mut buf).unwrap() {
            events.push(event);
        }
    }

    assert_eq!(events.first(), Some(&Event::MethodParsed(Method::GET)));
    assert!(events.contains(&Event::PathParsed("/x".into())));
    assert!(events.contains(&Event::UriParsed("/x?y=1".into())));
    assert_eq!(events.last(), Some(&Event::MessageComplete));
    assert!(parser.is_complete());
}

#[test]
fn test_parser_reset_between_requests() {
    let mut parser = Parser::new(&LimitsConfig::default());
    let mut buf = BytesMut::from(&b"GET /a HTTP/1.0\r\n\r\nGET /b HTTP/1.1\r\n\r\n"[..]);

    while parser.next_event(&mut buf).unwrap() != Some(Event::MessageComplete) {}
    assert_eq!(parser.version(), Version::Http10);

    parser.reset();
    let mut paths = Vec::new();
    while let Some(event) = parser.next_event(&mut buf).unwrap() {
        if let Event::PathParsed(p) = &event {
            paths.push(p.clone());
        }
    }

    assert_eq!(paths, vec!["/b"]);
    assert_eq!(parser.version(), Version::Http11);
    assert!(buf.is_empty());
}
