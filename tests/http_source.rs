use holiday_sync::{DatasetSource, FetchError, HttpSource, SourceConfig};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

/// Serve `response` once on a local port and return the feed URL.
fn serve_once(response: Vec<u8>, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        thread::sleep(delay);
        let _ = stream.write_all(&response);
    });
    format!("http://{addr}/syukujitsu.csv")
}

fn response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

fn source(url: String) -> HttpSource {
    HttpSource::new(SourceConfig {
        url,
        connect_timeout_secs: 1,
        read_timeout_secs: 1,
        ..SourceConfig::default()
    })
    .unwrap()
}

#[test]
fn decodes_shift_jis_when_no_charset_is_declared() {
    // "元日" in Shift_JIS.
    let mut body = b"header\r\n2024/1/1,".to_vec();
    body.extend_from_slice(&[0x8C, 0xB3, 0x93, 0xFA]);
    body.extend_from_slice(b"\r\n");
    let url = serve_once(response("200 OK", "text/csv", &body), Duration::ZERO);

    let text = source(url).fetch().unwrap();
    assert_eq!(text, "header\r\n2024/1/1,元日\r\n");
}

#[test]
fn declared_charset_wins() {
    let body = "header\n2024/1/1,元日\n".as_bytes();
    let url = serve_once(
        response("200 OK", "text/csv; charset=utf-8", body),
        Duration::ZERO,
    );
    assert_eq!(source(url).fetch().unwrap(), "header\n2024/1/1,元日\n");
}

#[test]
fn non_success_status_is_upstream_unavailable() {
    let url = serve_once(
        response("503 Service Unavailable", "text/plain", b"busy"),
        Duration::ZERO,
    );
    assert_eq!(
        source(url).fetch().unwrap_err(),
        FetchError::UpstreamUnavailable { status: 503 }
    );
}

#[test]
fn slow_server_is_a_connectivity_failure() {
    let url = serve_once(
        response("200 OK", "text/csv", b"header\n"),
        Duration::from_secs(3),
    );
    let err = source(url).fetch().unwrap_err();
    assert!(matches!(err, FetchError::Connectivity(_)), "{err:?}");
}

#[test]
fn unreachable_host_is_a_connectivity_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = source(format!("http://127.0.0.1:{port}/syukujitsu.csv"))
        .fetch()
        .unwrap_err();
    assert!(matches!(err, FetchError::Connectivity(_)), "{err:?}");
}
