use hlsmon_engine::{
    EventKind, EventPayload, HttpTransfer, MessageDispatcher, ReportParam, Transfer,
    TransferConfig, TransferError, TransferState,
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Minimal HTTP/1.1 server on an ephemeral local port. Accepts `connections`
/// connections in turn and hands each to `respond` once its request head has
/// been read.
fn serve<F>(connections: usize, respond: F) -> SocketAddr
where
    F: Fn(usize, &mut TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for index in 0..connections {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            read_request_head(&stream);
            respond(index, &mut stream);
        }
    });
    addr
}

fn read_request_head(stream: &TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
        if line == "\r\n" {
            break;
        }
        line.clear();
    }
}

fn write_response(stream: &mut TcpStream, head: &str, body: &[u8]) {
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

fn local_config() -> TransferConfig {
    TransferConfig {
        use_system_proxy: false,
        ..TransferConfig::default()
    }
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// Sends part of a ten byte body, then holds the connection open until the
/// returned sender fires or is dropped.
fn serve_stalled_body() -> (SocketAddr, mpsc::Sender<()>) {
    let (release, held) = mpsc::channel::<()>();
    let addr = serve(1, move |_, stream| {
        write_response(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n",
            b"hel",
        );
        let _ = held.recv_timeout(Duration::from_secs(10));
    });
    (addr, release)
}

#[test]
fn ok_response_returns_body_and_metadata() {
    let addr = serve(1, |_, stream| {
        write_response(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/vnd.apple.mpegurl\r\n\
Content-Length: 5\r\nConnection: close\r\n\r\n",
            b"hello",
        );
    });
    let transfer = HttpTransfer::new(local_config()).unwrap();
    let target = url(addr, "/live/index.m3u8");

    let fetched = transfer.fetch_text(&target).unwrap();

    assert_eq!(fetched.body, "hello");
    assert_eq!(fetched.info.status, 200);
    assert_eq!(fetched.info.bytes, 5);
    assert_eq!(fetched.info.effective_url, target);
    assert_eq!(fetched.info.remote_addr.map(|a| a.port()), Some(addr.port()));
}

#[test]
fn redirect_is_followed_to_effective_url() {
    let addr = serve(2, |index, stream| {
        if index == 0 {
            write_response(
                stream,
                "HTTP/1.1 302 Found\r\nLocation: /moved/seg0.ts\r\n\
Content-Length: 0\r\nConnection: close\r\n\r\n",
                b"",
            );
        } else {
            write_response(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\n",
                b"data",
            );
        }
    });
    let transfer = HttpTransfer::new(local_config()).unwrap();

    let fetched = transfer.fetch_binary(&url(addr, "/seg0.ts")).unwrap();

    assert_eq!(&fetched.body[..], b"data");
    assert_eq!(fetched.info.effective_url, url(addr, "/moved/seg0.ts"));
}

#[test]
fn binary_fetch_reports_headers_then_progress() {
    let addr = serve(1, |_, stream| {
        write_response(
            stream,
            "HTTP/1.1 200 OK\r\nX-Stream: edge-7\r\nContent-Length: 5\r\nConnection: close\r\n\r\n",
            b"12345",
        );
    });
    let dispatcher = MessageDispatcher::start().unwrap();
    let events: Arc<Mutex<Vec<(EventKind, EventPayload)>>> = Arc::default();
    let sink = Arc::clone(&events);
    dispatcher.set_callback(move |param: ReportParam<'_>| {
        sink.lock().push((param.kind, param.payload.clone()));
    });
    let transfer = HttpTransfer::new(local_config())
        .unwrap()
        .with_reporter(dispatcher.clone());

    let fetched = transfer.fetch_binary(&url(addr, "/seg.ts")).unwrap();
    dispatcher.shutdown();

    assert_eq!(fetched.info.bytes, 5);
    let events = events.lock();
    match events.first() {
        Some((EventKind::HttpResponseHeaders, EventPayload::Text(headers))) => {
            assert!(headers.contains("x-stream: edge-7"), "{headers}");
        }
        other => panic!("expected response headers first, got {other:?}"),
    }
    let progress: Vec<_> = events
        .iter()
        .filter_map(|(kind, payload)| match (kind, payload) {
            (EventKind::HttpDownloadProgress, EventPayload::Progress(p)) => Some(p.clone()),
            _ => None,
        })
        .collect();
    let last = progress.last().expect("at least one progress event");
    assert_eq!(last.bytes_received, 5);
    assert_eq!(last.total_bytes, Some(5));
    assert_eq!(last.percent, Some(100));
}

#[test]
fn text_fetch_posts_no_events() {
    let addr = serve(1, |_, stream| {
        write_response(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\n",
            b"#EXTM3U",
        );
    });
    let dispatcher = MessageDispatcher::start().unwrap();
    let events: Arc<Mutex<Vec<EventKind>>> = Arc::default();
    let sink = Arc::clone(&events);
    dispatcher.set_callback(move |param: ReportParam<'_>| sink.lock().push(param.kind));
    let transfer = HttpTransfer::new(local_config())
        .unwrap()
        .with_reporter(dispatcher.clone());

    transfer.fetch_text(&url(addr, "/index.m3u8")).unwrap();
    dispatcher.shutdown();

    assert!(events.lock().is_empty());
}

#[test]
fn non_ok_status_is_an_error() {
    let addr = serve(1, |_, stream| {
        write_response(
            stream,
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            b"",
        );
    });
    let transfer = HttpTransfer::new(local_config()).unwrap();

    let err = transfer.fetch_binary(&url(addr, "/gone.ts")).unwrap_err();

    assert!(matches!(
        err,
        TransferError::HttpStatus {
            status: StatusCode::NOT_FOUND,
            ..
        }
    ));
    assert_eq!(err.state(), TransferState::Error);
    assert!(!err.is_retryable());
}

#[test]
fn stalled_body_times_out() {
    let (addr, release) = serve_stalled_body();
    let transfer =
        HttpTransfer::new(local_config().with_idle_timeout(Duration::from_millis(300))).unwrap();

    let started = Instant::now();
    let err = transfer.fetch_binary(&url(addr, "/slow.ts")).unwrap_err();
    let _ = release.send(());

    assert!(matches!(err, TransferError::TimedOut { idle_ms: 300, .. }));
    assert_eq!(err.state(), TransferState::TimedOut);
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancel_interrupts_in_flight_transfer() {
    let (addr, release) = serve_stalled_body();
    let transfer =
        HttpTransfer::new(local_config().with_idle_timeout(Duration::from_secs(30))).unwrap();
    let target = url(addr, "/slow.ts");

    let started = Instant::now();
    let err = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(200));
            transfer.cancel();
        });
        transfer.fetch_binary(&target).unwrap_err()
    });
    let _ = release.send(());

    assert!(err.is_cancelled());
    assert_eq!(err.state(), TransferState::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(transfer.is_cancelled());
}
