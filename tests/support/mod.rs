//! Minimal in-process HTTP server for fetcher tests: HEAD plus ranged GET
//! over a route table, every request recorded for assertions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One servable resource and the protocol quirks to exercise.
pub struct Resource {
    pub body: Vec<u8>,
    /// Advertise `Accept-Ranges: bytes` on HEAD.
    pub ranges: bool,
    /// Send `Content-Length` on HEAD.
    pub content_length: bool,
    /// Advertise this size instead of the real one (lying server).
    pub lie_size: Option<u64>,
}

impl Resource {
    pub fn new(body: impl Into<Vec<u8>>) -> Resource {
        Resource {
            body: body.into(),
            ranges: true,
            content_length: true,
            lie_size: None,
        }
    }
}

pub enum Route {
    Resource(Resource),
    /// 302 with this Location.
    Redirect(String),
    /// Always answer with this status and empty body.
    Status(u16),
    /// Answer 500 for the first N requests, then behave like the resource.
    Flaky(usize, Resource),
    /// Serve the resource only when the request carries this header
    /// (name, value); 403 otherwise.
    RequireHeader(String, String, Resource),
}

/// A live server on 127.0.0.1. `requests` records "METHOD /path [range]"
/// lines in arrival order.
pub struct TestServer {
    port: u16,
    pub requests: Arc<Mutex<Vec<String>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn request_log(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Count of GET requests that carried a Range header.
    pub fn ranged_gets(&self) -> usize {
        self.request_log()
            .iter()
            .filter(|line| line.starts_with("GET") && line.contains("bytes="))
            .count()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the accept loop.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Start a server for the given route table (path → route).
pub fn serve(routes: HashMap<String, Route>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let port = listener.local_addr().unwrap().port();
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let shutdown = Arc::new(AtomicBool::new(false));

    let requests_srv = Arc::clone(&requests);
    let shutdown_srv = Arc::clone(&shutdown);
    let flaky_counters: HashMap<String, AtomicUsize> = routes
        .iter()
        .filter(|(_, r)| matches!(r, Route::Flaky(..)))
        .map(|(p, _)| (p.clone(), AtomicUsize::new(0)))
        .collect();

    let handle = std::thread::spawn(move || {
        for stream in listener.incoming() {
            if shutdown_srv.load(Ordering::SeqCst) {
                break;
            }
            let Ok(stream) = stream else { continue };
            handle_connection(stream, &routes, &flaky_counters, &requests_srv);
        }
    });

    TestServer {
        port,
        requests,
        shutdown,
        handle: Some(handle),
    }
}

fn handle_connection(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    flaky_counters: &HashMap<String, AtomicUsize>,
    requests: &Arc<Mutex<Vec<String>>>,
) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() || request_line.is_empty() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut range = None;
    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
        }
        if let Some(value) = line.strip_prefix("Range:").or_else(|| line.strip_prefix("range:")) {
            range = Some(value.trim().to_string());
        }
    }

    requests.lock().unwrap().push(match &range {
        Some(r) => format!("{method} {path} {r}"),
        None => format!("{method} {path}"),
    });

    match routes.get(&path) {
        None => write_status(&mut stream, 404, "Not Found"),
        Some(Route::Status(code)) => write_status(&mut stream, *code, "As Requested"),
        Some(Route::Redirect(target)) => {
            let _ = write!(
                stream,
                "HTTP/1.1 302 Found\r\nConnection: close\r\nLocation: {target}\r\nContent-Length: 0\r\n\r\n"
            );
        }
        Some(Route::Flaky(fail_count, resource)) => {
            let served = flaky_counters
                .get(&path)
                .map(|c| c.fetch_add(1, Ordering::SeqCst))
                .unwrap_or(0);
            if served < *fail_count {
                write_status(&mut stream, 500, "Internal Server Error");
            } else {
                serve_resource(&mut stream, &method, range.as_deref(), resource);
            }
        }
        Some(Route::Resource(resource)) => {
            serve_resource(&mut stream, &method, range.as_deref(), resource);
        }
        Some(Route::RequireHeader(name, value, resource)) => {
            let sent = headers
                .iter()
                .any(|(n, v)| n == &name.to_ascii_lowercase() && v == value);
            if sent {
                serve_resource(&mut stream, &method, range.as_deref(), resource);
            } else {
                write_status(&mut stream, 403, "Forbidden");
            }
        }
    }
}

fn write_status(stream: &mut TcpStream, code: u16, reason: &str) {
    let _ = write!(stream, "HTTP/1.1 {code} {reason}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
}

fn serve_resource(stream: &mut TcpStream, method: &str, range: Option<&str>, res: &Resource) {
    let advertised = res.lie_size.unwrap_or(res.body.len() as u64);

    if method == "HEAD" {
        let mut headers = String::from("HTTP/1.1 200 OK\r\nConnection: close\r\n");
        if res.content_length {
            headers.push_str(&format!("Content-Length: {advertised}\r\n"));
        }
        if res.ranges {
            headers.push_str("Accept-Ranges: bytes\r\n");
        }
        headers.push_str("\r\n");
        let _ = stream.write_all(headers.as_bytes());
        return;
    }

    match range.and_then(parse_range) {
        Some((start, end)) => {
            let start = start as usize;
            // Serve out of the real body; a lying server just runs short.
            let end = (end as usize + 1).min(res.body.len());
            let slice = if start < res.body.len() {
                &res.body[start..end]
            } else {
                &[]
            };
            let _ = write!(
                stream,
                "HTTP/1.1 206 Partial Content\r\nConnection: close\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
                slice.len(),
                start,
                end.saturating_sub(1),
                advertised
            );
            let _ = stream.write_all(slice);
        }
        None => {
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: {}\r\n\r\n",
                res.body.len()
            );
            let _ = stream.write_all(&res.body);
        }
    }
    let _ = stream.flush();
}

/// Parse `bytes=a-b`.
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Read a stream fully and drop it (helper for raw-socket probes).
pub fn drain(stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut sink = Vec::new();
    let _ = reader.read_to_end(&mut sink);
}
