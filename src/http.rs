//! HTTP range fetcher: HEAD probe, manual redirects with a per-hop SSRF
//! guard, one ranged GET per `read_range`, and a buffered fallback for
//! servers without range support.

use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue, LOCATION, RANGE};
use url::Url;

use crate::types::{CompareError, CompareOptions, RemoteSpec, Result};

/// Maximum redirect hops before the open fails.
const REDIRECT_LIMIT: usize = 10;

/// Cap for the buffered fallback when a server offers no range support.
const FALLBACK_BUFFER_CAP: u64 = 256 * 1024 * 1024;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Effective HTTP settings for one source: per-source overrides win over the
/// call-wide options, per-source headers shadow global ones on key collision.
struct EffectiveHttp {
    timeout: Duration,
    follow_redirects: bool,
    verify_tls: bool,
    proxy: Option<String>,
    allow_private: bool,
    headers: Vec<(String, String)>,
    retries: u32,
    retry_backoff: Duration,
}

fn resolve(remote: &RemoteSpec, opts: &CompareOptions) -> EffectiveHttp {
    let mut headers = opts.headers.clone();
    for (key, value) in &remote.headers {
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        headers.push((key.clone(), value.clone()));
    }
    EffectiveHttp {
        timeout: remote.timeout.unwrap_or(opts.timeout),
        follow_redirects: remote.follow_redirects.unwrap_or(opts.follow_redirects),
        verify_tls: remote.verify_tls.unwrap_or(opts.verify_tls),
        proxy: remote.proxy.clone().or_else(|| opts.proxy.clone()),
        allow_private: remote.allow_private.unwrap_or(opts.allow_private),
        headers,
        retries: opts.retries,
        retry_backoff: opts.retry_backoff,
    }
}

/// A remote resource addressable by byte offset.
///
/// One handle owns one HTTP session; `read_range` calls are serialized
/// through `&mut self`. Parallelism is across handles, never within one.
pub struct HttpSource {
    client: Client,
    /// Final URL after redirect resolution; every ranged GET hits this.
    url: Url,
    /// Original URL, used in error messages and result names.
    name: String,
    headers: HeaderMap,
    size: u64,
    retries: u32,
    retry_backoff: Duration,
    /// Whole body, when the server gave us no way to read ranges.
    buffered: Option<Vec<u8>>,
    bytes_read: u64,
}

impl HttpSource {
    /// HEAD-probe `remote` and prepare for ranged reads.
    ///
    /// Requires `Content-Length`; `Accept-Ranges: bytes` enables ranged
    /// mode, otherwise the body is fetched once and buffered up to a fixed
    /// cap. The SSRF guard applies to the initial URL and every redirect
    /// hop. HTTP 404 maps to `SourceNotFound`.
    pub fn open(remote: &RemoteSpec, opts: &CompareOptions) -> Result<HttpSource> {
        let cfg = resolve(remote, opts);
        let name = remote.url.clone();

        let mut url = Url::parse(&remote.url)
            .map_err(|e| CompareError::read(&name, format!("invalid URL: {e}")))?;
        ensure_target_allowed(&url, cfg.allow_private)?;

        let headers = build_header_map(&cfg.headers)?;
        let client = build_client(&cfg)?;

        let mut hops = 0;
        let head = loop {
            let resp = send_with_retry(&name, cfg.retries, cfg.retry_backoff, || {
                client.head(url.clone()).headers(headers.clone())
            })?;
            if !resp.status().is_redirection() {
                break resp;
            }
            if !cfg.follow_redirects {
                return Err(CompareError::read(&name, "server redirected but follow_redirects is disabled"));
            }
            hops += 1;
            if hops > REDIRECT_LIMIT {
                return Err(CompareError::read(&name, format!("more than {REDIRECT_LIMIT} redirects")));
            }
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| CompareError::read(&name, "redirect without Location header"))?;
            url = url
                .join(location)
                .map_err(|e| CompareError::read(&name, format!("bad redirect target: {e}")))?;
            ensure_target_allowed(&url, cfg.allow_private)?;
        };

        if head.status() == StatusCode::NOT_FOUND {
            return Err(CompareError::SourceNotFound(name));
        }
        if !head.status().is_success() {
            return Err(CompareError::read(&name, format!("HEAD returned {}", head.status())));
        }

        let content_length = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let ranged = head
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        let mut source = HttpSource {
            client,
            url,
            name,
            headers,
            size: content_length.unwrap_or(0),
            retries: cfg.retries,
            retry_backoff: cfg.retry_backoff,
            buffered: None,
            bytes_read: 0,
        };

        match (content_length, ranged) {
            (Some(len), true) => {
                debug!("{}: {} bytes, ranged reads enabled", source.name, len);
            }
            _ => {
                debug!("{}: no range support, buffering whole body", source.name);
                source.buffer_whole_body()?;
            }
        }
        Ok(source)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read `len` bytes at `offset`, clamped to end-of-resource. One call
    /// maps to one ranged GET unless the body was buffered at open.
    pub fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset > self.size {
            return Err(CompareError::read(
                &self.name,
                format!("read at {} past end of {}-byte resource", offset, self.size),
            ));
        }
        let len = len.min((self.size - offset) as usize);
        if len == 0 {
            return Ok(Vec::new());
        }

        if let Some(body) = &self.buffered {
            let start = offset as usize;
            self.bytes_read += len as u64;
            return Ok(body[start..start + len].to_vec());
        }

        // End clamped to size - 1; servers answering past it lied at HEAD.
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        let resp = send_with_retry(&self.name, self.retries, self.retry_backoff, || {
            self.client
                .get(self.url.clone())
                .headers(self.headers.clone())
                .header(RANGE, &range)
        })?;

        let status = resp.status();
        let whole_resource = offset == 0 && len as u64 == self.size;
        match status {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if whole_resource => {}
            _ => {
                return Err(CompareError::read(
                    &self.name,
                    format!("range request {range} answered with {status}"),
                ));
            }
        }

        let body = resp
            .bytes()
            .map_err(|e| CompareError::read(&self.name, e))?;
        if body.len() != len {
            // The size from HEAD disagrees with what the server now serves.
            return Err(CompareError::read(
                &self.name,
                format!("requested {} bytes at {}, server sent {}", len, offset, body.len()),
            ));
        }
        self.bytes_read += len as u64;
        Ok(body.to_vec())
    }

    fn buffer_whole_body(&mut self) -> Result<()> {
        use std::io::Read;

        let resp = send_with_retry(&self.name, self.retries, self.retry_backoff, || {
            self.client.get(self.url.clone()).headers(self.headers.clone())
        })?;
        if !resp.status().is_success() {
            return Err(CompareError::read(&self.name, format!("GET returned {}", resp.status())));
        }
        let mut body = Vec::new();
        resp.take(FALLBACK_BUFFER_CAP + 1)
            .read_to_end(&mut body)
            .map_err(|e| CompareError::read(&self.name, e))?;
        if body.len() as u64 > FALLBACK_BUFFER_CAP {
            return Err(CompareError::read(
                &self.name,
                format!("no range support and body exceeds the {FALLBACK_BUFFER_CAP}-byte buffer cap"),
            ));
        }
        self.size = body.len() as u64;
        self.buffered = Some(body);
        Ok(())
    }
}

fn build_client(cfg: &EffectiveHttp) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(cfg.timeout)
        .danger_accept_invalid_certs(!cfg.verify_tls);
    if let Some(proxy) = &cfg.proxy {
        builder = builder.proxy(
            reqwest::Proxy::all(proxy)
                .map_err(|e| CompareError::Config(format!("invalid proxy URL {proxy}: {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| CompareError::Config(format!("HTTP client setup failed: {e}")))
}

fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| CompareError::Config(format!("invalid header name: {key}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| CompareError::Config(format!("invalid header value for {key}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Send a request, retrying transport failures and 5xx replies with
/// exponential backoff plus jitter. The last attempt's outcome is returned
/// as-is; callers still check the status.
fn send_with_retry(
    name: &str,
    retries: u32,
    backoff: Duration,
    build: impl Fn() -> RequestBuilder,
) -> Result<Response> {
    let mut attempt = 0u32;
    loop {
        let result = build().send();
        let retryable = match &result {
            Ok(resp) => resp.status().is_server_error(),
            Err(_) => true,
        };
        if retryable && attempt < retries {
            let exp = backoff.saturating_mul(1u32 << attempt.min(16));
            let sleep = exp + exp.mul_f64(rand::random::<f64>() * 0.5);
            debug!("{}: attempt {} failed, retrying in {:?}", name, attempt, sleep);
            std::thread::sleep(sleep);
            attempt += 1;
            continue;
        }
        return result.map_err(|e| CompareError::read(name, e));
    }
}

/// SSRF guard: reject targets whose host resolves to loopback, private,
/// link-local, unique-local, multicast, broadcast, or unspecified address
/// space, unless `allow_private`. Applied to the initial URL and to every
/// redirect hop; a proxy is judged by the origin it fronts, not itself.
fn ensure_target_allowed(url: &Url, allow_private: bool) -> Result<()> {
    if allow_private {
        return Ok(());
    }
    let host = url
        .host_str()
        .ok_or_else(|| CompareError::read(url.as_str(), "URL has no host"))?;
    let addrs: Vec<IpAddr> = match url.host() {
        Some(url::Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(url::Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        _ => {
            let port = url.port_or_known_default().unwrap_or(80);
            (host, port)
                .to_socket_addrs()
                .map_err(|e| CompareError::read(url.as_str(), format!("cannot resolve {host}: {e}")))?
                .map(|sa| sa.ip())
                .collect()
        }
    };
    for ip in addrs {
        if is_restricted(ip) {
            return Err(CompareError::read(
                url.as_str(),
                format!("{host} resolves to restricted address {ip}"),
            ));
        }
    }
    Ok(())
}

fn is_restricted(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // link-local
        }
    }
}
