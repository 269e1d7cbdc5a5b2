//! HTTP client capability (§6): `execute(GET, url, headers, stop_token) ->
//! Response`, with a chunk sink instead of a pull-based body stream — the
//! natural shape for libcurl's push-style `write_function`.
//!
//! The client never follows redirects itself; the Worker handles them
//! (§4.3 step 5), so `follow_location` is deliberately left unset here even
//! though curl would otherwise follow 3xx responses on its own.

use async_trait::async_trait;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Raw response: status plus header lines, parsed by the Worker.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub header_lines: Vec<String>,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request aborted")]
    Aborted,
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Sink the client pushes response body chunks into. Returning `false` aborts
/// the transfer (mirrors curl's `write_function` early-return-0 convention).
pub type ChunkSink = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Invoked exactly once, synchronously, as soon as the status line and all
/// response headers are known — strictly before the first body byte reaches
/// `ChunkSink` (header parsing always completes before body delivery starts;
/// a client with no body at all still fires this once, after the transfer
/// ends). Lets the Worker persist `file_path`/`etag`/`total_bytes` (§4.3
/// steps 6-7) without waiting on the body to finish streaming.
pub type HeaderSink = Box<dyn FnOnce(u16, Vec<String>) + Send>;

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(
        &self,
        request: HttpRequest,
        stop: Arc<AtomicBool>,
        on_headers: HeaderSink,
        on_chunk: ChunkSink,
    ) -> Result<HttpResponse, HttpError>;
}

/// `curl::easy::Easy`-backed client, run on a blocking thread per call
/// (`tokio::task::spawn_blocking`), since `Easy::perform` blocks the calling
/// thread for the whole attempt.
pub struct CurlHttpClient {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
}

impl Default for CurlHttpClient {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            attempt_timeout: Duration::from_secs(600),
        }
    }
}

/// Extracts the status code from a response's status line (`HTTP/1.1 206
/// Partial Content` → `206`), which `header_function` always delivers before
/// any other header line.
fn parse_status_line(lines: &[String]) -> Option<u16> {
    lines.iter().find_map(|l| {
        if l.starts_with("HTTP/") {
            l.split_whitespace().nth(1)?.parse::<u16>().ok()
        } else {
            None
        }
    })
}

#[async_trait]
impl HttpClient for CurlHttpClient {
    async fn execute(
        &self,
        request: HttpRequest,
        stop: Arc<AtomicBool>,
        on_headers: HeaderSink,
        mut on_chunk: ChunkSink,
    ) -> Result<HttpResponse, HttpError> {
        let connect_timeout = self.connect_timeout;
        let attempt_timeout = self.attempt_timeout;

        tokio::task::spawn_blocking(move || -> Result<HttpResponse, HttpError> {
            let mut easy = curl::easy::Easy::new();
            easy.url(&request.url)
                .map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
            easy.follow_location(false)
                .map_err(|e| HttpError::Network(e.to_string()))?;
            easy.connect_timeout(connect_timeout)
                .map_err(|e| HttpError::Network(e.to_string()))?;
            easy.timeout(attempt_timeout)
                .map_err(|e| HttpError::Network(e.to_string()))?;
            easy.low_speed_limit(1024)
                .map_err(|e| HttpError::Network(e.to_string()))?;
            easy.low_speed_time(Duration::from_secs(60))
                .map_err(|e| HttpError::Network(e.to_string()))?;

            let mut list = curl::easy::List::new();
            for (k, v) in &request.headers {
                list.append(&format!("{}: {}", k.trim(), v.trim()))
                    .map_err(|e| HttpError::Network(e.to_string()))?;
            }
            easy.http_headers(list)
                .map_err(|e| HttpError::Network(e.to_string()))?;

            // `Rc<RefCell<_>>` rather than plain captures: `header_function`
            // and `write_function` are two distinct FnMut closures that both
            // need to read/write the same header-line buffer and header-sink
            // slot, and curl invokes them sequentially on this one thread.
            let header_lines = Rc::new(RefCell::new(Vec::<String>::new()));
            let header_lines_for_headers = header_lines.clone();
            let on_headers_slot = Rc::new(RefCell::new(Some(on_headers)));
            let on_headers_for_write = on_headers_slot.clone();
            let header_lines_for_write = header_lines.clone();
            {
                let mut transfer = easy.transfer();
                transfer
                    .header_function(move |data| {
                        if let Ok(s) = std::str::from_utf8(data) {
                            header_lines_for_headers.borrow_mut().push(s.trim_end().to_string());
                        }
                        true
                    })
                    .map_err(|e| HttpError::Network(e.to_string()))?;
                transfer
                    .write_function(move |data| {
                        if stop.load(Ordering::Relaxed) {
                            return Ok(0);
                        }
                        if let Some(sink) = on_headers_for_write.borrow_mut().take() {
                            let lines = header_lines_for_write.borrow().clone();
                            let status = parse_status_line(&lines).unwrap_or(0);
                            sink(status, lines);
                        }
                        if on_chunk(data) {
                            Ok(data.len())
                        } else {
                            Ok(0)
                        }
                    })
                    .map_err(|e| HttpError::Network(e.to_string()))?;
                transfer
                    .perform()
                    .map_err(|e| {
                        if e.is_write_error() {
                            HttpError::Aborted
                        } else {
                            HttpError::Network(e.to_string())
                        }
                    })?;
            }

            let status = easy
                .response_code()
                .map_err(|e| HttpError::Network(e.to_string()))? as u16;
            let header_lines = header_lines.borrow().clone();
            // A body with no bytes at all (e.g. `Content-Length: 0`) never
            // invokes `write_function`, so fire the header sink here instead.
            if let Some(sink) = on_headers_slot.borrow_mut().take() {
                sink(status, header_lines.clone());
            }
            Ok(HttpResponse { status, header_lines })
        })
        .await
        .map_err(|e| HttpError::Network(format!("join error: {e}")))?
    }
}
