//! Request-header assembly and response-header parsing (§4.3 steps 2 and 6).
//!
//! Parsing splits on the first `:`, trims, and matches names
//! case-insensitively, widened to the full header set the Worker cares
//! about.

use crate::request::Request;

pub const DEFAULT_USER_AGENT: &str = "ddm/0.1";

/// Builds the header list for one attempt: per-request custom headers, then
/// `Cookie`/`Referer`/`User-Agent`, then (if resuming) `If-Match`/`Range`.
pub fn build_request_headers(req: &Request, resume_from: Option<u64>) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = req
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(cookies) = &req.cookies {
        headers.push(("Cookie".to_string(), cookies.clone()));
    }
    if let Some(referer) = &req.referer {
        headers.push(("Referer".to_string(), referer.clone()));
    }
    headers.push((
        "User-Agent".to_string(),
        req.user_agent.clone().unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
    ));

    if let Some(offset) = resume_from {
        if let Some(etag) = &req.etag {
            headers.push(("If-Match".to_string(), etag.clone()));
        }
        headers.push(("Range".to_string(), format!("bytes={offset}-")));
    }

    headers
}

/// The subset of a response's header lines the Worker acts on (§4.3 step 6,
/// §6 "Wire behavior").
#[derive(Debug, Clone, Default)]
pub struct ParsedHeaders {
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub content_location: Option<String>,
    pub chunked: bool,
    pub content_length: Option<u64>,
    pub location: Option<String>,
    /// `Retry-After` in seconds; non-integer values are treated as 0 (§6).
    pub retry_after_secs: Option<u64>,
}

pub fn parse_response_headers(lines: &[String]) -> ParsedHeaders {
    let mut out = ParsedHeaders::default();
    for line in lines {
        let line = line.trim();
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("etag") {
            // Kept quoted, exactly as the server sent it: `If-Match` needs
            // the entity-tag's quotes to be a well-formed strong comparison,
            // and `build_request_headers` re-sends this value verbatim.
            out.etag = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            out.content_type = Some(normalize_mime(value));
        } else if name.eq_ignore_ascii_case("content-disposition") {
            out.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-location") {
            out.content_location = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            out.chunked = value.eq_ignore_ascii_case("chunked");
        } else if name.eq_ignore_ascii_case("content-length") {
            out.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("location") {
            out.location = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("retry-after") {
            out.retry_after_secs = Some(value.trim().parse::<u64>().unwrap_or(0));
        }
    }
    out
}

/// Trims, lowercases, and strips parameters from a `Content-Type` value
/// (§3 `mime_type`: "normalized (trimmed, lowercased, parameters stripped)").
pub fn normalize_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}
