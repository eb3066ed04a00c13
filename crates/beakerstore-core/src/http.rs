//! Blocking libcurl helpers shared by the registry and blob storage clients.

use std::str;

use url::Url;

/// Buffered response for small JSON requests.
#[derive(Debug)]
pub(crate) struct Response {
    pub status: u32,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        is_ok(self.status)
    }
}

/// Only a plain 200 carries the whole resource. A 206 is a fragment and a
/// 204 has no body to cache.
pub(crate) fn is_ok(status: u32) -> bool {
    status == 200
}

pub(crate) fn user_agent() -> String {
    format!("beakerstore/{}", env!("CARGO_PKG_VERSION"))
}

/// Header list carrying a bearer token, if any.
pub(crate) fn auth_headers(bearer: Option<&str>) -> Result<curl::easy::List, curl::Error> {
    let mut list = curl::easy::List::new();
    if let Some(token) = bearer {
        list.append(&format!("Authorization: Bearer {}", token.trim()))?;
    }
    Ok(list)
}

/// GET `url` and collect the whole body. Only for small responses.
pub(crate) fn get(url: &Url, bearer: Option<&str>) -> Result<Response, curl::Error> {
    let mut body = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url.as_str())?;
    easy.follow_location(true)?;
    easy.useragent(&user_agent())?;
    easy.http_headers(auth_headers(bearer)?)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let status = easy.response_code()?;
    Ok(Response { status, body })
}

/// Status code from the last `HTTP/` line; redirects produce several.
pub(crate) fn parse_http_status(lines: &[String]) -> Option<u32> {
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("HTTP/"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
}

/// Header callback helper: keeps only lines of the latest response.
pub(crate) fn record_header(lines: &mut Vec<String>, data: &[u8]) {
    if let Ok(s) = str::from_utf8(data) {
        let line = s.trim_end();
        if line.starts_with("HTTP/") {
            lines.clear();
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
}
