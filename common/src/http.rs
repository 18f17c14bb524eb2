use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::HttpError;

pub type StatusCode = u16;

pub const COMMAND_PATH: &str = "/command";

pub const MAX_BODY_BYTES: usize = 4096;

pub const MAX_LINE_BYTES: usize = 2048;

pub const MAX_HEADERS: usize = 64;

pub fn reason_phrase(code: StatusCode) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        413 => "Request Entity Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub content_length: Option<usize>,
    pub authorization: Option<String>,
}

fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

impl RequestHead {
    pub fn parse_request_line(line: &str) -> Result<Self, HttpError> {
        let line = trim_line_end(line);
        let mut parts = line.split(' ').filter(|part| !part.is_empty());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(version), None) if version.starts_with("HTTP/") => {
                Ok(Self {
                    method: method.to_string(),
                    path: path.to_string(),
                    version: version.to_string(),
                    ..Self::default()
                })
            }
            _ => Err(HttpError::RequestLine(line.to_string())),
        }
    }

    // `false` marks the blank line that ends the header block.
    pub fn apply_header(&mut self, line: &str) -> Result<bool, HttpError> {
        let line = trim_line_end(line);
        if line.is_empty() {
            return Ok(false);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Header(line.to_string()))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            let length = value
                .parse::<usize>()
                .map_err(|_| HttpError::ContentLength(value.to_string()))?;
            self.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("authorization") {
            self.authorization = Some(value.to_string());
        }
        Ok(true)
    }

    fn has_body(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT")
    }

    pub fn body_len(&self) -> Result<usize, HttpError> {
        if !self.has_body() {
            return Ok(0);
        }
        let length = self.content_length.unwrap_or(0);
        if length > MAX_BODY_BYTES {
            return Err(HttpError::BodyTooLarge(length));
        }
        Ok(length)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub head: RequestHead,
    pub body: Vec<u8>,
}

impl HttpRequest {
    #[cfg(test)]
    pub(crate) fn parse(raw: &[u8]) -> Result<Self, HttpError> {
        let header_end = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .ok_or(HttpError::Incomplete)?;
        let text = String::from_utf8_lossy(&raw[..header_end]);
        let mut lines = text.split("\r\n");

        let mut head = RequestHead::parse_request_line(lines.next().unwrap_or_default())?;
        for line in lines {
            head.apply_header(line)?;
        }

        let body_start = header_end + 4;
        let body_len = head.body_len()?;
        let body = raw
            .get(body_start..body_start + body_len)
            .ok_or(HttpError::Incomplete)?
            .to_vec();
        Ok(Self { head, body })
    }

    // Auth is checked before routing.
    pub fn check_access(&self, auth_secret: &str) -> Result<(), StatusCode> {
        if !auth_secret.is_empty() {
            let password = self
                .head
                .authorization
                .as_deref()
                .and_then(basic_auth_password);
            if password.as_deref() != Some(auth_secret) {
                return Err(401);
            }
        }
        if self.head.path != COMMAND_PATH {
            return Err(404);
        }
        if self.head.method != "POST" {
            return Err(400);
        }
        Ok(())
    }
}

pub fn basic_auth_password(value: &str) -> Option<String> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_, password) = credentials.split_once(':')?;
    Some(password.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/json; charset=utf-8",
            headers: Vec::new(),
            body,
        }
    }

    pub fn error(status: StatusCode) -> Self {
        let mut headers = Vec::new();
        if status == 401 {
            headers.push(("WWW-Authenticate", "Basic realm=\"Login\"".to_string()));
        }
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            headers,
            body: format!("{}\r\n", reason_phrase(status)).into_bytes(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
