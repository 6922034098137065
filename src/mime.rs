//! Minimal MIME parsing: header blocks, media types and multipart bodies.
//!
//! The multipart reader works on the in-memory body and yields parts
//! lazily, so a caller can stop at the first part it does not like
//! without looking at the rest of the body.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"^[!#$%&'*+.^_`|~0-9A-Za-z-]+$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MimeError {
    #[error("no media type")]
    MissingMediaType,
    #[error("invalid media type {0:?}")]
    InvalidMediaType(String),
    #[error("invalid media type parameter near {0:?}")]
    InvalidParameter(String),
    #[error("duplicate media type parameter {0:?}")]
    DuplicateParameter(String),
    #[error("multipart body has no {0:?} delimiter")]
    MissingBoundary(String),
    #[error("header block is not terminated by an empty line")]
    TruncatedHeaders,
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("multipart body ends inside part {0}")]
    TruncatedPart(usize),
}

pub type Headers = Vec<(String, String)>;

/// First value of the named header, compared case-insensitively.
pub fn header_value<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Returns the line starting at `pos` without its line ending, and the
/// offset of the following line.
fn line_at(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    if pos >= data.len() {
        return None;
    }
    match data[pos..].iter().position(|b| *b == b'\n') {
        Some(i) => {
            let line = &data[pos..pos + i];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            Some((line, pos + i + 1))
        }
        None => Some((&data[pos..], data.len())),
    }
}

/// Parses a header block starting at `pos`, unfolding continuation lines.
///
/// Returns the headers in order and the offset just past the empty line
/// that ends the block.
pub fn read_header_block(data: &[u8], pos: usize) -> Result<(Headers, usize), MimeError> {
    let mut headers: Headers = Vec::new();
    let mut pos = pos;

    loop {
        let (line, next) = line_at(data, pos).ok_or(MimeError::TruncatedHeaders)?;
        pos = next;
        if line.is_empty() {
            return Ok((headers, pos));
        }

        let text = String::from_utf8_lossy(line);
        if text.starts_with(' ') || text.starts_with('\t') {
            let (_, value) = headers
                .last_mut()
                .ok_or_else(|| MimeError::MalformedHeader(text.to_string()))?;
            value.push(' ');
            value.push_str(text.trim());
            continue;
        }

        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| MimeError::MalformedHeader(text.to_string()))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(MimeError::MalformedHeader(text.to_string()));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Lowercased `type/subtype`
    pub essence: String,
    params: HashMap<String, String>,
}

impl MediaType {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Reads a quoted-string starting right after the opening quote. Returns
/// the unescaped value and the remaining input after the closing quote.
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((value, &input[i + 1..])),
            '\\' => value.push(chars.next()?.1),
            _ => value.push(c),
        }
    }
    None
}

/// Parses a `Content-Type` style value such as
/// `multipart/encrypted; protocol="application/pgp-encrypted"; boundary=x`.
pub fn parse_media_type(value: &str) -> Result<MediaType, MimeError> {
    let (essence, mut rest) = value.split_once(';').unwrap_or((value, ""));
    let essence = essence.trim().to_ascii_lowercase();
    if essence.is_empty() {
        return Err(MimeError::MissingMediaType);
    }
    let valid = essence
        .split_once('/')
        .map(|(t, s)| TOKEN_RE.is_match(t) && TOKEN_RE.is_match(s))
        .unwrap_or(false);
    if !valid {
        return Err(MimeError::InvalidMediaType(essence));
    }

    let mut params = HashMap::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let (name, after_eq) = rest
            .split_once('=')
            .ok_or_else(|| MimeError::InvalidParameter(rest.to_string()))?;
        let name = name.trim().to_ascii_lowercase();
        if !TOKEN_RE.is_match(&name) {
            return Err(MimeError::InvalidParameter(rest.to_string()));
        }

        let after_eq = after_eq.trim_start();
        let (param_value, remainder) = if let Some(quoted) = after_eq.strip_prefix('"') {
            read_quoted(quoted).ok_or_else(|| MimeError::InvalidParameter(rest.to_string()))?
        } else {
            let end = after_eq
                .find(|c: char| c == ';' || c.is_whitespace())
                .unwrap_or(after_eq.len());
            let token = &after_eq[..end];
            if !TOKEN_RE.is_match(token) {
                return Err(MimeError::InvalidParameter(rest.to_string()));
            }
            (token.to_string(), &after_eq[end..])
        };

        let remainder = remainder.trim_start();
        rest = match remainder.strip_prefix(';') {
            Some(next) => next,
            None if remainder.is_empty() => remainder,
            None => return Err(MimeError::InvalidParameter(remainder.to_string())),
        };

        if params.insert(name.clone(), param_value).is_some() {
            return Err(MimeError::DuplicateParameter(name));
        }
    }

    Ok(MediaType { essence, params })
}

#[derive(Debug, Clone)]
pub struct Part<'a> {
    headers: Headers,
    body: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn new(headers: Headers, body: &'a [u8]) -> Self {
        Part { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Next,
    Close,
}

/// Lazy reader over the parts of a multipart body.
pub struct Multipart<'a> {
    data: &'a [u8],
    dash_boundary: Vec<u8>,
    pos: usize,
    parts_read: usize,
    body_at: Option<usize>,
    finished: bool,
}

impl<'a> Multipart<'a> {
    pub fn new(data: &'a [u8], boundary: &str) -> Self {
        Self {
            data,
            dash_boundary: format!("--{boundary}").into_bytes(),
            pos: 0,
            parts_read: 0,
            body_at: None,
            finished: false,
        }
    }

    fn delimiter(&self, line: &[u8]) -> Option<Delimiter> {
        // transport padding after the boundary is allowed
        let end = line
            .iter()
            .rposition(|b| *b != b' ' && *b != b'\t')
            .map_or(0, |i| i + 1);
        let line = &line[..end];

        let rest = line.strip_prefix(self.dash_boundary.as_slice())?;
        match rest {
            b"" => Some(Delimiter::Next),
            b"--" => Some(Delimiter::Close),
            _ => None,
        }
    }

    /// Offset of the next delimiter line at or after `pos`, with its kind.
    fn find_delimiter(&self, mut pos: usize) -> Option<(usize, usize, Delimiter)> {
        while let Some((line, next)) = line_at(self.data, pos) {
            if let Some(kind) = self.delimiter(line) {
                return Some((pos, next, kind));
            }
            pos = next;
        }
        None
    }

    /// Reads the delimiter and header block of the next part without
    /// looking for the end of its body. An unread body of the previous
    /// part is skipped first.
    pub fn next_headers(&mut self) -> Result<Option<Headers>, MimeError> {
        if self.body_at.is_some() {
            self.read_body()?;
        }
        if self.finished {
            return Ok(None);
        }

        let Some((_, headers_at, kind)) = self.find_delimiter(self.pos) else {
            self.finished = true;
            return Err(MimeError::MissingBoundary(
                String::from_utf8_lossy(&self.dash_boundary).to_string(),
            ));
        };
        if kind == Delimiter::Close {
            self.finished = true;
            return Ok(None);
        }

        let (headers, body_at) = read_header_block(self.data, headers_at).map_err(|e| {
            self.finished = true;
            e
        })?;
        self.body_at = Some(body_at);
        Ok(Some(headers))
    }

    /// Body of the part whose headers were returned last. Empty when no
    /// part is pending.
    pub fn read_body(&mut self) -> Result<&'a [u8], MimeError> {
        let Some(body_at) = self.body_at.take() else {
            return Ok(&[]);
        };
        let Some((delimiter_at, _, _)) = self.find_delimiter(body_at) else {
            self.finished = true;
            return Err(MimeError::TruncatedPart(self.parts_read));
        };

        // the line break before a delimiter belongs to the delimiter
        let mut body = &self.data[body_at..delimiter_at];
        body = body.strip_suffix(b"\n").unwrap_or(body);
        body = body.strip_suffix(b"\r").unwrap_or(body);

        self.pos = delimiter_at;
        self.parts_read += 1;
        Ok(body)
    }

    pub fn next_part(&mut self) -> Result<Option<Part<'a>>, MimeError> {
        let Some(headers) = self.next_headers()? else {
            return Ok(None);
        };
        let body = self.read_body()?;
        Ok(Some(Part { headers, body }))
    }
}

impl<'a> Iterator for Multipart<'a> {
    type Item = Result<Part<'a>, MimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_part().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_type() {
        let mt = parse_media_type(
            "multipart/encrypted; protocol=\"application/pgp-encrypted\";\r\n\tboundary=\"1234\"",
        )
        .unwrap();
        assert_eq!(mt.essence, "multipart/encrypted");
        assert_eq!(mt.param("protocol"), Some("application/pgp-encrypted"));
        assert_eq!(mt.param("Boundary"), Some("1234"));

        let mt = parse_media_type("Text/Plain").unwrap();
        assert_eq!(mt.essence, "text/plain");
        assert_eq!(mt.param("charset"), None);

        let mt = parse_media_type("text/plain; charset=utf-8;").unwrap();
        assert_eq!(mt.param("charset"), Some("utf-8"));

        let mt = parse_media_type(r#"multipart/mixed; boundary="a \"quoted\" b""#).unwrap();
        assert_eq!(mt.param("boundary"), Some(r#"a "quoted" b"#));
    }

    #[test]
    fn test_parse_media_type_errors() {
        assert_eq!(parse_media_type(""), Err(MimeError::MissingMediaType));
        assert_eq!(parse_media_type("  ; charset=x"), Err(MimeError::MissingMediaType));
        assert!(matches!(
            parse_media_type("multipart"),
            Err(MimeError::InvalidMediaType(_))
        ));
        assert!(matches!(
            parse_media_type("text/plain; charset"),
            Err(MimeError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_media_type("text/plain; boundary=\"unterminated"),
            Err(MimeError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_media_type("text/plain; a=1; A=2"),
            Err(MimeError::DuplicateParameter(_))
        ));
    }

    #[test]
    fn test_read_header_block() {
        let data = b"Subject: hello\r\nX-Long: one\r\n two\r\n\r\nbody";
        let (headers, body_at) = read_header_block(data, 0).unwrap();
        assert_eq!(header_value(&headers, "subject"), Some("hello"));
        assert_eq!(header_value(&headers, "x-long"), Some("one two"));
        assert_eq!(&data[body_at..], b"body");

        assert_eq!(
            read_header_block(b"Subject: x\r\n", 0),
            Err(MimeError::TruncatedHeaders)
        );
        assert!(matches!(
            read_header_block(b"not a header\r\n\r\n", 0),
            Err(MimeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_multipart_parts() {
        let body = b"preamble\r\n\
                     --xyz\r\n\
                     Content-Type: text/plain\r\n\
                     \r\n\
                     first\r\n\
                     line\r\n\
                     --xyz  \r\n\
                     \r\n\
                     second\r\n\
                     --xyz--\r\n\
                     epilogue\r\n";
        let parts: Vec<Part> = Multipart::new(body, "xyz")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].header("content-type"), Some("text/plain"));
        assert_eq!(parts[0].body(), b"first\r\nline");
        assert_eq!(parts[1].header("content-type"), None);
        assert_eq!(parts[1].body(), b"second");
    }

    #[test]
    fn test_multipart_lf_line_endings() {
        let body = b"--b\nContent-Type: a/b\n\nx\n--b--\n";
        let parts: Vec<Part> = Multipart::new(body, "b").collect::<Result<_, _>>().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body(), b"x");
    }

    #[test]
    fn test_multipart_ignores_boundary_prefix_lines() {
        let body = b"--b\r\n\r\n--bb\r\n--b--x\r\n--b--\r\n";
        let parts: Vec<Part> = Multipart::new(body, "b").collect::<Result<_, _>>().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body(), b"--bb\r\n--b--x");
    }

    #[test]
    fn test_multipart_errors() {
        let mut reader = Multipart::new(b"just some text\r\n", "b");
        assert!(matches!(
            reader.next_part(),
            Err(MimeError::MissingBoundary(_))
        ));
        assert!(reader.next().is_none());

        let mut reader = Multipart::new(b"--b\r\nContent-Type: a/b\r\n\r\nno end\r\n", "b");
        assert_eq!(reader.next_part().unwrap_err(), MimeError::TruncatedPart(0));

        let mut reader = Multipart::new(b"--b\r\nContent-Type: a/b\r\n", "b");
        assert_eq!(reader.next_part().unwrap_err(), MimeError::TruncatedHeaders);
    }

    #[test]
    fn test_multipart_headers_before_body() {
        let body = b"--b\r\nContent-Type: a/b\r\n\r\nx\r\n--b\r\nContent-Type: c/d\r\n\r\nno end\r\n";
        let mut reader = Multipart::new(body, "b");

        let headers = reader.next_headers().unwrap().unwrap();
        assert_eq!(header_value(&headers, "Content-Type"), Some("a/b"));
        // first body is skipped, not read
        let headers = reader.next_headers().unwrap().unwrap();
        assert_eq!(header_value(&headers, "Content-Type"), Some("c/d"));
        assert_eq!(reader.read_body().unwrap_err(), MimeError::TruncatedPart(1));
    }

    #[test]
    fn test_multipart_close_only() {
        let mut reader = Multipart::new(b"--b--\r\n", "b");
        assert!(reader.next_part().unwrap().is_none());
    }
}
