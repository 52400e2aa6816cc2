use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use liveview_common::config::StreamConfig;
use liveview_common::Payload;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::slicer::{Connector, PayloadSlicer};
use crate::FetchError;

const HEADER_END: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// A part larger than this without a closing boundary is treated as garbage.
const MAX_PART_SIZE: usize = 8 * 1024 * 1024;

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental `multipart/x-mixed-replace` parser.
///
/// Feed it network chunks of any size with [`feed`](Self::feed) and pull
/// complete parts with [`next_part`](Self::next_part). Boundaries and header
/// terminators may be split across chunks.
pub struct MultipartParser {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Offset in `buffer` from which to resume the boundary search while collecting.
    scan_from: usize,
}

impl MultipartParser {
    /// `boundary` is the bare token, with or without the leading `--`.
    pub fn new(boundary: &str) -> Self {
        let token = boundary.trim().trim_start_matches("--");
        let mut delimiter = Vec::with_capacity(token.len() + 4);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(token.as_bytes());
        delimiter.extend_from_slice(CRLF);
        Self {
            delimiter,
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes held back waiting for more input.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Return the next complete part body, possibly empty, or `None` if more input is needed.
    pub fn next_part(&mut self) -> Option<Bytes> {
        let delim_len = self.delimiter.len();
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.delimiter) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + delim_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > delim_len {
                            let _ = self.buffer.split_to(self.buffer.len() - delim_len);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let skip = if self.buffer.starts_with(CRLF) {
                        // Part without headers
                        Some(CRLF.len())
                    } else {
                        find_subsequence(&self.buffer, HEADER_END).map(|pos| pos + HEADER_END.len())
                    };
                    match skip {
                        Some(skip) => {
                            let _ = self.buffer.split_to(skip);
                            self.scan_from = 0;
                            self.state = ParseState::CollectingJpeg;
                        }
                        None => return None,
                    }
                }
                ParseState::CollectingJpeg => {
                    let found = find_subsequence(&self.buffer[self.scan_from..], &self.delimiter);
                    let Some(pos) = found else {
                        if self.buffer.len() > MAX_PART_SIZE {
                            warn!(
                                buffered = self.buffer.len(),
                                "multipart part exceeds size limit, resynchronizing"
                            );
                            self.buffer.clear();
                            self.scan_from = 0;
                            self.state = ParseState::SeekingBoundary;
                            return None;
                        }
                        // Avoid re-scanning old data on the next call
                        self.scan_from = self.buffer.len().saturating_sub(delim_len);
                        return None;
                    };

                    let jpeg_end = self.scan_from + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(CRLF) {
                        jpeg_end - CRLF.len()
                    } else {
                        jpeg_end
                    };

                    let mut part = self.buffer.split_to(jpeg_end + delim_len);
                    part.truncate(end);
                    // Already past boundary, go to header parsing
                    self.state = ParseState::SeekingHeaderEnd;
                    return Some(part.freeze());
                }
            }
        }
    }
}

/// Extract the boundary token from a `multipart/x-mixed-replace` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let token = value.trim().trim_matches('"').trim_start_matches("--");
        (!token.is_empty()).then(|| token.to_string())
    })
}

/// Opens liveview connections over HTTP.
pub struct HttpConnector {
    client: reqwest::Client,
    default_boundary: String,
    read_timeout: Duration,
}

impl HttpConnector {
    pub fn new(config: &StreamConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            default_boundary: config.boundary.clone(),
            read_timeout: config.read_timeout(),
        })
    }
}

impl Connector for HttpConnector {
    type Slicer = HttpSlicer;

    async fn open(&self, url: &str) -> Result<HttpSlicer, FetchError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        // connect_timeout only covers the TCP handshake; a camera that accepts
        // and then stays silent must not hold the fetch task forever.
        let response = tokio::time::timeout(self.read_timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| FetchError::ResponseTimeout(self.read_timeout))?
            .map_err(FetchError::HttpConnect)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| self.default_boundary.clone());

        info!(status = %response.status(), %url, boundary, "connected to liveview stream");

        Ok(HttpSlicer {
            body: Some(response.bytes_stream().boxed()),
            parser: MultipartParser::new(&boundary),
            read_timeout: self.read_timeout,
        })
    }
}

/// Slices JPEG payloads out of an open multipart HTTP response.
pub struct HttpSlicer {
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    parser: MultipartParser,
    read_timeout: Duration,
}

impl PayloadSlicer for HttpSlicer {
    async fn next_payload(&mut self) -> Result<Option<Payload>, FetchError> {
        let read_timeout = self.read_timeout;
        loop {
            if let Some(part) = self.parser.next_part() {
                if part.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(Payload::new(part)));
            }

            let body = self.body.as_mut().ok_or(FetchError::Closed)?;
            let chunk = tokio::time::timeout(read_timeout, body.next())
                .await
                .map_err(|_| FetchError::ReadTimeout(read_timeout))?;
            match chunk {
                Some(Ok(bytes)) => self.parser.feed(&bytes),
                Some(Err(e)) => return Err(FetchError::HttpStream(e)),
                None => return Err(FetchError::EndOfStream),
            }
        }
    }

    fn close(&mut self) {
        if self.body.take().is_some() {
            debug!(buffered = self.parser.buffered(), "closed liveview connection");
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(headers: &str, body: &[u8]) -> Vec<u8> {
        let mut out = b"--frame\r\n".to_vec();
        out.extend_from_slice(headers.as_bytes());
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn parses_consecutive_parts() {
        let mut stream = part("Content-Type: image/jpeg", b"\xFF\xD8one\xFF\xD9");
        stream.extend(part(
            "Content-Type: image/jpeg\r\nContent-Length: 8",
            b"\xFF\xD8two\xFF\xD9",
        ));
        stream.extend_from_slice(b"--frame\r\n");

        let mut parser = MultipartParser::new("frame");
        parser.feed(&stream);
        assert_eq!(parser.next_part().unwrap().as_ref(), b"\xFF\xD8one\xFF\xD9");
        assert_eq!(parser.next_part().unwrap().as_ref(), b"\xFF\xD8two\xFF\xD9");
        assert!(parser.next_part().is_none());
    }

    #[test]
    fn boundary_split_across_chunks() {
        let mut stream = b"preamble junk".to_vec();
        stream.extend(part("Content-Type: image/jpeg", b"\xFF\xD8abc"));
        stream.extend_from_slice(b"--frame\r\n");

        let mut parser = MultipartParser::new("--frame");
        let mut parts = Vec::new();
        for byte in &stream {
            parser.feed(std::slice::from_ref(byte));
            while let Some(p) = parser.next_part() {
                parts.push(p);
            }
        }
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_ref(), b"\xFF\xD8abc");
    }

    #[test]
    fn empty_part_is_returned_empty() {
        let mut stream = part("Content-Type: image/jpeg", b"");
        stream.extend_from_slice(b"--frame\r\n");

        let mut parser = MultipartParser::new("frame");
        parser.feed(&stream);
        assert!(parser.next_part().unwrap().is_empty());
    }

    #[test]
    fn part_without_headers() {
        let mut parser = MultipartParser::new("frame");
        parser.feed(b"--frame\r\n\r\n\xFF\xD8xyz\r\n--frame\r\n");
        assert_eq!(parser.next_part().unwrap().as_ref(), b"\xFF\xD8xyz");
    }

    #[test]
    fn incomplete_part_waits_for_more_input() {
        let mut parser = MultipartParser::new("frame");
        parser.feed(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8partial");
        assert!(parser.next_part().is_none());
        parser.feed(b"-rest\r\n--frame\r\n");
        assert_eq!(parser.next_part().unwrap().as_ref(), b"\xFF\xD8partial-rest");
    }

    #[test]
    fn boundary_from_header() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=frame").as_deref(),
            Some("frame")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;Boundary=\"--myboundary\"")
                .as_deref(),
            Some("myboundary")
        );
        assert!(boundary_from_content_type("image/jpeg").is_none());
        assert!(boundary_from_content_type("multipart/x-mixed-replace; boundary=").is_none());
    }

    #[tokio::test]
    async fn silent_server_times_out_on_open() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and hold them open without ever answering.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = StreamConfig {
            connect_timeout_secs: 1,
            read_timeout_secs: 1,
            ..StreamConfig::default()
        };
        let connector = HttpConnector::new(&config).unwrap();
        let url = format!("http://{addr}/liveview");

        let result = tokio::time::timeout(Duration::from_secs(5), connector.open(&url))
            .await
            .expect("open should give up on its own");
        assert!(matches!(result, Err(FetchError::ResponseTimeout(_))));
        server.abort();
    }

    #[test]
    fn find_subsequence_basics() {
        assert_eq!(find_subsequence(b"abcdef", b"cd"), Some(2));
        assert_eq!(find_subsequence(b"ab", b"abc"), None);
    }
}
