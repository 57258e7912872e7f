//! Chat stream over HTTP.
//!
//! The server answers `POST /chat/stream` with newline-delimited JSON frames.
//! Each session gets a reader thread that forwards frames into the sink until
//! a terminal frame or EOF. Closing the channel ends the body at the next read
//! and the connection is dropped rather than returned to the pool.

use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::{Frame, FrameSink, SessionId, StreamChannel, StreamError, StreamRequest, StreamTransport};

pub struct HttpTransport {
    endpoint: String,
    api_key: String,
    client: reqwest::blocking::Client,
    sink: FrameSink,
}

impl HttpTransport {
    pub fn new(
        api_url: &str,
        api_key: &str,
        timeout: Duration,
        sink: FrameSink,
    ) -> Result<Self, StreamError> {
        let base = api_url.strip_suffix('/').unwrap_or(api_url);
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|err| StreamError::Transport(err.to_string()))?;

        Ok(Self {
            endpoint: format!("{base}/chat/stream"),
            api_key: api_key.to_string(),
            client,
            sink,
        })
    }
}

struct HttpChannel {
    closed: Arc<AtomicBool>,
}

impl StreamChannel for HttpChannel {
    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl StreamTransport for HttpTransport {
    fn open(
        &self,
        session: SessionId,
        request: &StreamRequest,
    ) -> Result<Box<dyn StreamChannel>, StreamError> {
        let closed = Arc::new(AtomicBool::new(false));

        let builder = self.client.post(&self.endpoint).json(&json!({
            "query": request.query,
            "document_id": request.document_id,
            "api_key": self.api_key,
        }));

        let sink = self.sink.clone();
        let reader_closed = closed.clone();

        std::thread::Builder::new()
            .name(format!("{session}"))
            .spawn(move || {
                log::debug!("{session}: connecting");
                let frame = match builder.send() {
                    Ok(resp) if !resp.status().is_success() => Some(Frame::Error {
                        message: format!("server returned {}", resp.status()),
                    }),
                    Ok(resp) => {
                        let body = ClosableBody::new(resp, &reader_closed);
                        read_frames(BufReader::new(body), &reader_closed, |frame| {
                            sink(session, frame)
                        })
                    }
                    Err(err) => Some(Frame::Error {
                        message: err.to_string(),
                    }),
                };

                if reader_closed.load(Ordering::Relaxed) {
                    log::debug!("{session}: closed, connection released");
                } else if let Some(frame) = frame {
                    sink(session, frame);
                }
            })
            .map_err(|err| StreamError::Transport(err.to_string()))?;

        Ok(Box::new(HttpChannel { closed }))
    }
}

/// Reports EOF once the channel is closed, so the reader stops at the next
/// chunk instead of draining the body.
struct ClosableBody<'a, R> {
    inner: R,
    closed: &'a AtomicBool,
}

impl<'a, R: Read> ClosableBody<'a, R> {
    fn new(inner: R, closed: &'a AtomicBool) -> Self {
        Self { inner, closed }
    }
}

impl<R: Read> Read for ClosableBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Ok(0);
        }
        self.inner.read(buf)
    }
}

/// Parses one line of the stream. Blank lines and SSE `data:` prefixes are tolerated.
pub fn parse_frame(line: &str) -> Result<Option<Frame>, serde_json::Error> {
    let line = line.trim();
    let line = line.strip_prefix("data:").map(str::trim).unwrap_or(line);

    if line.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(line).map(Some)
}

/// Forwards frames until a terminal one. Returns a synthetic error frame when
/// the body ends early or can't be read.
fn read_frames<R: BufRead>(
    reader: R,
    closed: &AtomicBool,
    mut forward: impl FnMut(Frame),
) -> Option<Frame> {
    for line in reader.lines() {
        if closed.load(Ordering::Relaxed) {
            return None;
        }

        let line = match line {
            Ok(line) => line,
            Err(err) => {
                return Some(Frame::Error {
                    message: err.to_string(),
                })
            }
        };

        match parse_frame(&line) {
            Ok(Some(frame)) => {
                let terminal = frame.is_terminal();
                forward(frame);
                if terminal {
                    return None;
                }
            }
            Ok(None) => {}
            Err(err) => {
                log::error!("{err}. tried to parse: {line:?}");
                return Some(Frame::Error {
                    message: format!("malformed frame: {err}"),
                });
            }
        }
    }

    if closed.load(Ordering::Relaxed) {
        return None;
    }

    Some(Frame::Error {
        message: "stream ended before completion".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_frames() {
        assert_eq!(
            parse_frame(r#"{"type":"chunk","content":"Hel"}"#).unwrap(),
            Some(Frame::chunk("Hel"))
        );
        assert_eq!(
            parse_frame(r#"data: {"type":"complete"}"#).unwrap(),
            Some(Frame::Complete)
        );
        assert_eq!(
            parse_frame(r#"{"type":"error","message":"quota"}"#).unwrap(),
            Some(Frame::Error {
                message: "quota".into()
            })
        );
        assert_eq!(parse_frame("   ").unwrap(), None);
        assert!(parse_frame("{not json").is_err());
    }

    #[test]
    fn test_read_frames_stops_at_terminal() {
        let body = "{\"type\":\"chunk\",\"content\":\"a\"}\n\n{\"type\":\"complete\"}\n{\"type\":\"chunk\",\"content\":\"ignored\"}\n";
        let closed = AtomicBool::new(false);
        let mut frames = vec![];

        let trailer = read_frames(body.as_bytes(), &closed, |f| frames.push(f));

        assert_eq!(trailer, None);
        assert_eq!(frames, vec![Frame::chunk("a"), Frame::Complete]);
    }

    #[test]
    fn test_read_frames_reports_truncated_body() {
        let body = "{\"type\":\"chunk\",\"content\":\"a\"}\n";
        let closed = AtomicBool::new(false);
        let mut frames = vec![];

        let trailer = read_frames(body.as_bytes(), &closed, |f| frames.push(f));

        assert!(matches!(trailer, Some(Frame::Error { .. })));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_read_frames_honours_close() {
        let body = "{\"type\":\"chunk\",\"content\":\"a\"}\n";
        let closed = AtomicBool::new(true);
        let mut frames = vec![];

        assert_eq!(read_frames(body.as_bytes(), &closed, |f| frames.push(f)), None);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_close_mid_stream_stops_forwarding() {
        let body = Cursor::new(
            "{\"type\":\"chunk\",\"content\":\"a\"}\n{\"type\":\"chunk\",\"content\":\"b\"}\n{\"type\":\"complete\"}\n",
        );
        let closed = AtomicBool::new(false);
        let mut frames = vec![];

        let trailer = read_frames(BufReader::new(body), &closed, |f| {
            frames.push(f);
            closed.store(true, Ordering::Relaxed);
        });

        assert_eq!(trailer, None);
        assert_eq!(frames, vec![Frame::chunk("a")]);
    }

    #[test]
    fn test_truncated_cursor_body_yields_error_frame() {
        let body = Cursor::new("{\"type\":\"chunk\",\"content\":\"part\"}\n{\"type\":\"chu");
        let closed = AtomicBool::new(false);
        let mut frames = vec![];

        let trailer = read_frames(BufReader::new(body), &closed, |f| frames.push(f));

        assert_eq!(frames, vec![Frame::chunk("part")]);
        match trailer {
            Some(Frame::Error { message }) => assert!(message.starts_with("malformed frame")),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn test_body_without_terminal_frame_is_incomplete() {
        let body = Cursor::new("{\"type\":\"chunk\",\"content\":\"part\"}\n\n");
        let closed = AtomicBool::new(false);
        let mut frames = vec![];

        let trailer = read_frames(BufReader::new(body), &closed, |f| frames.push(f));

        assert_eq!(frames, vec![Frame::chunk("part")]);
        assert_eq!(
            trailer,
            Some(Frame::Error {
                message: "stream ended before completion".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_frame_type_is_malformed() {
        let body = Cursor::new("{\"type\":\"ping\"}\n{\"type\":\"complete\"}\n");
        let closed = AtomicBool::new(false);
        let mut frames = vec![];

        let trailer = read_frames(BufReader::new(body), &closed, |f| frames.push(f));

        assert!(frames.is_empty());
        match trailer {
            Some(Frame::Error { message }) => assert!(message.starts_with("malformed frame")),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn test_closable_body_reads_eof_after_close() {
        let closed = AtomicBool::new(false);
        let mut body = ClosableBody::new(Cursor::new(b"abcdef".to_vec()), &closed);
        let mut buf = [0u8; 3];

        assert_eq!(body.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");

        closed.store(true, Ordering::Relaxed);
        assert_eq!(body.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_closed_body_ends_line_reader() {
        let closed = AtomicBool::new(true);
        let body = ClosableBody::new(Cursor::new("{\"type\":\"complete\"}\n"), &closed);
        let mut frames = vec![];

        assert_eq!(read_frames(BufReader::new(body), &closed, |f| frames.push(f)), None);
        assert!(frames.is_empty());
    }
}
