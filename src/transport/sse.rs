//! Server-Sent Events framing (Bytes -> frames).
//!
//! Frames are split on a blank line. `data:` lines of one frame are joined with `\n`,
//! the optional `event:` name is kept, comment lines are dropped, and a `[DONE]` payload
//! ends the stream. Bytes are buffered raw so multi-byte characters split across network
//! chunks decode correctly.

use crate::BoxStream;
use bytes::Bytes;
use futures::{stream, StreamExt};

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

pub struct SseDecoder {
    done_signal: String,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new("[DONE]")
    }
}

impl SseDecoder {
    pub fn new(done_signal: impl Into<String>) -> Self {
        Self {
            done_signal: done_signal.into(),
        }
    }

    fn parse_frame(raw: &str) -> Option<SseFrame> {
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        for line in raw.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                data.push(rest.strip_prefix(' ').unwrap_or(rest));
            } else if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.trim().to_string());
            }
        }
        if data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event,
            data: data.join("\n"),
        })
    }

    /// Finds the end of the next frame: returns (frame_end, rest_start).
    fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
        let mut i = 0;
        while i + 1 < buf.len() {
            if buf[i] == b'\n' && buf[i + 1] == b'\n' {
                return Some((i, i + 2));
            }
            if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
                return Some((i, i + 4));
            }
            i += 1;
        }
        None
    }

    pub fn decode(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, SseFrame> {
        let done_signal = self.done_signal.clone();

        let stream = stream::unfold(
            (input, Vec::<u8>::new(), false),
            move |(mut input, mut buf, finished)| {
                let done_signal = done_signal.clone();
                async move {
                    if finished {
                        return None;
                    }
                    loop {
                        if let Some((end, rest)) = Self::find_boundary(&buf) {
                            let raw = String::from_utf8_lossy(&buf[..end]).into_owned();
                            buf.drain(..rest);
                            match Self::parse_frame(&raw) {
                                Some(f) if f.data.trim() == done_signal => return None,
                                Some(f) => return Some((Ok(f), (input, buf, false))),
                                None => continue,
                            }
                        }

                        match input.next().await {
                            Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                            Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                            None => {
                                // EOF: flush a trailing frame without its blank line.
                                let raw = String::from_utf8_lossy(&buf).into_owned();
                                return match Self::parse_frame(&raw) {
                                    Some(f) if f.data.trim() != done_signal => {
                                        Some((Ok(f), (input, Vec::new(), true)))
                                    }
                                    _ => None,
                                };
                            }
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(parts: Vec<&'static [u8]>) -> BoxStream<'static, Bytes> {
        Box::pin(stream::iter(
            parts.into_iter().map(|p| Ok(Bytes::from_static(p))),
        ))
    }

    #[tokio::test]
    async fn splits_frames_across_chunks() {
        let bytes = input(vec![
            b"data: {\"a\":1}\n".as_slice(),
            b"\ndata: {\"a\"".as_slice(),
            b":2}\n\n: keepalive\n\ndata: [DONE]\n\ndata: {\"a\":3}\n\n".as_slice(),
        ]);
        let frames: Vec<_> = SseDecoder::default()
            .decode(bytes)
            .map(|f| f.unwrap().data)
            .collect()
            .await;
        assert_eq!(frames, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[tokio::test]
    async fn keeps_event_names_and_crlf() {
        let bytes = input(vec![b"event: content_block_delta\r\ndata: {}\r\n\r\n".as_slice()]);
        let frames: Vec<_> = SseDecoder::default()
            .decode(bytes)
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(frames[0].data, "{}");
    }

    #[tokio::test]
    async fn multibyte_split_is_preserved() {
        let bytes = input(vec![b"data: caf\xc3".as_slice(), b"\xa9\n\n".as_slice()]);
        let frames: Vec<_> = SseDecoder::default()
            .decode(bytes)
            .map(|f| f.unwrap().data)
            .collect()
            .await;
        assert_eq!(frames, vec!["café"]);
    }

    #[tokio::test]
    async fn flushes_trailing_frame_at_eof() {
        let bytes = input(vec![b"data: tail".as_slice()]);
        let frames: Vec<_> = SseDecoder::default()
            .decode(bytes)
            .map(|f| f.unwrap().data)
            .collect()
            .await;
        assert_eq!(frames, vec!["tail"]);
    }
}
