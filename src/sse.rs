//! Decoding of the chat reply stream.
//!
//! The backend answers `POST /chat/send` with a chunked body of text lines.
//! Lines of interest look like `data: {"content": "..."}`; everything else is
//! framing noise.  This module turns the raw byte stream into a lazy,
//! single-use stream of [`StreamFrame`]s.
//!
//! Decoding is deliberately lenient.  A line is only parsed once its newline
//! has arrived, so a record split across network reads is reassembled rather
//! than rejected.  Lines that still fail to parse are dropped and counted, not
//! surfaced: a malformed record must never abort the turn.

use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::observability::{
    STREAM_BYTES, STREAM_DURATION, STREAM_ERRORS, STREAM_FRAMES, STREAM_IGNORED_FRAMES,
    STREAM_MALFORMED_LINES,
};
use crate::types::StreamFrame;

/// A boxed, pull-based stream of decoded frames.
///
/// The stream is finite and cannot be restarted; replaying a reply requires a
/// new call.  Dropping it closes the underlying byte source.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame>> + Send>>;

const DATA_PREFIX: &str = "data:";

/// Longest line kept while waiting for its newline.  Anything longer is
/// dropped up to the next newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

struct Decoder<S> {
    source: S,
    buffer: Vec<u8>,
    /// Start of the first line not yet returned.
    start: usize,
    /// Bytes before this offset are known to hold no newline.
    scanned: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    exhausted: bool,
    started: Instant,
}

impl<S> Decoder<S> {
    fn new(source: S) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            start: 0,
            scanned: 0,
            discarding: false,
            exhausted: false,
            started: Instant::now(),
        }
    }

    /// Returns the next complete line, without its terminator.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n')
            else {
                self.scanned = self.buffer.len();
                if self.buffer.len() - self.start > MAX_LINE_BYTES {
                    STREAM_MALFORMED_LINES.click();
                    debug!(limit = MAX_LINE_BYTES, "dropping oversized stream line");
                    self.discarding = true;
                    self.start = self.buffer.len();
                }
                return None;
            };
            let end = self.scanned + offset;
            let line = strip_cr(&self.buffer[self.start..end]).to_vec();
            self.start = end + 1;
            self.scanned = self.start;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            return Some(line);
        }
    }

    /// Appends a chunk, first dropping lines already returned.
    fn refill(&mut self, bytes: &[u8]) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Takes the unterminated remainder left when the source ends.
    fn take_remainder(&mut self) -> Option<Vec<u8>> {
        let mut remainder = self.buffer.split_off(self.start);
        if remainder.last() == Some(&b'\r') {
            remainder.pop();
        }
        self.buffer.clear();
        self.start = 0;
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || remainder.is_empty() {
            return None;
        }
        Some(remainder)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.start = 0;
        self.scanned = 0;
        self.discarding = false;
    }

    fn finish(&mut self) {
        STREAM_DURATION.add(self.started.elapsed().as_secs_f64());
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Decode a byte stream into frames.
///
/// Transport errors from the byte source are yielded once and end the stream.
///
/// ```
/// use bytes::Bytes;
/// use futures::StreamExt;
/// use zerox::{StreamFrame, decode_frames};
///
/// # tokio_test::block_on(async {
/// let reads: Vec<zerox::Result<Bytes>> = vec![
///     Ok(Bytes::from_static(b"data: {\"content\": \"Hel")),
///     Ok(Bytes::from_static(b"lo\"}\n\ndata: {\"done\": true}\n")),
/// ];
/// let frames: Vec<StreamFrame> = decode_frames(futures::stream::iter(reads))
///     .map(|frame| frame.unwrap())
///     .collect()
///     .await;
/// assert_eq!(frames[0], StreamFrame::Content("Hello".to_string()));
/// assert!(frames[1].is_terminal());
/// # });
/// ```
pub fn decode_frames<S>(byte_stream: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    let decoder = Decoder::new(byte_stream);

    let frames = stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(line) = decoder.next_line() {
                if let Some(frame) = parse_line(&line) {
                    STREAM_FRAMES.click();
                    return Some((Ok(frame), decoder));
                }
                continue;
            }

            if decoder.exhausted {
                // A final record may arrive without its newline.
                if let Some(line) = decoder.take_remainder()
                    && let Some(frame) = parse_line(&line)
                {
                    STREAM_FRAMES.click();
                    return Some((Ok(frame), decoder));
                }
                decoder.finish();
                return None;
            }

            match decoder.source.next().await {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    decoder.refill(&bytes);
                }
                Some(Err(err)) => {
                    STREAM_ERRORS.click();
                    decoder.exhausted = true;
                    decoder.reset();
                    return Some((Err(err), decoder));
                }
                None => {
                    decoder.exhausted = true;
                }
            }
        }
    });

    Box::pin(frames.fuse())
}

/// Parse one line.  Returns `None` for anything that is not a recognized frame.
fn parse_line(line: &[u8]) -> Option<StreamFrame> {
    let Ok(line) = std::str::from_utf8(line) else {
        STREAM_MALFORMED_LINES.click();
        debug!("dropping stream line with invalid UTF-8");
        return None;
    };
    let payload = line.strip_prefix(DATA_PREFIX)?.trim_start();
    match StreamFrame::parse(payload) {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => {
            STREAM_IGNORED_FRAMES.click();
            debug!(payload, "ignoring well-formed frame of unknown shape");
            None
        }
        Err(err) => {
            STREAM_MALFORMED_LINES.click();
            debug!(error = %err, payload, "dropping malformed stream line");
            None
        }
    }
}

/// Drive a frame stream to completion through callbacks.
///
/// `on_frame` sees every frame in arrival order.  A transport error is handed
/// to `on_transport_error` and ends the drive.
pub async fn dispatch_frames<S, F, E>(mut frames: S, mut on_frame: F, mut on_transport_error: E)
where
    S: Stream<Item = Result<StreamFrame>> + Unpin,
    F: FnMut(StreamFrame),
    E: FnMut(&Error),
{
    while let Some(item) = frames.next().await {
        match item {
            Ok(frame) => on_frame(frame),
            Err(err) => {
                on_transport_error(&err);
                break;
            }
        }
    }
}
