//! Output Relay
//!
//! Turns a child's output pipe into an ordered sequence of chunks.
//! Reads are exposed as a `Stream`, so every delivered chunk is followed
//! by the next read without any manual re-registration.

use std::borrow::Cow;
use std::io;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::RelayError;

/// Size of a single read from the pipe
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Which pipe a chunk was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One unit of process output, as read from the pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Pipe the bytes came from
    pub stream: OutputStream,
    /// Raw bytes; may not be valid UTF-8
    pub bytes: Vec<u8>,
}

impl OutputChunk {
    pub fn new(stream: OutputStream, bytes: Vec<u8>) -> Self {
        Self { stream, bytes }
    }

    /// Decode the chunk, replacing invalid sequences with U+FFFD
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

}

/// Holds back an incomplete UTF-8 sequence at the end of a read so that
/// characters split across reads are delivered whole.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append data and return the bytes that are safe to emit now
    pub fn push(&mut self, data: &[u8]) -> Vec<u8> {
        let mut combined = std::mem::take(&mut self.pending);
        combined.extend_from_slice(data);

        let split = incomplete_tail_start(&combined);
        self.pending = combined.split_off(split);
        combined
    }

    /// Return whatever is still held back (end of stream)
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

/// Index where a trailing, not yet complete UTF-8 sequence begins.
/// Returns `buf.len()` when the tail is complete (or not UTF-8 at all).
fn incomplete_tail_start(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let byte = buf[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}

struct ReadState<R> {
    reader: R,
    carry: Utf8Carry,
    buf: Box<[u8]>,
    finished: bool,
}

/// Stream of chunks read from `reader` until end of file or the first
/// read error. A read error is yielded once and ends the stream.
pub fn chunk_stream<R>(
    reader: R,
    stream: OutputStream,
) -> impl Stream<Item = Result<OutputChunk, RelayError>>
where
    R: AsyncRead + Unpin,
{
    let state = ReadState {
        reader,
        carry: Utf8Carry::new(),
        buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            match state.reader.read(&mut state.buf).await {
                Ok(0) => {
                    state.finished = true;
                    let rest = state.carry.finish();
                    if rest.is_empty() {
                        return None;
                    }
                    return Some((Ok(OutputChunk::new(stream, rest)), state));
                }
                Ok(n) => {
                    let bytes = state.carry.push(&state.buf[..n]);
                    if bytes.is_empty() {
                        continue;
                    }
                    return Some((Ok(OutputChunk::new(stream, bytes)), state));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    state.finished = true;
                    return Some((Err(RelayError::from(e)), state));
                }
            }
        }
    })
}

/// Background reader for one output pipe of one run
pub struct OutputRelay {
    stream: OutputStream,
    task: JoinHandle<()>,
}

impl OutputRelay {
    /// Start relaying `reader` to `on_chunk` on the given runtime.
    ///
    /// `on_chunk` is called once per chunk, in read order. The relay stops
    /// on end of file; a read error is logged and also stops it.
    pub fn attach<R, F>(runtime: &Handle, reader: R, stream: OutputStream, mut on_chunk: F) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnMut(OutputChunk) + Send + 'static,
    {
        let task = runtime.spawn(async move {
            let chunks = chunk_stream(reader, stream);
            futures::pin_mut!(chunks);

            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => on_chunk(chunk),
                    Err(error) => {
                        warn!(?stream, %error, "stopped relaying process output");
                        break;
                    }
                }
            }
            debug!(?stream, "output relay finished");
        });

        Self { stream, task }
    }

    /// Write each line of `reader` to the log instead of delivering it.
    ///
    /// Lines are decoded lossily. The pipe is read to end of file even
    /// after a read error so the child never writes into a closed pipe.
    pub fn attach_log<R>(runtime: &Handle, reader: R, stream: OutputStream) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task = runtime.spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        let text = text.trim_end();
                        if !text.is_empty() {
                            warn!(target: "ipa_packager::script", ?stream, "{text}");
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        warn!(?stream, error = %RelayError::from(error), "stopped logging process output");
                        if let Err(error) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                            debug!(?stream, %error, "could not drain process output");
                        }
                        break;
                    }
                }
            }
            debug!(?stream, "output relay finished");
        });

        Self { stream, task }
    }

    /// Wait up to `grace` for the pipe to drain. Returns `false` if the
    /// relay had to be aborted with output still pending.
    pub async fn finish(mut self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(stream = ?self.stream, %error, "output relay task failed");
                true
            }
            Err(_) => {
                self.task.abort();
                warn!(stream = ?self.stream, ?grace, "output still open after exit, remaining output dropped");
                false
            }
        }
    }
}
