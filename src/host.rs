//! Native messaging framing and stdio plumbing for the host process.
//!
//! Every message is a 4-byte native-endian `u32` length followed by that many
//! bytes of UTF-8 JSON. stdout carries frames only; log to stderr.

use serde::Serialize;
use std::future::Future;
use std::io::{self, Read, Write};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Host -> browser limit (1 MiB).
pub const MAX_TO_BROWSER: usize = 1_048_576;
/// Browser -> host limit (64 MiB, Chrome's documented cap).
pub const MAX_FROM_BROWSER: usize = 64 * 1_048_576;

const CHANNEL_DEPTH: usize = 32;

/// Errors raised by framing and stdio helpers.
#[derive(Debug, Error)]
pub enum NmError {
    /// The peer closed the stream before the next length prefix.
    /// This is the normal end of a host's life.
    #[error("native messaging peer disconnected")]
    Disconnected,

    #[error("incoming message of {len} bytes exceeds cap of {max} bytes")]
    IncomingTooLarge { len: usize, max: usize },

    #[error("outgoing message of {len} bytes exceeds {max} bytes")]
    OutgoingTooLarge { len: usize, max: usize },

    #[error("message body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("failed to serialize message: {0}")]
    SerializeJson(#[source] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stdio task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("frame writer has shut down")]
    WriterClosed,
}

impl NmError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, NmError::Disconnected)
    }

    /// The frame was consumed in full, so the stream is still in sync.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NmError::Utf8(_))
    }
}

/// One incoming frame: its body, or the reason a fully read body was rejected.
pub type Frame = Result<String, NmError>;

fn unexpected_eof() -> NmError {
    NmError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "stream ended inside a frame",
    ))
}

fn checked_len(len: u32, max_size: usize) -> Result<usize, NmError> {
    let len = len as usize;
    let max = max_size.min(MAX_FROM_BROWSER);
    if len > max {
        return Err(NmError::IncomingTooLarge { len, max });
    }
    Ok(len)
}

fn read_len_prefix<R: Read>(r: &mut R) -> Result<u32, NmError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match r.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Err(NmError::Disconnected),
            Ok(0) => return Err(unexpected_eof()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(u32::from_ne_bytes(len_buf))
}

async fn read_len_prefix_async<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, NmError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match r.read(&mut len_buf[filled..]).await {
            Ok(0) if filled == 0 => return Err(NmError::Disconnected),
            Ok(0) => return Err(unexpected_eof()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(u32::from_ne_bytes(len_buf))
}

fn map_body_eof(e: io::Error) -> NmError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        unexpected_eof()
    } else {
        NmError::Io(e)
    }
}

/// Encode any serde-serializable value into a native-messaging frame:
/// 4-byte native-endian length + JSON bytes.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, NmError> {
    let json = serde_json::to_vec(msg).map_err(NmError::SerializeJson)?;
    if json.len() > MAX_TO_BROWSER {
        return Err(NmError::OutgoingTooLarge {
            len: json.len(),
            max: MAX_TO_BROWSER,
        });
    }
    let mut out = Vec::with_capacity(4 + json.len());
    out.extend_from_slice(&(json.len() as u32).to_ne_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}

/// Decode a single framed message from a reader.
///
/// `max_size` is clamped to [`MAX_FROM_BROWSER`]; an oversized length is
/// rejected before the body is read.
pub fn decode_message<R: Read>(reader: &mut R, max_size: usize) -> Result<String, NmError> {
    let len = checked_len(read_len_prefix(&mut *reader)?, max_size)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(map_body_eof)?;
    Ok(String::from_utf8(buf)?)
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<(), NmError> {
    let frame = encode_message(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub async fn read_frame_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<String, NmError> {
    let len = checked_len(read_len_prefix_async(reader).await?, max_size)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(map_body_eof)?;
    Ok(String::from_utf8(buf)?)
}

pub async fn write_frame_async<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    msg: &T,
) -> Result<(), NmError> {
    let frame = encode_message(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Cloneable handle that queues frames for the writer task.
#[derive(Clone, Debug)]
pub struct Sender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl Sender {
    pub async fn send<T: Serialize>(&self, msg: &T) -> Result<(), NmError> {
        let frame = encode_message(msg)?;
        self.tx.send(frame).await.map_err(|_| NmError::WriterClosed)
    }
}

/// Spawn a blocking writer that drains queued frames into `output`.
///
/// The task ends once every [`Sender`] clone has been dropped.
pub fn spawn_writer<W>(mut output: W) -> (Sender, JoinHandle<Result<(), NmError>>)
where
    W: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
    let handle = tokio::task::spawn_blocking(move || -> Result<(), NmError> {
        while let Some(frame) = rx.blocking_recv() {
            output.write_all(&frame)?;
            output.flush()?;
        }
        Ok(())
    });
    (Sender { tx }, handle)
}

/// Spawn a blocking reader that decodes frames from `input`.
///
/// Recoverable errors are forwarded and reading continues. Any other error
/// (including [`NmError::Disconnected`]) is forwarded and ends the reader.
pub fn spawn_reader<R>(mut input: R, max_size: usize) -> mpsc::Receiver<Frame>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || loop {
        let next = decode_message(&mut input, max_size);
        let stop = matches!(next, Err(ref e) if !e.is_recoverable());
        if tx.blocking_send(next).is_err() || stop {
            break;
        }
    });
    rx
}

/// Run `handler` for every frame read from `input`, replying through `output`.
///
/// The handler sees both decoded bodies and recoverable decode failures.
/// Returns `Ok(())` when the peer disconnects. A handler error stops the loop.
pub async fn serve<R, W, F, Fut>(input: R, output: W, mut handler: F) -> Result<(), NmError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
    F: FnMut(Frame, Sender) -> Fut,
    Fut: Future<Output = Result<(), NmError>>,
{
    let mut incoming = spawn_reader(input, MAX_FROM_BROWSER);
    let (sender, writer) = spawn_writer(output);

    let result = loop {
        match incoming.recv().await {
            Some(Err(NmError::Disconnected)) | None => break Ok(()),
            Some(Err(e)) if !e.is_recoverable() => break Err(e),
            Some(frame) => {
                if let Err(e) = handler(frame, sender.clone()).await {
                    break Err(e);
                }
            }
        }
    };

    drop(sender);
    writer.await??;
    result
}

/// [`serve`] over the process's stdin/stdout.
pub async fn event_loop<F, Fut>(handler: F) -> Result<(), NmError>
where
    F: FnMut(Frame, Sender) -> Fut,
    Fut: Future<Output = Result<(), NmError>>,
{
    serve(io::stdin(), io::stdout(), handler).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn clean_eof_is_disconnect() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        let err = decode_message(&mut cur, MAX_FROM_BROWSER).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn partial_prefix_is_io_error() {
        let mut cur = Cursor::new(vec![3u8, 0]);
        let err = decode_message(&mut cur, MAX_FROM_BROWSER).unwrap_err();
        match err {
            NmError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncated_body_is_io_error() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&10u32.to_ne_bytes());
        frame.extend_from_slice(b"{}");
        let mut cur = Cursor::new(frame);
        let err = decode_message(&mut cur, MAX_FROM_BROWSER).unwrap_err();
        assert!(matches!(err, NmError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn cap_is_clamped_to_browser_limit() {
        let err = checked_len((MAX_FROM_BROWSER + 1) as u32, usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            NmError::IncomingTooLarge { max, .. } if max == MAX_FROM_BROWSER
        ));
    }

    #[tokio::test]
    async fn async_reader_reads_back_to_back_frames() {
        let mut bytes = encode_message(&serde_json::json!({"op": "getHostname"})).unwrap();
        bytes.extend(encode_message(&serde_json::json!({"op": "getKernelInfo"})).unwrap());
        let mut cur = Cursor::new(bytes);

        let first = read_frame_async(&mut cur, MAX_FROM_BROWSER).await.unwrap();
        let second = read_frame_async(&mut cur, MAX_FROM_BROWSER).await.unwrap();
        assert_eq!(first, r#"{"op":"getHostname"}"#);
        assert_eq!(second, r#"{"op":"getKernelInfo"}"#);
        assert!(read_frame_async(&mut cur, MAX_FROM_BROWSER)
            .await
            .unwrap_err()
            .is_disconnect());
    }
}
