use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RunnerError;
use crate::util::Utf8ChunkDecoder;

use super::types::{OutputChunk, OutputStream};

pub fn pump_stdout<R>(rd: R, chunk_tx: mpsc::Sender<OutputChunk>) -> JoinHandle<Result<u64, RunnerError>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    pump(rd, chunk_tx, OutputStream::Stdout)
}

pub fn pump_stderr<R>(rd: R, chunk_tx: mpsc::Sender<OutputChunk>) -> JoinHandle<Result<u64, RunnerError>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    pump(rd, chunk_tx, OutputStream::Stderr)
}

fn pump<R>(
    mut rd: R,
    chunk_tx: mpsc::Sender<OutputChunk>,
    stream: OutputStream,
) -> JoinHandle<Result<u64, RunnerError>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;
        let mut decoder = Utf8ChunkDecoder::new();

        loop {
            let n = rd.read(&mut buf).await.map_err(|e| RunnerError::StreamIo {
                stream: stream.label(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            total += n as u64;

            let text = decoder.push(&buf[..n]);
            if text.is_empty() {
                continue;
            }
            if chunk_tx.send(OutputChunk { stream, text }).await.is_err() {
                // receiver gone: keep draining the pipe so the child never blocks on write
                continue;
            }
        }

        // EOF flush: deliver a trailing partial character sequence.
        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = chunk_tx.send(OutputChunk { stream, text: rest }).await;
        }

        Ok(total)
    })
}
