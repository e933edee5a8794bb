//! `Content-Length`-framed JSON-RPC over an async byte stream, the wire format both the client
//! face (talking to an external language server) and the server face (talking to an attached
//! editor) use (§4.9).

use qntx_core::{Error, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Reads one `Content-Length`-framed JSON-RPC message from `reader`. Returns `Ok(None)` on a
/// clean EOF before any header bytes are read (the remote end hung up).
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Option<Value>> {
    use tokio::io::AsyncBufReadExt;

    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(Error::Io)?;
        if n == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(rest) = line.strip_prefix("Content-Length:") {
            content_length = Some(
                rest.trim()
                    .parse()
                    .map_err(|_| Error::corrupt(format!("bad Content-Length header: {}", rest)))?,
            );
        }
        // Other headers (Content-Type) are accepted and ignored.
    }

    let length = content_length.ok_or_else(|| Error::corrupt("message missing Content-Length header"))?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(Error::Io)?;
    let value: Value = serde_json::from_slice(&body).map_err(Error::Serialization)?;
    Ok(Some(value))
}

/// Writes one `Content-Length`-framed JSON-RPC message to `writer`.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> Result<()> {
    let body = serde_json::to_vec(value).map_err(Error::Serialization)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await.map_err(Error::Io)?;
    writer.write_all(&body).await.map_err(Error::Io)?;
    writer.flush().await.map_err(Error::Io)?;
    Ok(())
}
