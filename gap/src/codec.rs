use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ServerTaskError, ServerTaskResult};

/// Which peer a codec instance talks to — only used to pick the right
/// `ServerTaskError` variant on I/O failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Side {
    Client,
    Upstream,
}

/// Frames one IMAP byte stream into logical lines, handling literals
/// (`{N}` / `{N+}`) transparently (spec.md §4.1, C1).
///
/// A logical line may span several wire lines when it carries one or more
/// literals: each `{N}` / `{N+}` marker is followed immediately by `N`
/// octets (which may contain arbitrary bytes, including bare CRLF), after
/// which the line resumes until a real, marker-free CRLF is reached.
pub struct LineCodec<S> {
    io: BufReader<S>,
    side: Side,
    max_line_bytes: usize,
    max_literal_bytes: u64,
}

impl<S> LineCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S, side: Side, max_line_bytes: usize, max_literal_bytes: u64) -> Self {
        LineCodec {
            io: BufReader::new(io),
            side,
            max_line_bytes,
            max_literal_bytes,
        }
    }

    fn map_read_err(&self, e: std::io::Error) -> ServerTaskError {
        match self.side {
            Side::Client => ServerTaskError::ClientReadFailed(e),
            Side::Upstream => ServerTaskError::UpstreamReadFailed(e),
        }
    }

    fn map_write_err(&self, e: std::io::Error) -> ServerTaskError {
        match self.side {
            Side::Client => ServerTaskError::ClientWriteFailed(e),
            Side::Upstream => ServerTaskError::UpstreamWriteFailed(e),
        }
    }

    fn disconnected_err(&self) -> ServerTaskError {
        match self.side {
            Side::Client => ServerTaskError::ClientDisconnected,
            Side::Upstream => ServerTaskError::UpstreamDisconnected,
        }
    }

    /// Reads one CRLF-terminated wire line, CRLF included. Does not
    /// interpret trailing literal markers.
    async fn read_wire_line(&mut self) -> ServerTaskResult<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            let n = self
                .io
                .read(&mut byte)
                .await
                .map_err(|e| self.map_read_err(e))?;
            if n == 0 {
                return Err(self.disconnected_err());
            }
            buf.push(byte[0]);
            if buf.len() > self.max_line_bytes {
                return Err(ServerTaskError::MalformedFrame("line exceeds max_line_bytes"));
            }
            if buf.ends_with(b"\r\n") {
                return Ok(buf);
            }
        }
    }

    /// Reads exactly `n` literal octets.
    async fn read_literal_octets(&mut self, n: u64) -> ServerTaskResult<Vec<u8>> {
        if n > self.max_literal_bytes {
            return Err(ServerTaskError::MalformedFrame(
                "literal exceeds max_literal_bytes",
            ));
        }
        let mut buf = vec![0u8; n as usize];
        self.io
            .read_exact(&mut buf)
            .await
            .map_err(|e| self.map_read_err(e))?;
        Ok(buf)
    }

    fn trailing_literal(body: &[u8]) -> Option<(u64, bool)> {
        if body.last() != Some(&b'}') {
            return None;
        }
        let open = memchr::memrchr(b'{', body)?;
        if open == 0 || body[open - 1] != b' ' {
            return None;
        }
        let mut digits = &body[open + 1..body.len() - 1];
        let sync = match digits.last() {
            Some(b'+') => {
                digits = &digits[..digits.len() - 1];
                false
            }
            _ => true,
        };
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let size = atoi::atoi(digits)?;
        Some((size, sync))
    }

    /// Reads one full logical line, auto-answering synchronizing literals
    /// with a bare `+ OK\r\n` continuation (server role: used on the
    /// client-facing codec, where the proxy is the one receiving literals
    /// from its peer).
    pub async fn read_line_as_server(&mut self) -> ServerTaskResult<Vec<u8>> {
        let mut assembled = Vec::new();
        loop {
            let segment = self.read_wire_line().await?;
            let body = &segment[..segment.len() - 2];
            match Self::trailing_literal(body) {
                Some((size, sync)) => {
                    assembled.extend_from_slice(&segment);
                    if sync {
                        self.write_raw(b"+ OK\r\n").await?;
                    }
                    let literal = self.read_literal_octets(size).await?;
                    assembled.extend_from_slice(&literal);
                }
                None => {
                    assembled.extend_from_slice(&segment);
                    return Ok(assembled);
                }
            }
        }
    }

    /// Reads one full logical line without answering continuations. Used
    /// on the upstream-facing codec for ordinary responses and for
    /// commands/literals the forwarding pipeline drives explicitly with
    /// [`Self::write_raw`] and [`Self::wait_for_continuation`].
    pub async fn read_line_passthrough(&mut self) -> ServerTaskResult<Vec<u8>> {
        self.read_wire_line().await
    }

    /// Reads one wire line and confirms it is a continuation request
    /// (`+ ...`), returning an error otherwise. Used by the forwarding
    /// pipeline before sending a synchronizing literal's octets upstream.
    pub async fn wait_for_continuation(&mut self) -> ServerTaskResult<()> {
        let line = self.read_wire_line().await?;
        if line.first() == Some(&b'+') {
            Ok(())
        } else {
            Err(ServerTaskError::UpstreamProtocolError(
                "expected a continuation request before sending literal octets",
            ))
        }
    }

    pub async fn read_exact_literal(&mut self, n: u64) -> ServerTaskResult<Vec<u8>> {
        self.read_literal_octets(n).await
    }

    /// Writes `bytes` followed by CRLF and flushes.
    pub async fn write_line(&mut self, bytes: &[u8]) -> ServerTaskResult<()> {
        self.io
            .write_all(bytes)
            .await
            .map_err(|e| self.map_write_err(e))?;
        self.io
            .write_all(b"\r\n")
            .await
            .map_err(|e| self.map_write_err(e))?;
        self.io.flush().await.map_err(|e| self.map_write_err(e))
    }

    /// Writes `bytes` verbatim (no CRLF appended) and flushes. Used to
    /// assemble a multi-part line (head, then literal octets) or to send a
    /// bare continuation reply.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> ServerTaskResult<()> {
        self.io
            .write_all(bytes)
            .await
            .map_err(|e| self.map_write_err(e))?;
        self.io.flush().await.map_err(|e| self.map_write_err(e))
    }

    /// Reclaims the underlying stream, e.g. for a `STARTTLS` upgrade.
    /// Returns any bytes already buffered past the last framed line: under
    /// normal operation this is empty, since an IMAP client waits for the
    /// tagged response before starting TLS.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        let buffered = self.io.buffer().to_vec();
        (self.io.into_inner(), buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_simple_line() {
        let (mut a, b) = duplex(1024);
        a.write_all(b"A001 NOOP\r\n").await.unwrap();
        let mut codec = LineCodec::new(b, Side::Client, 65536, 1024 * 1024);
        let line = codec.read_line_as_server().await.unwrap();
        assert_eq!(line, b"A001 NOOP\r\n");
    }

    #[tokio::test]
    async fn answers_synchronizing_literal_with_continuation() {
        let (mut a, b) = duplex(1024);
        a.write_all(b"A003 LOGIN {5}\r\n").await.unwrap();
        let mut codec = LineCodec::new(b, Side::Client, 65536, 1024 * 1024);
        let read_task = tokio::spawn(async move { codec.read_line_as_server().await });

        // give the reader a chance to request the literal
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        a.write_all(b"admin {5+}\r\n").await.unwrap();
        a.write_all(b"pass1").await.unwrap();
        a.write_all(b"\r\n").await.unwrap();

        let mut cont = [0u8; 8];
        let n = a.read(&mut cont).await.unwrap();
        assert_eq!(&cont[..n], b"+ OK\r\n");

        let line = read_task.await.unwrap().unwrap();
        assert_eq!(line, b"A003 LOGIN {5}\r\nadmin {5+}\r\npass1\r\n");
    }
}
