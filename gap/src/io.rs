use tokio::io::{AsyncRead, AsyncWrite};

/// A boxable duplex byte stream. Lets the session supervisor hold a single
/// concrete type across a `STARTTLS` upgrade, which swaps a plain
/// `TcpStream` for a `tokio_rustls::server::TlsStream<TcpStream>` mid-session
/// (mirrors the teacher's `BoxAsyncRead`/`BoxAsyncWrite`, combined into one
/// trait since the codec needs both halves of the same object).
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;
