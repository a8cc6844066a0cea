//! HTTP CONNECT proxy implementation

use super::ProxyError;
use crate::protocol::{BAD_REQUEST, CONNECT_ESTABLISHED, SERVICE_UNAVAILABLE};
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Client connection handed to the session handler.
///
/// Still wrapped in the reader used for the request head, so bytes the
/// client sent right after it are not lost.
pub type ClientStream = BufReader<TcpStream>;

/// Request heads longer than this are rejected
const MAX_HEADER_LINES: usize = 128;

/// Longest accepted request or header line, terminator included
const MAX_LINE_LEN: usize = 8192;

/// HTTP CONNECT proxy server
pub struct HttpProxyServer {
    listener: TcpListener,
}

impl HttpProxyServer {
    /// Create a new HTTP proxy server
    pub async fn bind(addr: &str) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP proxy server listening on {}", listener.local_addr()?);

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, running `handler` for every accepted
    /// CONNECT request on its own task.
    ///
    /// The handler receives the client stream after the success line has
    /// been written, together with the requested authority exactly as the
    /// client sent it.
    pub async fn run<F, Fut>(&self, handler: F) -> Result<(), ProxyError>
    where
        F: Fn(ClientStream, String) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            debug!("New HTTP proxy connection from {}", peer_addr);

            let handler = handler.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, handler).await {
                    debug!("HTTP proxy connection from {}: {}", peer_addr, e);
                }
            });
        }
    }

    async fn handle_connection<F, Fut>(stream: TcpStream, handler: F) -> crate::Result<()>
    where
        F: Fn(ClientStream, String) -> Fut,
        Fut: Future<Output = crate::Result<()>>,
    {
        stream.set_nodelay(true).ok();
        let mut reader = BufReader::new(stream);

        // Read the request line
        let mut request_line = String::new();
        match read_head_line(&mut reader, &mut request_line).await? {
            HeadLine::Eof => return Ok(()),
            HeadLine::TooLong => {
                reader.get_mut().write_all(BAD_REQUEST).await?;
                return Err(ProxyError::MalformedRequest("request line too long".into()).into());
            }
            HeadLine::Line => {}
        }

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            reader.get_mut().write_all(BAD_REQUEST).await?;
            return Err(ProxyError::MalformedRequest(request_line.trim().to_string()).into());
        }

        let method = parts[0];
        let target = parts[1].to_string();

        // Skip headers; CONNECT carries nothing we need
        let mut lines = 0;
        loop {
            let mut line = String::new();
            match read_head_line(&mut reader, &mut line).await? {
                HeadLine::Eof => {
                    return Err(ProxyError::MalformedRequest("truncated request head".into()).into());
                }
                HeadLine::TooLong => {
                    reader.get_mut().write_all(BAD_REQUEST).await?;
                    return Err(ProxyError::MalformedRequest("header line too long".into()).into());
                }
                HeadLine::Line => {}
            }
            if line.trim().is_empty() {
                break;
            }
            lines += 1;
            if lines > MAX_HEADER_LINES {
                reader.get_mut().write_all(BAD_REQUEST).await?;
                return Err(ProxyError::MalformedRequest("request head too long".into()).into());
            }
        }

        // Only support CONNECT method
        if method != "CONNECT" {
            reader.get_mut().write_all(SERVICE_UNAVAILABLE).await?;
            return Err(ProxyError::UnsupportedMethod(method.to_string()).into());
        }

        // Success line goes out before any dial
        reader.get_mut().write_all(CONNECT_ESTABLISHED).await?;
        info!("CONNECT {}", target);

        // Hand off to handler
        handler(reader, target).await
    }
}

enum HeadLine {
    Line,
    Eof,
    TooLong,
}

/// Read one line of the request head, reading at most `MAX_LINE_LEN` bytes
async fn read_head_line(
    reader: &mut ClientStream,
    line: &mut String,
) -> std::io::Result<HeadLine> {
    let n = (&mut *reader).take(MAX_LINE_LEN as u64).read_line(line).await?;
    if n == 0 {
        Ok(HeadLine::Eof)
    } else if !line.ends_with('\n') && n >= MAX_LINE_LEN {
        Ok(HeadLine::TooLong)
    } else {
        Ok(HeadLine::Line)
    }
}
