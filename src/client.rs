use crate::error::{Error, Result};
use crate::protocol::{build_message, CommandKind, Request, Response};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Longest response line accepted before the connection is abandoned
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Where and how to talk to the notebook server
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret; requests are signed when present
    pub key: Option<Vec<u8>>,
    /// Deadline for the whole exchange, or wait indefinitely
    pub timeout: Option<Duration>,
}

/// How a single exchange with the server ended
#[derive(Debug)]
pub enum Outcome {
    /// The server sent a terminal message
    Terminal(Response),
    /// The connection closed before any terminal message arrived
    Closed,
}

/// Send `request` and wait for the server's terminal response.
pub async fn execute(config: &ClientConfig, request: &Request) -> Result<Outcome> {
    let message = build_message(request, config.key.as_deref())?;
    let exchange = exchange(config, request.kind, &message);

    match config.timeout {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => exchange.await,
    }
}

async fn exchange(config: &ClientConfig, kind: CommandKind, message: &[u8]) -> Result<Outcome> {
    let mut stream = connect(&config.host, config.port).await?;

    debug!(%kind, signed = config.key.is_some(), "Sending request");
    if let Err(e) = send(&mut stream, message).await {
        if kind == CommandKind::Stop && is_disconnect(&e) {
            debug!(error = %e, "Server closed while stopping");
            return Ok(Outcome::Closed);
        }
        return Err(Error::Transport(e));
    }

    // Returning drops the stream, which closes the connection.
    receive_loop(&mut stream, kind).await
}

pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| Error::Connect {
            addr: addr.clone(),
            source,
        })?;
    debug!(%addr, "Connected");
    Ok(stream)
}

async fn send(stream: &mut TcpStream, message: &[u8]) -> io::Result<()> {
    stream.write_all(message).await?;
    stream.flush().await?;
    Ok(())
}

/// Read newline-delimited responses until a terminal one arrives.
///
/// Progress updates are dropped. Anything buffered after the terminal
/// message is ignored.
pub async fn receive_loop<R>(reader: &mut R, kind: CommandKind) -> Result<Outcome>
where
    R: AsyncRead + Unpin,
{
    read_responses(reader, kind, MAX_LINE_LENGTH).await
}

async fn read_responses<R>(
    reader: &mut R,
    kind: CommandKind,
    max_line: usize,
) -> Result<Outcome>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        // one extra byte for the newline itself
        let limit = max_line as u64 + 1;
        let n = match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(n) => n,
            Err(e) if kind == CommandKind::Stop && is_disconnect(&e) => {
                debug!(error = %e, "Server reset the connection after stop");
                return Ok(Outcome::Closed);
            }
            Err(e) => return Err(Error::Transport(e)),
        };

        if n == 0 {
            return Ok(Outcome::Closed);
        }

        if line.pop() != Some(b'\n') {
            if n as u64 >= limit {
                return Err(Error::LineTooLong(max_line));
            }
            warn!(bytes = n, "Connection closed with an unterminated message");
            return Ok(Outcome::Closed);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        let text = String::from_utf8(std::mem::take(&mut line)).map_err(Error::InvalidUtf8)?;
        if text.trim().is_empty() {
            continue;
        }

        let response = Response::parse(&text)?;
        if response.is_terminal() {
            return Ok(Outcome::Terminal(response));
        }
        debug!(content = %response.value["content"], "Progress update");
    }
}

/// The server may drop the socket before acknowledging `stop`
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
