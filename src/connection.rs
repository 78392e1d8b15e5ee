use crate::error::{Result, SscError};
use crate::protocol;
use crate::types::Endpoint;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

/// Connect and transaction deadline
const DEADLINE: Duration = Duration::from_secs(5);

enum ConnectionState {
    Closed,
    Ready {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    },
}

/// Persistent SSC control connection to one device
///
/// SSC is a newline-terminated text protocol with one command per round
/// trip. The connection moves between `Closed` and `Ready`; `open()` is
/// idempotent and both it and `send_command()` observe a fixed 5-second
/// deadline, failing with [`SscError::NoResponse`] when it elapses.
///
/// Callers are expected to serialize operations per device; the internal
/// lock only guards against accidental interleaving, it does not order
/// concurrent transactions.
pub struct Connection {
    endpoint: Endpoint,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Create a closed connection for the given endpoint
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            state: Mutex::new(ConnectionState::Closed),
        }
    }

    /// The endpoint this connection talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the connection is currently ready
    pub async fn is_open(&self) -> bool {
        matches!(*self.state.lock().await, ConnectionState::Ready { .. })
    }

    /// Open the underlying stream.
    ///
    /// Returns immediately when already ready. Blocks the calling task
    /// until the stream is established or the deadline elapses.
    pub async fn open(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, ConnectionState::Ready { .. }) {
            return Ok(());
        }

        tracing::info!("Connecting to {}", self.endpoint);
        let stream = timeout(
            DEADLINE,
            TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port)),
        )
        .await
        .map_err(|_| SscError::NoResponse)??;

        let (read_half, write_half) = stream.into_split();
        *state = ConnectionState::Ready {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        Ok(())
    }

    /// Send one command and wait for its reply.
    ///
    /// Writes `command` followed by a line terminator, then blocks for the
    /// first non-empty reply line. Protocol-level error envelopes are
    /// classified into [`SscError::AddressNotFound`] /
    /// [`SscError::MessageNotUnderstood`]; any other reply is returned
    /// as-is for the caller to decode.
    ///
    /// Any failure closes the connection: after a timeout a late reply
    /// would otherwise be matched against the next command. The next
    /// operation reopens via [`open`](Self::open).
    pub async fn send_command(&self, command: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let mut current = std::mem::replace(&mut *state, ConnectionState::Closed);
        let ConnectionState::Ready { reader, writer } = &mut current else {
            return Err(SscError::ConnectionClosed);
        };

        tracing::debug!("-> {}", command);
        match transact(reader, writer, command).await {
            Ok(reply) => {
                *state = current;
                tracing::debug!("<- {}", reply);
                match protocol::classify_error(&reply) {
                    Some(error) => Err(error),
                    None => Ok(reply),
                }
            }
            Err(error) => {
                tracing::info!("Connection to {} lost: {}", self.endpoint, error);
                Err(error)
            }
        }
    }

    /// Close the connection; safe to call from any state
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        *state = ConnectionState::Closed;
    }
}

/// One write/read round trip against an open stream. Empty reply lines
/// are skipped; the deadline applies to the whole wait.
async fn transact(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    command: &str,
) -> Result<String> {
    let mut line = command.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;

    loop {
        let mut buf = String::new();
        let read = timeout(DEADLINE, reader.read_line(&mut buf))
            .await
            .map_err(|_| SscError::NoResponse)?;
        match read {
            Ok(0) => return Err(SscError::ConnectionClosed),
            Ok(_) => {
                let trimmed = buf.trim();
                if !trimmed.is_empty() {
                    return Ok(trimmed.to_string());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
