//! TCP wire adapter: opens one connection per node and turns typed commands
//! into replies, surfacing protocol errors as [`ClusterCtlError::Protocol`]
//! rather than a plain `Reply::Error`.
use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use slotctl_proto::{CommandArg, Reply, encode_commands, reply::decode_reply};

use crate::error::ClusterCtlError;

/// A single connection to one cluster node.
///
/// Closing is explicit and idempotent: once `close()` has run (or the
/// connect never happened), the stream is `None` and further calls are a
/// no-op rather than a panic — the orchestrator closes nodes on more than
/// one exit path (success, and the error path that still wants to tidy up).
pub struct Wire {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl Wire {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ClusterCtlError> {
        let stream = TcpStream::connect((host, port)).map_err(|source| ClusterCtlError::Io {
            host: host.to_string(),
            port,
            source,
        })?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|source| ClusterCtlError::Io {
                host: host.to_string(),
                port,
                source,
            })?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|source| ClusterCtlError::Io {
                host: host.to_string(),
                port,
                source,
            })?;
        Ok(Wire {
            host: host.to_string(),
            port,
            timeout,
            stream: Some(BufReader::new(stream)),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Sends a single command and returns its decoded reply. A `Reply::Error`
    /// is promoted to `Err(ClusterCtlError::Protocol)` so callers never have
    /// to re-check `is_error()` themselves.
    pub fn execute(&mut self, args: Vec<CommandArg>) -> Result<Reply, ClusterCtlError> {
        let replies = self.execute_bulk(vec![args])?;
        Ok(replies.into_iter().next().expect("one command, one reply"))
    }

    /// Pipelines several commands over one round trip: all frames are written
    /// before any reply is read back, then replies are read in request
    /// order. Used for `MIGRATE` batches on a slot's key list.
    pub fn execute_bulk(
        &mut self,
        commands: Vec<Vec<CommandArg>>,
    ) -> Result<Vec<Reply>, ClusterCtlError> {
        let count = commands.len();
        let frames = encode_commands(commands);
        self.write_frames(&frames)?;

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let reply = self.read_reply()?;
            if let Reply::Error(e) = reply {
                return Err(ClusterCtlError::Protocol {
                    host: self.host.clone(),
                    port: self.port,
                    reply: e,
                });
            }
            out.push(reply);
        }
        Ok(out)
    }

    fn write_frames(&mut self, frames: &[Vec<u8>]) -> Result<(), ClusterCtlError> {
        let reader = self.open()?;
        let stream = reader.get_mut();
        for frame in frames {
            stream
                .write_all(frame)
                .map_err(|source| ClusterCtlError::Io {
                    host: self.host.clone(),
                    port: self.port,
                    source,
                })?;
        }
        stream.flush().map_err(|source| ClusterCtlError::Io {
            host: self.host.clone(),
            port: self.port,
            source,
        })
    }

    fn read_reply(&mut self) -> Result<Reply, ClusterCtlError> {
        let host = self.host.clone();
        let port = self.port;
        let reader = self.open()?;
        decode_reply(reader).map_err(|source| match source {
            slotctl_proto::error::ProtoError::Io(source) => ClusterCtlError::Io {
                host,
                port,
                source,
            },
            other => ClusterCtlError::Decode(other),
        })
    }

    fn open(&mut self) -> Result<&mut BufReader<TcpStream>, ClusterCtlError> {
        if self.stream.is_none() {
            *self = Wire::connect(&self.host, self.port, self.timeout)?;
        }
        Ok(self.stream.as_mut().expect("reconnected above"))
    }

    /// Idempotent: safe to call more than once, and safe to call on a `Wire`
    /// that never successfully connected.
    pub fn close(&mut self) {
        if let Some(reader) = self.stream.take() {
            let _ = reader.into_inner().shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Drop for Wire {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn execute_decodes_simple_reply() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            stream.write_all(b"+OK\r\n").unwrap();
        });

        let mut wire = Wire::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let reply = wire.execute(vec![CommandArg::from("ping")]).unwrap();
        assert_eq!(reply, Reply::Simple("OK".to_string()));
    }

    #[test]
    fn execute_promotes_error_reply_to_err() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            stream.write_all(b"-ERR not the owner of slot 5\r\n").unwrap();
        });

        let mut wire = Wire::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let err = wire.execute(vec![CommandArg::from("x")]).unwrap_err();
        assert!(crate::error::is_not_owner(&err));
    }

    #[test]
    fn close_is_idempotent() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let _ = listener.accept();
        });
        let mut wire = Wire::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        wire.close();
        wire.close();
        assert!(wire.is_closed());
    }
}
