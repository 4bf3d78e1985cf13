//! Request/reply calls over an unreliable datagram socket.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{RpcError, TransportError};
use crate::protocol::{self, Caller, MAX_DATAGRAM, Method, ReplyBody, Request, Seq};

/// How long to wait for a reply and how often to retransmit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            max_attempts: 5,
        }
    }
}

/// One caller's synchronous view of the dispatcher.
pub struct RpcClient {
    socket: UdpSocket,
    server: SocketAddr,
    caller: Caller,
    policy: RetryPolicy,
    next_seq: Seq,
    drop_next_reply: bool,
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl RpcClient {
    /// Bind an ephemeral local socket on the server's interface.
    pub fn connect(caller: Caller, server: SocketAddr, policy: RetryPolicy) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddr::new(server.ip(), 0))?;
        debug!(%caller, local = %socket.local_addr()?, %server, "rpc client bound");
        Ok(Self {
            socket,
            server,
            caller,
            policy,
            next_seq: 1,
            drop_next_reply: false,
        })
    }

    /// Discard the next reply that arrives, forcing a timeout and retransmission.
    pub fn drop_next_reply(&mut self) {
        self.drop_next_reply = true;
    }

    /// Send `call` and wait for the matching reply, retransmitting on timeout.
    ///
    /// Retransmissions reuse the sequence number so the dispatcher can answer
    /// them from its reply cache instead of executing the call twice.
    pub fn call(&mut self, call: Method) -> Result<ReplyBody, RpcError> {
        let method = call.name();
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = Request {
            seq,
            caller: self.caller,
            call,
        };
        let bytes = protocol::encode(&request)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(TransportError::Oversize {
                method,
                len: bytes.len(),
                max: MAX_DATAGRAM,
            }
            .into());
        }
        let mut buffer = vec![0u8; MAX_DATAGRAM];

        for attempt in 1..=self.policy.max_attempts {
            self.socket.send_to(&bytes, self.server).map_err(TransportError::from)?;
            trace!(caller = %self.caller, method, seq, attempt, "request sent");
            let deadline = Instant::now() + self.policy.timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                self.socket.set_read_timeout(Some(remaining)).map_err(TransportError::from)?;
                let len = match self.socket.recv_from(&mut buffer) {
                    Ok((len, _)) => len,
                    Err(err) if is_timeout(&err) => break,
                    Err(err) => return Err(TransportError::from(err).into()),
                };
                let reply = match protocol::decode_reply(&buffer[..len]) {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!(caller = %self.caller, method, error = %err, "discarding undecodable reply");
                        continue;
                    }
                };
                if reply.seq != seq {
                    debug!(caller = %self.caller, method, expected = seq, got = reply.seq, "discarding stale reply");
                    continue;
                }
                if self.drop_next_reply {
                    self.drop_next_reply = false;
                    warn!(caller = %self.caller, method, seq, "reply lost in transit");
                    continue;
                }
                return match reply.body {
                    ReplyBody::Error(err) => Err(err.into()),
                    body => Ok(body),
                };
            }
            debug!(caller = %self.caller, method, seq, attempt, "no reply before timeout");
        }
        Err(TransportError::Exhausted {
            method,
            attempts: self.policy.max_attempts,
        }
        .into())
    }
}
