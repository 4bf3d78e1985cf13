//! Dispatch loop serving the scheduler over UDP.
//!
//! One listener thread per peer class (drones, producers) receives datagrams
//! and forwards them to a single dispatcher thread, which owns the
//! [`Scheduler`] and executes calls strictly one at a time. All replies leave
//! through one outbound socket. The dispatcher never waits on a caller, so a
//! lost reply only costs that caller a retransmission.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::error::{RemoteError, SimError, TransportError};
use crate::protocol::{self, Caller, Decoded, MAX_DATAGRAM, Reply, ReplyBody, Seq};
use crate::scheduler::Scheduler;

/// Which listener a datagram arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerClass {
    Drones,
    Producers,
}

impl PeerClass {
    fn admits(&self, caller: Caller) -> bool {
        matches!(
            (self, caller),
            (PeerClass::Drones, Caller::Drone(_)) | (PeerClass::Producers, Caller::Producer(_))
        )
    }

    fn thread_name(&self) -> &'static str {
        match self {
            PeerClass::Drones => "dispatcher-drones",
            PeerClass::Producers => "dispatcher-producers",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    pub drone_addr: SocketAddr,
    pub producer_addr: SocketAddr,
    /// How often idle threads re-check the shutdown flag.
    pub poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            drone_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            producer_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            poll: Duration::from_millis(50),
        }
    }
}

struct Inbound {
    bytes: Vec<u8>,
    from: SocketAddr,
    class: PeerClass,
}

/// Running dispatcher; shut it down to get the final scheduler state back.
pub struct ServerHandle {
    drone_addr: SocketAddr,
    producer_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    listeners: Vec<thread::JoinHandle<()>>,
    dispatcher: thread::JoinHandle<Scheduler>,
}

impl ServerHandle {
    /// Address drones send their calls to.
    pub fn drone_addr(&self) -> SocketAddr {
        self.drone_addr
    }

    /// Address producers send their calls to.
    pub fn producer_addr(&self) -> SocketAddr {
        self.producer_addr
    }

    /// Stop serving without waiting for the threads; calls time out from here on.
    pub fn halt(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn shutdown(self) -> Result<Scheduler, SimError> {
        self.halt();
        for listener in self.listeners {
            listener
                .join()
                .map_err(|_| SimError::ThreadPanic("dispatcher listener".to_string()))?;
        }
        self.dispatcher
            .join()
            .map_err(|_| SimError::ThreadPanic("dispatcher".to_string()))
    }
}

/// Bind the listeners and start serving `scheduler`.
pub fn spawn(scheduler: Scheduler, config: ServerConfig) -> Result<ServerHandle, TransportError> {
    let drone_socket = UdpSocket::bind(config.drone_addr)?;
    let producer_socket = UdpSocket::bind(config.producer_addr)?;
    let outbound = UdpSocket::bind(SocketAddr::new(drone_socket.local_addr()?.ip(), 0))?;
    let drone_addr = drone_socket.local_addr()?;
    let producer_addr = producer_socket.local_addr()?;
    info!(%drone_addr, %producer_addr, "dispatcher listening");

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let mut listeners = Vec::new();
    for (socket, class) in [(drone_socket, PeerClass::Drones), (producer_socket, PeerClass::Producers)] {
        socket.set_read_timeout(Some(config.poll))?;
        let tx = tx.clone();
        let stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(class.thread_name().to_string())
            .spawn(move || listen(socket, class, tx, stop))?;
        listeners.push(handle);
    }
    drop(tx);

    let dispatcher = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || dispatch_loop(scheduler, rx, outbound, stop, config.poll))?
    };

    Ok(ServerHandle {
        drone_addr,
        producer_addr,
        stop,
        listeners,
        dispatcher,
    })
}

fn listen(socket: UdpSocket, class: PeerClass, tx: Sender<Inbound>, stop: Arc<AtomicBool>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buffer) {
            Ok((len, from)) => {
                let inbound = Inbound {
                    bytes: buffer[..len].to_vec(),
                    from,
                    class,
                };
                if tx.send(inbound).is_err() {
                    return;
                }
            }
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(err) => {
                // ICMP "port unreachable" from a departed caller surfaces here on some platforms.
                debug!(?class, error = %err, "receive failed");
            }
        }
    }
}

/// Last reply sent to each caller, for answering retransmissions.
#[derive(Default)]
struct ReplyCache {
    last: HashMap<Caller, (Seq, ReplyBody)>,
}

impl ReplyCache {
    fn lookup(&self, caller: Caller, seq: Seq) -> Option<&ReplyBody> {
        match self.last.get(&caller) {
            Some((cached_seq, body)) if *cached_seq == seq => Some(body),
            _ => None,
        }
    }

    fn store(&mut self, caller: Caller, seq: Seq, body: ReplyBody) {
        self.last.insert(caller, (seq, body));
    }
}

fn dispatch_loop(
    mut scheduler: Scheduler,
    rx: Receiver<Inbound>,
    outbound: UdpSocket,
    stop: Arc<AtomicBool>,
    poll: Duration,
) -> Scheduler {
    let mut cache = ReplyCache::default();
    while !stop.load(Ordering::SeqCst) {
        let inbound = match rx.recv_timeout(poll) {
            Ok(inbound) => inbound,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let Some((seq, caller, body)) = serve(&mut scheduler, &mut cache, &inbound) else {
            continue;
        };
        send_reply(&outbound, inbound.from, Reply { seq, body }, caller);
    }
    info!(stats = ?scheduler.stats(), "dispatcher stopped");
    scheduler
}

fn serve(scheduler: &mut Scheduler, cache: &mut ReplyCache, inbound: &Inbound) -> Option<(Seq, Caller, ReplyBody)> {
    let decoded = match protocol::decode_request(&inbound.bytes) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(from = %inbound.from, error = %err, "dropping undecodable datagram");
            return None;
        }
    };
    match decoded {
        Decoded::Rejected { seq, caller, error } => {
            warn!(%caller, seq, %error, "rejecting call");
            Some((seq, caller, ReplyBody::Error(error)))
        }
        Decoded::Call(request) => {
            let (seq, caller) = (request.seq, request.caller);
            if !inbound.class.admits(caller) {
                warn!(%caller, class = ?inbound.class, "caller on the wrong listener");
                return Some((
                    seq,
                    caller,
                    ReplyBody::Error(RemoteError::NotPermitted {
                        method: request.call.name().to_string(),
                        caller: caller.to_string(),
                    }),
                ));
            }
            if let Some(body) = cache.lookup(caller, seq) {
                debug!(%caller, seq, method = request.call.name(), "retransmission, replaying cached reply");
                return Some((seq, caller, body.clone()));
            }
            let method = request.call.name();
            let body = scheduler.handle(caller, request.call);
            trace!(%caller, seq, method, reply = body.kind(), "call served");
            cache.store(caller, seq, body.clone());
            Some((seq, caller, body))
        }
    }
}

fn send_reply(outbound: &UdpSocket, to: SocketAddr, reply: Reply, caller: Caller) {
    let bytes = match protocol::encode(&reply) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%caller, error = %err, "failed to encode reply");
            return;
        }
    };
    if let Err(err) = outbound.send_to(&bytes, to) {
        warn!(%caller, %to, error = %err, "failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_only_matches_same_seq() {
        let mut cache = ReplyCache::default();
        let caller = Caller::Drone(1);
        cache.store(caller, 4, ReplyBody::Wait);
        assert_eq!(cache.lookup(caller, 4), Some(&ReplyBody::Wait));
        assert_eq!(cache.lookup(caller, 5), None);
        assert_eq!(cache.lookup(Caller::Drone(2), 4), None);
    }

    #[test]
    fn listeners_only_admit_their_class() {
        assert!(PeerClass::Drones.admits(Caller::Drone(1)));
        assert!(!PeerClass::Drones.admits(Caller::Producer(1)));
        assert!(PeerClass::Producers.admits(Caller::Producer(1)));
    }
}
