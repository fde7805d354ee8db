//! Scripted UDP endpoint that answers every lease request the same way.
//!
//! It stands in for a leasing server in tests and demos. It never allocates
//! addresses: whatever reply it was built with goes back to every client.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::identity::ClientIdentity;
use crate::wire::LeaseRequest;

/// How often the receive loop wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_BACKOFF_MS: u64 = 1000;

/// What the responder sends back to every request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(Value),
    /// Sent verbatim, for exercising clients against garbage
    Raw(Vec<u8>),
    Silent,
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Json(serde_json::json!({
            "status": "ASSIGNED_IP",
            "assigned_ip": "10.0.0.5",
            "lease_time": 10,
        }))
    }
}

impl Reply {
    fn to_bytes(&self) -> serde_json::Result<Option<Vec<u8>>> {
        match self {
            Reply::Json(value) => serde_json::to_vec(value).map(Some),
            Reply::Raw(bytes) => Ok(Some(bytes.clone())),
            Reply::Silent => Ok(None),
        }
    }
}

#[derive(Default)]
struct Shared {
    requests: AtomicUsize,
    seen: DashMap<ClientIdentity, SocketAddr>,
    stop: AtomicBool,
}

pub struct Responder {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Responder {
    /// Bind `bind` and start answering on a background thread.
    pub fn spawn(bind: SocketAddr, reply: Reply) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;
        let payload = reply.to_bytes().map_err(io::Error::other)?;

        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("responder".to_string())
            .spawn(move || serve(socket, payload, &worker_shared))?;

        info!(%local_addr, "mock responder listening");
        Ok(Self {
            local_addr,
            shared,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Datagrams received so far, decodable or not.
    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::Acquire)
    }

    /// Distinct client identities that have sent a well-formed request.
    pub fn seen(&self) -> Vec<ClientIdentity> {
        self.shared.seen.iter().map(|entry| *entry.key()).collect()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("responder thread panicked");
            }
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(socket: UdpSocket, payload: Option<Vec<u8>>, shared: &Shared) {
    let mut read_buf = [0u8; 2048];
    let mut error_count: u32 = 0;

    while !shared.stop.load(Ordering::Acquire) {
        let (amount, src) = match socket.recv_from(&mut read_buf) {
            Ok((amount, src)) => {
                error_count = 0;
                debug!("Received {amount} bytes from {src:?}");
                trace!("Data: {:x?}", &read_buf[..amount]);
                (amount, src)
            }
            Err(err) => {
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {}
                    // a client gave up and closed its socket before our reply landed
                    io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted => {
                        debug!(kind = ?err.kind(), "ignoring transient recv error");
                    }
                    _ => {
                        error!("Unexpected socket error: {err:?}");
                        error_count = error_count.saturating_add(1);
                        let backoff_ms = std::cmp::min(
                            10_u64.saturating_mul(2_u64.saturating_pow(error_count)),
                            MAX_BACKOFF_MS,
                        );
                        thread::sleep(Duration::from_millis(backoff_ms));
                    }
                }
                continue;
            }
        };

        shared.requests.fetch_add(1, Ordering::AcqRel);

        match LeaseRequest::from_bytes(&read_buf[..amount]) {
            Ok(request) => {
                info!(mac = %request.mac_address, command = %request.command, %src, "lease request");
                shared.seen.insert(request.mac_address, src);
            }
            Err(e) => warn!(%src, "undecodable request: {e}"),
        }

        let Some(ref payload) = payload else {
            debug!(%src, "staying silent");
            continue;
        };

        match socket.send_to(payload, src) {
            Ok(sent) => debug!("responded to {src} with {sent} bytes"),
            Err(e) => error!("Problem sending response message: {e}"),
        }
    }

    debug!("responder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{LeaseResponse, LeaseStatus, REQUEST_IP};
    use advmac::MacAddr6;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn client() -> UdpSocket {
        let socket = UdpSocket::bind(loopback()).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn request_bytes(last: u8) -> Vec<u8> {
        let mac = ClientIdentity::from(MacAddr6::new([0x00, 0x16, 0x3e, 0, 0, last]));
        LeaseRequest::new(REQUEST_IP, mac).to_vec().unwrap()
    }

    #[test]
    fn answers_with_configured_reply_and_records_identity() {
        let responder = Responder::spawn(loopback(), Reply::default()).unwrap();
        let socket = client();

        socket
            .send_to(&request_bytes(1), responder.local_addr())
            .unwrap();
        let mut buf = [0u8; 1024];
        let (amount, _) = socket.recv_from(&mut buf).unwrap();
        let resp = LeaseResponse::from_bytes(&buf[..amount]).unwrap();

        assert_eq!(resp.status, Some(LeaseStatus::Assigned));
        assert_eq!(responder.requests(), 1);
        assert_eq!(
            responder.seen(),
            vec![ClientIdentity::from(MacAddr6::new([0x00, 0x16, 0x3e, 0, 0, 1]))]
        );
    }

    #[test]
    fn silent_responder_counts_but_never_answers() {
        let responder = Responder::spawn(loopback(), Reply::Silent).unwrap();
        let socket = client();
        socket
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();

        socket
            .send_to(&request_bytes(2), responder.local_addr())
            .unwrap();
        let mut buf = [0u8; 1024];
        assert!(socket.recv_from(&mut buf).is_err());
        assert_eq!(responder.requests(), 1);
    }

    #[test]
    fn garbage_requests_are_still_answered() {
        let responder = Responder::spawn(loopback(), Reply::Raw(b"pong".to_vec())).unwrap();
        let socket = client();

        socket.send_to(b"ping", responder.local_addr()).unwrap();
        let mut buf = [0u8; 16];
        let (amount, _) = socket.recv_from(&mut buf).unwrap();

        assert_eq!(&buf[..amount], b"pong");
        assert!(responder.seen().is_empty());
    }

    #[test]
    fn shutdown_joins_worker() {
        let responder = Responder::spawn(loopback(), Reply::Silent).unwrap();
        responder.shutdown();
    }
}
