use std::{
    fmt, io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    thread,
    time::{Duration, Instant},
};

use compact_str::CompactString;
use rand::Rng;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::identity;
use crate::wire::{LeaseRequest, LeaseResponse, LeaseStatus};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
    #[error("encode failure: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode failure: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("unexpected status {0}")]
    UnexpectedStatus(CompactString),
    #[error("granted lease is missing {0}")]
    MissingField(&'static str),
    #[error("lease time {0} is not a whole number of seconds")]
    InvalidLeaseTime(String),
    #[error("session aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no response before the receive timeout")]
    Timeout,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Where a session stands. Everything except `AwaitingResponse` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    AwaitingResponse,
    Granted,
    Denied,
    Errored,
    TimedOut,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Start => "Start",
            SessionState::AwaitingResponse => "AwaitingResponse",
            SessionState::Granted => "Granted",
            SessionState::Denied => "Denied",
            SessionState::Errored => "Errored",
            SessionState::TimedOut => "TimedOut",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    LeaseGranted {
        address: CompactString,
        renewal_delay: Duration,
    },
    LeaseDenied,
    ProtocolError(ProtocolError),
    Timeout,
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::LeaseGranted { .. } => SessionState::Granted,
            SessionOutcome::LeaseDenied => SessionState::Denied,
            SessionOutcome::ProtocolError(_) => SessionState::Errored,
            SessionOutcome::Timeout => SessionState::TimedOut,
        }
    }

    pub fn renewal_delay_secs(&self) -> Option<f64> {
        match self {
            SessionOutcome::LeaseGranted { renewal_delay, .. } => {
                Some(renewal_delay.as_secs_f64())
            }
            _ => None,
        }
    }
}

impl From<SessionError> for SessionOutcome {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Timeout => SessionOutcome::Timeout,
            SessionError::Protocol(e) => SessionOutcome::ProtocolError(e),
        }
    }
}

/// Time to hold a lease before a well-behaved client would renew it.
pub fn renewal_delay(lease_secs: u64, fraction: f64) -> Duration {
    Duration::try_from_secs_f64(lease_secs as f64 * fraction).unwrap_or(Duration::MAX)
}

/// One simulated client performing a single request/response exchange.
pub struct LeaseSession<'a, R> {
    config: &'a Config,
    rng: R,
}

impl<'a, R: Rng> LeaseSession<'a, R> {
    pub fn new(config: &'a Config, rng: R) -> Self {
        Self { config, rng }
    }

    /// Run the exchange to completion. Errors never escape; they are logged
    /// and folded into the returned outcome. A granted lease is held for the
    /// renewal delay before returning.
    #[instrument(name = "session", skip_all, fields(client = id))]
    pub fn run(&mut self, id: usize) -> SessionOutcome {
        debug!(state = %SessionState::Start, "starting session");

        let outcome = match self
            .exchange()
            .and_then(|resp| classify(resp, self.config.renewal_fraction))
        {
            Ok(outcome) => outcome,
            Err(SessionError::Timeout) => {
                warn!(timeout = ?self.config.receive_timeout, "no response from server");
                SessionOutcome::Timeout
            }
            Err(SessionError::Protocol(e)) => {
                error!(%e, "lease exchange failed");
                SessionOutcome::ProtocolError(e)
            }
        };

        if let SessionOutcome::LeaseGranted { renewal_delay, .. } = &outcome {
            info!(?renewal_delay, "holding lease until renewal point");
            thread::sleep(*renewal_delay);
        }

        info!(state = %outcome.state(), "session finished");
        outcome
    }

    /// Send one request and wait for at most one reply. The socket lives only
    /// for the duration of this call.
    fn exchange(&mut self) -> Result<LeaseResponse, SessionError> {
        let server = self.config.server;
        let socket = bind_ephemeral(server).map_err(ProtocolError::Transport)?;

        let identity = identity::generate(&mut self.rng);
        info!(mac = %identity, "generated client identity");

        let request = LeaseRequest::new(self.config.command.clone(), identity);
        let payload = request.to_vec().map_err(ProtocolError::Encode)?;
        socket
            .send_to(&payload, server)
            .map_err(ProtocolError::Transport)?;
        info!(%server, command = %request.command, "sent lease request");
        debug!(state = %SessionState::AwaitingResponse);

        let mut buf = vec![0u8; self.config.recv_buffer_len];
        let amount = recv_before(&socket, &mut buf, self.config.receive_timeout)?;

        let raw = &buf[..amount];
        info!(response = %String::from_utf8_lossy(raw), "received response");
        LeaseResponse::from_bytes(raw).map_err(|e| ProtocolError::Decode(e).into())
    }
}

/// Turn a decoded reply into an outcome. Only `ASSIGNED_IP` and
/// `NO_IP_ASSIGNED` are acceptable answers to an address request.
pub(crate) fn classify(
    response: LeaseResponse,
    renewal_fraction: f64,
) -> Result<SessionOutcome, SessionError> {
    match response.status {
        Some(LeaseStatus::Assigned) => {
            let address = response
                .assigned_ip
                .ok_or(ProtocolError::MissingField("assigned_ip"))?;
            let lease_time = response
                .lease_time
                .ok_or(ProtocolError::MissingField("lease_time"))?;
            let lease_secs = lease_time
                .seconds()
                .ok_or_else(|| ProtocolError::InvalidLeaseTime(lease_time.to_string()))?;

            info!(%address, lease_time = lease_secs, "assigned address");
            Ok(SessionOutcome::LeaseGranted {
                address,
                renewal_delay: renewal_delay(lease_secs, renewal_fraction),
            })
        }
        Some(LeaseStatus::NotAssigned) => {
            info!(
                server_message = response.message.as_deref().unwrap_or_default(),
                "no address assigned"
            );
            Ok(SessionOutcome::LeaseDenied)
        }
        Some(other) => Err(ProtocolError::UnexpectedStatus(other.to_string().into()).into()),
        None => Err(ProtocolError::UnexpectedStatus("<missing>".into()).into()),
    }
}

fn bind_ephemeral(server: SocketAddr) -> io::Result<UdpSocket> {
    let local = match server {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    UdpSocket::bind(local)
}

/// Receive one datagram, never blocking past `timeout` in total. Signal
/// interruptions resume the wait with whatever time is left.
fn recv_before(
    socket: &UdpSocket,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, SessionError> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SessionError::Timeout);
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(ProtocolError::Transport)?;

        match socket.recv_from(buf) {
            Ok((amount, src)) => {
                debug!("Received {amount} bytes from {src}");
                return Ok(amount);
            }
            Err(err) => match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                    return Err(SessionError::Timeout)
                }
                io::ErrorKind::Interrupted => {
                    debug!("recv_from interrupted, retrying");
                }
                _ => return Err(ProtocolError::Transport(err).into()),
            },
        }
    }
}
