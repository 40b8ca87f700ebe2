//! Liveness probes
//!
//! A probe answers one question: does this address answer an ICMP echo right now?
//! "Unreachable" is a regular answer (`ProbeReply { reachable: false, .. }`); a
//! `ProbeError` means the probe itself could not be carried out.

use std::fmt;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tokio::process::Command;
use tracing::{debug, instrument, trace};

static HOSTNAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.?$")
        .ok()
});

const ICMP_PAYLOAD: [u8; 32] = [0; 32];

/// Reply of a probe that could be carried out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply {
    pub reachable: bool,
    pub raw_output: String,
}

/// Failure of the probe mechanism itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Socket, process or name resolution failure
    Transport(String),

    /// The probe did not finish within its timeout
    Timeout,

    /// The address is neither an IP literal nor a valid hostname
    InvalidAddress(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Transport(msg) => write!(f, "probe transport failure: {}", msg),
            ProbeError::Timeout => write!(f, "probe timed out"),
            ProbeError::InvalidAddress(addr) => write!(f, "invalid probe address: {}", addr),
        }
    }
}

impl std::error::Error for ProbeError {}

#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Test reachability of `address`, giving up after `timeout`
    async fn probe(&self, address: &str, timeout: Duration) -> Result<ProbeReply, ProbeError>;
}

/// Accept IP literals and RFC 1123 hostnames only
///
/// Rejecting everything else keeps user input from ever reaching the `ping` command
/// line as an option.
pub fn validate_address(address: &str) -> Result<(), ProbeError> {
    if address.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    let is_hostname = HOSTNAME.as_ref().is_some_and(|re| re.is_match(address));
    if address.len() <= 253 && is_hostname {
        return Ok(());
    }

    Err(ProbeError::InvalidAddress(address.to_string()))
}

/// Probe by running the system `ping` binary
#[derive(Debug, Clone)]
pub struct SystemPingClient {
    count: u8,
}

impl SystemPingClient {
    pub fn new(count: u8) -> Self {
        Self {
            count: count.max(1),
        }
    }
}

#[async_trait]
impl ProbeClient for SystemPingClient {
    #[instrument(skip(self), fields(count = self.count))]
    async fn probe(&self, address: &str, timeout: Duration) -> Result<ProbeReply, ProbeError> {
        validate_address(address)?;

        let wait_secs = timeout.as_secs().max(1);
        let mut command = Command::new("ping");
        command
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg(address)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProbeError::Transport(format!("failed to run ping: {e}"))),
            Err(_) => return Err(ProbeError::Timeout),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        // iputils: 0 = replies received, 1 = no reply, anything else = ping itself failed
        match output.status.code() {
            Some(0) | Some(1) => {
                let raw_output = if stderr.is_empty() {
                    stdout
                } else {
                    format!("{stdout}\n{stderr}")
                };
                trace!("ping exited with {}", output.status);
                Ok(ProbeReply {
                    reachable: output.status.success(),
                    raw_output,
                })
            }
            _ => {
                let detail = if stderr.is_empty() { stdout } else { stderr };
                Err(ProbeError::Transport(format!(
                    "ping exited with {}: {}",
                    output.status, detail
                )))
            }
        }
    }
}

/// Probe with a single ICMP echo request over a raw socket
pub struct IcmpProbeClient {
    v4: Client,
    v6: Option<Client>,
    identifier: AtomicU16,
}

impl IcmpProbeClient {
    pub fn new() -> Result<Self, ProbeError> {
        let v4 = Client::new(&Config::default())
            .map_err(|e| ProbeError::Transport(format!("failed to open ICMP socket: {e}")))?;

        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!("IPv6 ICMP socket unavailable: {e}");
                None
            }
        };

        Ok(Self {
            v4,
            v6,
            identifier: AtomicU16::new(std::process::id() as u16),
        })
    }

    async fn resolve(address: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }

        let mut addrs = tokio::net::lookup_host((address, 0))
            .await
            .map_err(|e| ProbeError::Transport(format!("failed to resolve {address}: {e}")))?;

        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| ProbeError::Transport(format!("{address} resolved to no addresses")))
    }
}

#[async_trait]
impl ProbeClient for IcmpProbeClient {
    #[instrument(skip(self))]
    async fn probe(&self, address: &str, timeout: Duration) -> Result<ProbeReply, ProbeError> {
        validate_address(address)?;

        let ip = tokio::time::timeout(timeout, Self::resolve(address))
            .await
            .map_err(|_| ProbeError::Timeout)??;

        let client = match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => self
                .v6
                .as_ref()
                .ok_or_else(|| ProbeError::Transport("IPv6 ICMP socket unavailable".to_string()))?,
        };

        let identifier = self.identifier.fetch_add(1, Ordering::Relaxed);
        let mut pinger = client.pinger(ip, PingIdentifier(identifier)).await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(0), &ICMP_PAYLOAD).await {
            Ok((_packet, rtt)) => Ok(ProbeReply {
                reachable: true,
                raw_output: format!(
                    "reply from {ip}: bytes={} time={:.1} ms",
                    ICMP_PAYLOAD.len(),
                    rtt.as_secs_f64() * 1000.0
                ),
            }),
            Err(SurgeError::Timeout { .. }) => Ok(ProbeReply {
                reachable: false,
                raw_output: format!("request to {ip} timed out after {:?}", timeout),
            }),
            Err(e) => Err(ProbeError::Transport(e.to_string())),
        }
    }
}
