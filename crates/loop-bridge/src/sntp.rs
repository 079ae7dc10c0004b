//! Minimal SNTP (RFC 4330) client.
//!
//! One request is a 48-byte client packet whose transmit timestamp the server echoes back as
//! the origin timestamp. With the local send/receive times `t1`/`t4` and the server's
//! receive/transmit times `t2`/`t3`:
//!
//! - `offset = ((t2 - t1) + (t3 - t4)) / 2`
//! - `round_trip = (t4 - t1) - (t3 - t2)`

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};

use crate::timeline::unix_now_ms;

pub const NTP_PORT: u16 = 123;

const PACKET_LEN: usize = 48;
/// Seconds from 1900-01-01 (NTP era 0) to 1970-01-01.
const NTP_UNIX_DELTA_SECS: i64 = 2_208_988_800;
/// LI = 0, VN = 4, mode = 3 (client).
const CLIENT_HEADER: u8 = 0b00_100_011;
const MODE_SERVER: u8 = 4;
const LEAP_ALARM: u8 = 3;

/// One answered request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SntpSample {
    /// Server clock minus local clock.
    pub offset_ms: i64,
    pub round_trip_ms: i64,
}

fn unix_ms_to_ntp(unix_ms: i64) -> [u8; 8] {
    let secs = unix_ms.div_euclid(1000) + NTP_UNIX_DELTA_SECS;
    let millis = unix_ms.rem_euclid(1000);
    let fraction = (millis << 32) / 1000;
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&(secs as u32).to_be_bytes());
    out[4..].copy_from_slice(&(fraction as u32).to_be_bytes());
    out
}

fn ntp_to_unix_ms(bytes: &[u8]) -> i64 {
    let secs = i64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    let fraction = i64::from(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]));
    // Round to the nearest millisecond.
    (secs - NTP_UNIX_DELTA_SECS) * 1000 + ((fraction * 1000 + (1 << 31)) >> 32)
}

fn encode_request(transmit_unix_ms: i64) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet[40..48].copy_from_slice(&unix_ms_to_ntp(transmit_unix_ms));
    packet
}

/// Validate a server reply to `request` and turn it into a sample.
fn parse_response(
    packet: &[u8],
    request: &[u8; PACKET_LEN],
    sent_unix_ms: i64,
    received_unix_ms: i64,
) -> Result<SntpSample> {
    if packet.len() < PACKET_LEN {
        bail!("sntp reply too short ({} bytes)", packet.len());
    }
    let leap = packet[0] >> 6;
    let mode = packet[0] & 0b111;
    let stratum = packet[1];
    if mode != MODE_SERVER {
        bail!("sntp reply has mode {mode}, expected {MODE_SERVER}");
    }
    if stratum == 0 {
        bail!("sntp server sent kiss-o'-death");
    }
    if stratum > 15 || leap == LEAP_ALARM {
        bail!("sntp server is unsynchronized");
    }
    if packet[24..32] != request[40..48] {
        bail!("sntp reply does not answer our request");
    }
    if packet[40..48].iter().all(|&b| b == 0) {
        bail!("sntp reply has no transmit timestamp");
    }

    let server_received = ntp_to_unix_ms(&packet[32..40]);
    let server_sent = ntp_to_unix_ms(&packet[40..48]);
    let offset_ms =
        ((server_received - sent_unix_ms) + (server_sent - received_unix_ms)) / 2;
    let round_trip_ms =
        ((received_unix_ms - sent_unix_ms) - (server_sent - server_received)).max(0);
    Ok(SntpSample {
        offset_ms,
        round_trip_ms,
    })
}

/// Resolve `host` or `host:port`; the NTP port is used when none is given.
pub fn resolve(server: &str) -> Result<SocketAddr> {
    let mut found = match server.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => (server, NTP_PORT)
            .to_socket_addrs()
            .with_context(|| format!("resolve sntp server {server}"))?,
    };
    found
        .next()
        .ok_or_else(|| anyhow!("sntp server {server} has no address"))
}

/// Send one request to `server` and wait up to `timeout` for the reply.
pub fn query(server: SocketAddr, timeout: Duration) -> Result<SntpSample> {
    let bind: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).context("bind sntp socket")?;
    socket.set_read_timeout(Some(timeout))?;
    socket.connect(server)?;

    let sent_unix_ms = unix_now_ms();
    let request = encode_request(sent_unix_ms);
    let started = Instant::now();
    socket.send(&request).context("send sntp request")?;
    let mut reply = [0u8; 128];
    let len = socket
        .recv(&mut reply)
        .with_context(|| format!("no sntp reply from {server}"))?;
    // Monotonic elapsed time keeps the round trip immune to wall-clock steps.
    let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
    parse_response(
        &reply[..len],
        &request,
        sent_unix_ms,
        sent_unix_ms.saturating_add(elapsed_ms),
    )
}

/// Query `requests` times and keep the answer with the shortest round trip.
pub fn best_of(server: SocketAddr, requests: usize, timeout: Duration) -> Result<SntpSample> {
    let mut best: Option<SntpSample> = None;
    let mut last_error = None;
    for _ in 0..requests.max(1) {
        match query(server, timeout) {
            Ok(sample) => {
                if best.is_none_or(|b| sample.round_trip_ms < b.round_trip_ms) {
                    best = Some(sample);
                }
            }
            Err(e) => {
                tracing::debug!(server = %server, "sntp request failed: {e:#}");
                last_error = Some(e);
            }
        }
    }
    match (best, last_error) {
        (Some(sample), _) => Ok(sample),
        (None, Some(e)) => Err(e.context("all sntp requests failed")),
        (None, None) => Err(anyhow!("no sntp requests made")),
    }
}
