//! Server-wide bandwidth cap, split fairly across active client IPs.
//!
//! Each unique IP with at least one active transfer receives an equal share
//! of the total cap, however many parallel connections it opens - a download
//! manager fanning out sockets cannot claim more than one share. Shares are
//! rebalanced synchronously on every join and leave, so an in-flight write
//! observes either the pre-change or post-change rate, never an intermediate.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use tokio::time::Instant;

use crate::net::client_ip;
use crate::state::AppState;

/// Maximum bytes pushed through the limiter in one pass. Smaller chunks give
/// smoother limiting; 32 KiB balances accuracy against per-chunk overhead.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Token bucket with a retunable rate, shared by every connection from one
/// IP.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// Refill rate in bytes per second.
    rate: f64,
    /// Token ceiling; also the largest single grant.
    burst: f64,
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.updated = now;
    }
}

impl RateLimiter {
    pub fn new(rate: f64, burst: usize) -> Self {
        Self {
            state: Mutex::new(Bucket {
                rate,
                burst: burst as f64,
                tokens: burst as f64,
                updated: Instant::now(),
            }),
        }
    }

    /// Retunes the bucket. Credit accrued at the old rate is applied first so
    /// a rebalance never erases earned tokens.
    pub fn set_rate(&self, rate: f64, burst: usize) {
        let mut bucket = self.state.lock().expect("limiter poisoned");
        bucket.refill(Instant::now());
        bucket.rate = rate;
        bucket.burst = burst as f64;
        bucket.tokens = bucket.tokens.min(bucket.burst);
    }

    /// Waits until `n` tokens are available and consumes them. The lock is
    /// never held across a sleep; a retune during the wait takes effect at
    /// the next refill check.
    pub async fn wait_n(&self, n: usize) {
        let need = n as f64;
        loop {
            let delay = {
                let mut bucket = self.state.lock().expect("limiter poisoned");
                bucket.refill(Instant::now());
                if bucket.tokens >= need {
                    bucket.tokens -= need;
                    return;
                }
                let deficit = need - bucket.tokens;
                Duration::from_secs_f64(deficit / bucket.rate.max(f64::MIN_POSITIVE))
            };
            tokio::time::sleep(delay.min(Duration::from_secs(1))).await;
        }
    }

    #[cfg(test)]
    fn rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }
}

#[derive(Debug)]
struct PeerState {
    limiter: Arc<RateLimiter>,
    /// Number of active transfers from this IP.
    refs: usize,
}

/// The governor: per-IP peers against one global cap.
#[derive(Debug)]
pub struct BandwidthManager {
    /// Total cap in bytes per second; 0 disables limiting entirely.
    limit_bps: f64,
    peers: Mutex<HashMap<IpAddr, PeerState>>,
}

impl BandwidthManager {
    pub fn new(limit_bps: f64) -> Arc<Self> {
        Arc::new(Self {
            limit_bps,
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn unlimited(&self) -> bool {
        self.limit_bps <= 0.0
    }

    /// Registers a transfer for `ip` and rebalances every peer's share.
    /// Returns `None` when no cap is configured, so the zero-cap path costs
    /// nothing.
    pub fn join(self: &Arc<Self>, ip: IpAddr, what: &str) -> Option<Transfer> {
        if self.unlimited() {
            return None;
        }

        let limiter = {
            let mut peers = self.peers.lock().expect("bandwidth mutex poisoned");
            let peer = peers.entry(ip).or_insert_with(|| PeerState {
                // Placeholder rate; the rebalance below sets the real share.
                limiter: Arc::new(RateLimiter::new(1.0, CHUNK_SIZE)),
                refs: 0,
            });
            peer.refs += 1;
            tracing::info!(
                "download start  ip={ip:<15}  streams={:<2}  file={what}",
                peer.refs
            );
            let limiter = Arc::clone(&peer.limiter);
            Self::rebalance_locked(self.limit_bps, &mut peers);
            limiter
        };

        Some(Transfer {
            manager: Arc::clone(self),
            ip,
            what: what.to_string(),
            limiter,
        })
    }

    fn leave(&self, ip: IpAddr, what: &str) {
        let mut peers = self.peers.lock().expect("bandwidth mutex poisoned");
        if let Some(peer) = peers.get_mut(&ip) {
            peer.refs -= 1;
            tracing::info!(
                "download end    ip={ip:<15}  streams={:<2}  file={what}",
                peer.refs
            );
            if peer.refs == 0 {
                peers.remove(&ip);
            }
        }
        Self::rebalance_locked(self.limit_bps, &mut peers);
    }

    /// Recomputes the per-IP rate and applies it to every live limiter.
    /// Burst stays at one chunk: responsive, but never more than one write
    /// buffer of free data.
    fn rebalance_locked(limit_bps: f64, peers: &mut HashMap<IpAddr, PeerState>) {
        let n = peers.len();
        if n == 0 || limit_bps <= 0.0 {
            return;
        }
        let share = limit_bps / n as f64;
        for (ip, peer) in peers.iter() {
            peer.limiter.set_rate(share, CHUNK_SIZE);
            tracing::debug!(
                "rate rebalance  ip={ip:<15}  peers={n:<2}  alloc={}",
                format_bits(share)
            );
        }
    }

    #[cfg(test)]
    fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

/// One active transfer. Dropping it releases the peer reference and triggers
/// a rebalance - including when the client disconnects and hyper drops the
/// response body mid-stream.
pub struct Transfer {
    manager: Arc<BandwidthManager>,
    ip: IpAddr,
    what: String,
    limiter: Arc<RateLimiter>,
}

impl Drop for Transfer {
    fn drop(&mut self) {
        self.manager.leave(self.ip, &self.what);
    }
}

/// Axum middleware that meters every response body byte through the client
/// IP's limiter. Routes without a configured cap pass through untouched.
pub async fn throttle(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req, &state.trusted_proxy);
    let what = req.uri().path().to_string();

    let Some(transfer) = state.bandwidth.join(ip, &what) else {
        return next.run(req).await;
    };

    let response = next.run(req).await;
    throttle_response(response, transfer)
}

struct ThrottledBody {
    data: axum::body::BodyDataStream,
    pending: Bytes,
    limiter: Arc<RateLimiter>,
    /// Keeps the peer registered for exactly as long as the body lives.
    _transfer: Transfer,
}

/// Re-wraps the response body so every frame is split into chunks of at most
/// [`CHUNK_SIZE`] bytes, each gated on the limiter before it leaves.
fn throttle_response(response: Response, transfer: Transfer) -> Response {
    let limiter = Arc::clone(&transfer.limiter);
    let (parts, body) = response.into_parts();

    let stream = futures::stream::unfold(
        ThrottledBody {
            data: body.into_data_stream(),
            pending: Bytes::new(),
            limiter,
            _transfer: transfer,
        },
        |mut body| async move {
            loop {
                if !body.pending.is_empty() {
                    let take = body.pending.len().min(CHUNK_SIZE);
                    let chunk = body.pending.split_to(take);
                    body.limiter.wait_n(chunk.len()).await;
                    return Some((Ok::<_, axum::Error>(chunk), body));
                }
                match body.data.next().await {
                    Some(Ok(frame)) => body.pending = frame,
                    Some(Err(e)) => return Some((Err(e), body)),
                    None => return None,
                }
            }
        },
    );

    Response::from_parts(parts, Body::from_stream(stream))
}

/// Formats a bytes/sec value as human-readable bits/sec, matching the unit
/// convention the cap is configured with.
pub fn format_bits(bytes_per_sec: f64) -> String {
    let bps = bytes_per_sec * 8.0;
    if bps >= 1_000_000_000.0 {
        format!("{:.2} Gbps", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.2} Mbps", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.2} Kbps", bps / 1_000.0)
    } else {
        format!("{bps:.0} bps")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn zero_cap_never_allocates_peers() {
        let bm = BandwidthManager::new(0.0);
        assert!(bm.join(ip(1), "/download/x").is_none());
        assert_eq!(bm.peer_count(), 0);
    }

    #[test]
    fn shares_split_evenly_across_ips_and_recover_on_leave() {
        let bm = BandwidthManager::new(1_000_000.0);

        let a = bm.join(ip(1), "/download/a").unwrap();
        assert_eq!(a.limiter.rate(), 1_000_000.0);

        let b = bm.join(ip(2), "/download/b").unwrap();
        assert_eq!(a.limiter.rate(), 500_000.0);
        assert_eq!(b.limiter.rate(), 500_000.0);

        let c = bm.join(ip(3), "/download/c").unwrap();
        assert!((a.limiter.rate() - 1_000_000.0 / 3.0).abs() < 1.0);

        drop(c);
        assert_eq!(a.limiter.rate(), 500_000.0);
        drop(b);
        assert_eq!(a.limiter.rate(), 1_000_000.0);
        drop(a);
        assert_eq!(bm.peer_count(), 0);
    }

    #[test]
    fn same_ip_connections_share_one_limiter() {
        let bm = BandwidthManager::new(1_000_000.0);
        let a1 = bm.join(ip(1), "/download/a").unwrap();
        let a2 = bm.join(ip(1), "/download/b").unwrap();

        // One peer, full rate: parallel connections from one IP gain nothing.
        assert_eq!(bm.peer_count(), 1);
        assert_eq!(a1.limiter.rate(), 1_000_000.0);
        assert!(Arc::ptr_eq(&a1.limiter, &a2.limiter));

        drop(a1);
        // Still referenced by the second transfer.
        assert_eq!(bm.peer_count(), 1);
        drop(a2);
        assert_eq!(bm.peer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_n_paces_to_the_configured_rate() {
        let limiter = RateLimiter::new(1_000.0, 100);

        // The initial burst is free.
        let start = Instant::now();
        limiter.wait_n(100).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // The next 100 bytes must wait ~100ms at 1000 B/s.
        limiter.wait_n(100).await;
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(95) && waited <= Duration::from_millis(200),
            "waited {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retune_applies_to_waiting_transfers() {
        let limiter = Arc::new(RateLimiter::new(10.0, 10));
        limiter.wait_n(10).await; // drain the burst

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let start = Instant::now();
                limiter.wait_n(10).await;
                start.elapsed()
            })
        };

        // Let the waiter park, then raise the rate sharply.
        tokio::time::sleep(Duration::from_millis(10)).await;
        limiter.set_rate(10_000.0, 10_000);

        let waited = waiter.await.unwrap();
        // At the old 10 B/s rate the wait would be ~1s; the retune shortens
        // the remaining deficit to near nothing after the next poll.
        assert!(waited < Duration::from_millis(1100), "waited {waited:?}");
    }

    #[test]
    fn bits_formatting_matches_configured_units() {
        assert_eq!(format_bits(125_000_000.0), "1.00 Gbps");
        assert_eq!(format_bits(1_250_000.0), "10.00 Mbps");
        assert_eq!(format_bits(62_500.0), "500.00 Kbps");
        assert_eq!(format_bits(10.0), "80 bps");
    }
}
