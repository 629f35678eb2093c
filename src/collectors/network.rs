use std::net::UdpSocket;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use sysinfo::Networks;

use super::command;
use super::{blocking, CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{AddressInfo, CollectorKind, NetworkReading, Reading};

pub const ADDRESS_TTL: Duration = Duration::from_secs(5);
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Turns cumulative byte counters into Mbps between consecutive samples.
#[derive(Debug, Default)]
pub struct BandwidthTracker {
    last_tick: Option<Instant>,
    last_in: u64,
    last_out: u64,
}

impl BandwidthTracker {
    /// Returns `(download_mbps, upload_mbps)`. The first sample, and any
    /// direction whose counter went backwards, reports 0.
    pub fn tick(&mut self, now: Instant, bytes_in: u64, bytes_out: u64) -> (f64, f64) {
        let rates = match self.last_tick {
            Some(prev) => {
                let dt = now.saturating_duration_since(prev).as_secs_f64();
                if dt <= 0.0 {
                    (0.0, 0.0)
                } else {
                    (
                        mbps(bytes_in, self.last_in, dt),
                        mbps(bytes_out, self.last_out, dt),
                    )
                }
            }
            None => (0.0, 0.0),
        };
        self.last_tick = Some(now);
        self.last_in = bytes_in;
        self.last_out = bytes_out;
        rates
    }
}

fn mbps(current: u64, previous: u64, dt: f64) -> f64 {
    if current < previous {
        return 0.0;
    }
    (current - previous) as f64 * 8.0 / 1_000_000.0 / dt
}

/// Address details change rarely; keep them for `ADDRESS_TTL`.
#[derive(Debug)]
pub struct AddressCache {
    ttl: Duration,
    entry: Option<(Instant, AddressInfo)>,
}

impl AddressCache {
    pub fn new(ttl: Duration) -> Self {
        AddressCache { ttl, entry: None }
    }

    pub fn fresh(&self, now: Instant) -> Option<&AddressInfo> {
        match &self.entry {
            Some((fetched, info)) if now.saturating_duration_since(*fetched) < self.ttl => Some(info),
            _ => None,
        }
    }

    pub fn store(&mut self, now: Instant, info: AddressInfo) {
        self.entry = Some((now, info));
    }
}

pub struct NetworkCollector {
    networks: Option<Networks>,
    bandwidth: BandwidthTracker,
    addresses: AddressCache,
}

impl NetworkCollector {
    pub fn new() -> Self {
        NetworkCollector {
            networks: None,
            bandwidth: BandwidthTracker::default(),
            addresses: AddressCache::new(ADDRESS_TTL),
        }
    }

    async fn address_info(&mut self, now: Instant) -> AddressInfo {
        if let Some(info) = self.addresses.fresh(now) {
            return info.clone();
        }
        let info = AddressInfo {
            local_ip: local_ip(),
            gateway: default_gateway().await,
            dns: dns_servers().await,
        };
        self.addresses.store(now, info.clone());
        info
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for NetworkCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Network
    }

    fn source(&self) -> &'static str {
        "sysinfo::networks"
    }

    async fn produce(&mut self, ctx: &CollectContext) -> Result<Reading, CollectorError> {
        let (networks, (bytes_in, bytes_out)) = blocking("network", self.networks.take(), |networks| {
            let networks = networks.get_or_insert_with(Networks::new);
            networks.refresh_list();
            networks.refresh();
            networks
                .iter()
                .filter(|(name, _)| !is_loopback(name))
                .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                    (
                        rx.saturating_add(data.total_received()),
                        tx.saturating_add(data.total_transmitted()),
                    )
                })
        })
        .await?;
        self.networks = networks;

        let (download_mbps, upload_mbps) = self.bandwidth.tick(ctx.now, bytes_in, bytes_out);
        let addresses = self.address_info(ctx.now).await;

        Ok(Reading::Network(NetworkReading {
            bytes_in,
            bytes_out,
            download_mbps,
            upload_mbps,
            addresses,
        }))
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0")
}

/// Source address the kernel would pick for outbound traffic. Connecting a
/// UDP socket sends nothing.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    if addr.ip().is_unspecified() {
        None
    } else {
        Some(addr.ip().to_string())
    }
}

async fn default_gateway() -> Option<String> {
    match command::run("route", &["-n", "get", "default"]).await {
        Ok(output) => parse_route_gateway(&output),
        Err(err) => {
            debug!("gateway lookup failed: {}", err);
            None
        }
    }
}

async fn dns_servers() -> Vec<String> {
    match tokio::fs::read_to_string(RESOLV_CONF).await {
        Ok(contents) => parse_resolv_conf(&contents),
        Err(err) => {
            debug!("cannot read {}: {}", RESOLV_CONF, err);
            Vec::new()
        }
    }
}

pub fn parse_route_gateway(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("gateway:")?;
        let gateway = rest.trim();
        (!gateway.is_empty()).then(|| gateway.to_string())
    })
}

pub fn parse_resolv_conf(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(server)) => Some(server.to_string()),
                _ => None,
            }
        })
        .collect()
}
