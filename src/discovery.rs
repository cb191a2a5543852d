//! Network scanner: finds candidate hosts for identification (spec.md §4.6).
//!
//! Scanning is deliberately dumb — it only checks whether something is
//! listening on a Modbus/TCP port. Classifying what's actually there is
//! the identifier's job, not this module's.

use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

const MODBUS_PORTS: [u16; 3] = [502, 1502, 8502];

pub struct NetworkScanner {
    scan_timeout: Duration,
    concurrent_scans: usize,
}

impl Default for NetworkScanner {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_millis(200),
            concurrent_scans: 100,
        }
    }
}

impl NetworkScanner {
    pub fn new(scan_timeout: Duration, concurrent_scans: usize) -> Self {
        Self {
            scan_timeout,
            concurrent_scans,
        }
    }

    async fn scan_ip(&self, ip: IpAddr) -> Vec<(IpAddr, u16)> {
        let mut found = Vec::new();
        for port in MODBUS_PORTS {
            if self.is_port_open(ip, port).await {
                found.push((ip, port));
            }
        }
        found
    }

    async fn is_port_open(&self, ip: IpAddr, port: u16) -> bool {
        let addr = SocketAddr::new(ip, port);
        match timeout(self.scan_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                debug!(%ip, port, "port open");
                true
            }
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// Scan every address in `ip_range` ("192.168.1.0/24" or
    /// "192.168.1.1-192.168.1.10") and return hosts with an open Modbus port.
    pub async fn scan_range(&self, ip_range: &str) -> Result<Vec<(IpAddr, u16)>> {
        let ips = parse_ip_range(ip_range)?;
        info!(count = ips.len(), "scanning addresses for Modbus devices");

        let mut all_found = Vec::new();
        for chunk in ips.chunks(self.concurrent_scans) {
            let mut handles = Vec::new();
            for ip in chunk {
                let scanner = Self {
                    scan_timeout: self.scan_timeout,
                    concurrent_scans: self.concurrent_scans,
                };
                let ip = *ip;
                handles.push(tokio::spawn(async move { scanner.scan_ip(ip).await }));
            }
            for handle in handles {
                if let Ok(found) = handle.await {
                    all_found.extend(found);
                }
            }
        }

        info!(count = all_found.len(), "found candidate Modbus hosts");
        Ok(all_found)
    }
}

fn parse_ip_range(range: &str) -> Result<Vec<IpAddr>> {
    if range.contains('/') {
        parse_cidr(range)
    } else if range.contains('-') {
        parse_range(range)
    } else {
        Ok(vec![range.parse()?])
    }
}

fn parse_cidr(cidr: &str) -> Result<Vec<IpAddr>> {
    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        anyhow::bail!("invalid CIDR notation");
    }

    let base_ip: IpAddr = parts[0].parse()?;
    let prefix_len: u32 = parts[1].parse()?;

    match base_ip {
        IpAddr::V4(ipv4) => {
            let base = u32::from(ipv4);
            let mask = !((1u32 << (32 - prefix_len)) - 1);
            let network = base & mask;
            let broadcast = network | !mask;

            let mut ips = Vec::new();
            for i in (network + 1)..broadcast {
                ips.push(IpAddr::V4(i.into()));
            }
            Ok(ips)
        }
        IpAddr::V6(_) => anyhow::bail!("IPv6 CIDR ranges not supported"),
    }
}

fn parse_range(range: &str) -> Result<Vec<IpAddr>> {
    let parts: Vec<&str> = range.split('-').collect();
    if parts.len() != 2 {
        anyhow::bail!("invalid range notation");
    }

    let start_ip: IpAddr = parts[0].trim().parse()?;
    let end_ip: IpAddr = parts[1].trim().parse()?;

    match (start_ip, end_ip) {
        (IpAddr::V4(start), IpAddr::V4(end)) => {
            let start_u32 = u32::from(start);
            let end_u32 = u32::from(end);
            if start_u32 > end_u32 {
                anyhow::bail!("start IP must be less than or equal to end IP");
            }
            Ok((start_u32..=end_u32).map(|i| IpAddr::V4(i.into())).collect())
        }
        _ => anyhow::bail!("only IPv4 ranges are supported"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cidr_excluding_network_and_broadcast() {
        let ips = parse_ip_range("192.168.1.0/30").unwrap();
        assert_eq!(ips.len(), 2);
    }

    #[test]
    fn parses_dash_range_inclusive() {
        let ips = parse_ip_range("192.168.1.1-192.168.1.3").unwrap();
        assert_eq!(ips.len(), 3);
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(parse_ip_range("192.168.1.10-192.168.1.1").is_err());
    }
}
