//! Upstream DNS exchange and single-RBL classification.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::cache::{Listing, TieredCache};
use crate::constants::{DEFAULT_LISTED_TTL, ERROR_TTL, NOT_LISTED_TTL};
use crate::dns::enums::{DNSResourceType, ResponseCode};
use crate::dns::DNSPacket;
use crate::error::{LookupErrorKind, MimirError, Result};
use crate::ip;
use crate::rbl::RblServer;

/// Raw query/response exchange with one upstream resolver: UDP first, TCP
/// fallback on truncation, the whole exchange under one deadline.
pub struct UpstreamClient {
    upstream: SocketAddr,
    timeout: Duration,
    query_id: AtomicU16,
}

impl UpstreamClient {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self {
            upstream,
            timeout,
            query_id: AtomicU16::new(1),
        }
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    pub fn next_id(&self) -> u16 {
        self.query_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a query and wait for the parsed reply.
    pub async fn exchange(&self, query: &DNSPacket) -> Result<DNSPacket> {
        let query_bytes = query.serialize()?;

        let exchange = async {
            let response = self.send_udp_query(&query_bytes).await?;
            if response.header.tc {
                debug!("UDP response truncated, retrying over TCP");
                self.send_tcp_query(&query_bytes).await
            } else {
                Ok(response)
            }
        };

        let response = timeout(self.timeout, exchange)
            .await
            .map_err(|_| MimirError::Timeout)??;

        if response.header.id != query.header.id {
            return Err(MimirError::Upstream(format!(
                "Response id {} does not match query id {}",
                response.header.id, query.header.id
            )));
        }

        Ok(response)
    }

    async fn send_udp_query(&self, query_bytes: &[u8]) -> Result<DNSPacket> {
        let bind_addr: SocketAddr = if self.upstream.is_ipv4() {
            "0.0.0.0:0".parse().expect("wildcard v4 address")
        } else {
            "[::]:0".parse().expect("wildcard v6 address")
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.upstream).await?;
        socket.send(query_bytes).await?;

        let mut response_buf = vec![0u8; 4096];
        let response_len = socket.recv(&mut response_buf).await?;

        trace!(
            "Raw UDP response from {} ({} bytes)",
            self.upstream, response_len
        );

        DNSPacket::parse(&response_buf[..response_len]).map_err(|e| {
            debug!("Failed to parse UDP response from {}: {:?}", self.upstream, e);
            MimirError::Packet(e)
        })
    }

    async fn send_tcp_query(&self, query_bytes: &[u8]) -> Result<DNSPacket> {
        let mut stream = TcpStream::connect(self.upstream).await?;

        let query_length = query_bytes.len() as u16;
        stream.write_all(&query_length.to_be_bytes()).await?;
        stream.write_all(query_bytes).await?;
        stream.flush().await?;

        let mut length_buf = [0u8; 2];
        stream.read_exact(&mut length_buf).await?;
        let response_length = u16::from_be_bytes(length_buf) as usize;

        let mut response_buf = vec![0; response_length];
        stream.read_exact(&mut response_buf).await?;

        trace!(
            "Raw TCP response from {} ({} bytes)",
            self.upstream, response_length
        );

        DNSPacket::parse(&response_buf).map_err(|e| {
            debug!("Failed to parse TCP response from {}: {:?}", self.upstream, e);
            MimirError::Packet(e)
        })
    }
}

/// One classified RBL lookup.
#[derive(Debug, Clone)]
pub struct RblLookupResult {
    pub rbl: RblServer,
    pub listing: Listing,
    pub response: Option<IpAddr>,
    pub error: Option<LookupErrorKind>,
    pub ttl: u32,
    pub response_time: Duration,
    pub from_cache: bool,
}

impl RblLookupResult {
    pub fn is_listed(&self) -> bool {
        self.listing == Listing::Listed
    }
}

/// Single-RBL resolver: composes the reversed query name, classifies the
/// upstream answer, and keeps the tiered cache warm. The cache and upstream
/// are explicit dependencies.
pub struct RblResolver {
    client: Arc<UpstreamClient>,
    cache: Arc<TieredCache>,
}

impl RblResolver {
    pub fn new(client: Arc<UpstreamClient>, cache: Arc<TieredCache>) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    /// Cache-aware lookup. Hits answer immediately; misses query upstream
    /// and schedule an unawaited cache write.
    pub async fn lookup(&self, addr: &IpAddr, rbl: &RblServer) -> RblLookupResult {
        let now = chrono::Utc::now().timestamp();
        if let Some(entry) = self.cache.get(addr, &rbl.host).await {
            trace!("Cache hit for {} on {}", addr, rbl.host);
            return RblLookupResult {
                rbl: rbl.clone(),
                listing: entry.listing,
                response: entry.response,
                error: entry.error,
                ttl: entry.remaining_ttl(now).max(1),
                response_time: Duration::ZERO,
                from_cache: true,
            };
        }

        let result = self.lookup_uncached(addr, rbl).await;

        // Fire-and-forget: a slow durable store must not delay the answer.
        let cache = self.cache.clone();
        let addr = *addr;
        let host = rbl.host.clone();
        let (listing, response, error, ttl) =
            (result.listing, result.response, result.error, result.ttl);
        tokio::spawn(async move {
            if let Err(e) = cache.put(&addr, &host, listing, response, error, ttl).await {
                warn!("Cache write for {}@{} failed: {}", addr, host, e);
            }
        });

        result
    }

    /// Uncached lookup: steps 1-4 of the single-RBL contract.
    pub async fn lookup_uncached(&self, addr: &IpAddr, rbl: &RblServer) -> RblLookupResult {
        let qname = format!("{}.{}", ip::reverse_ip(addr), rbl.host);
        let query = DNSPacket::new_query(self.client.next_id(), &qname, DNSResourceType::A);
        let start = Instant::now();

        let (listing, response, error, ttl) = match self.client.exchange(&query).await {
            Ok(reply) => Self::classify(&reply),
            Err(MimirError::Timeout) => {
                debug!("Upstream lookup of {} timed out", qname);
                (Listing::Error, None, Some(LookupErrorKind::Timeout), ERROR_TTL)
            }
            Err(e) => {
                debug!("Upstream lookup of {} failed: {}", qname, e);
                (Listing::Error, None, Some(LookupErrorKind::Network), ERROR_TTL)
            }
        };

        RblLookupResult {
            rbl: rbl.clone(),
            listing,
            response,
            error,
            ttl,
            response_time: start.elapsed(),
            from_cache: false,
        }
    }

    /// Classify an upstream answer per DNSBL semantics.
    fn classify(reply: &DNSPacket) -> (Listing, Option<IpAddr>, Option<LookupErrorKind>, u32) {
        match ResponseCode::from_u8(reply.header.rcode) {
            ResponseCode::NoError => {
                let a_records: Vec<_> = reply
                    .answers
                    .iter()
                    .filter_map(|r| r.a_addr())
                    .collect();

                if a_records.is_empty() {
                    // NOERROR with no data: the IP is not listed.
                    (Listing::NotListed, None, None, NOT_LISTED_TTL)
                } else {
                    let max_ttl = reply
                        .answers
                        .iter()
                        .filter(|r| r.rtype == DNSResourceType::A)
                        .map(|r| r.ttl)
                        .max()
                        .unwrap_or(0);
                    // A zero TTL means the upstream reported none.
                    let ttl = if max_ttl == 0 { DEFAULT_LISTED_TTL } else { max_ttl };
                    (
                        Listing::Listed,
                        Some(IpAddr::V4(a_records[0])),
                        None,
                        ttl,
                    )
                }
            }
            ResponseCode::NameError => (Listing::NotListed, None, None, NOT_LISTED_TTL),
            _ => (
                Listing::Error,
                None,
                Some(LookupErrorKind::UpstreamServfail),
                ERROR_TTL,
            ),
        }
    }

    /// Relay a TXT question for a single-RBL name: the upstream TXT answer
    /// carries the listing reason. Not classified, not cached.
    pub async fn relay_txt(&self, addr: &IpAddr, rbl: &RblServer) -> Result<DNSPacket> {
        let qname = format!("{}.{}", ip::reverse_ip(addr), rbl.host);
        let query = DNSPacket::new_query(self.client.next_id(), &qname, DNSResourceType::TXT);
        self.client.exchange(&query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::DNSResource;
    use crate::dns::enums::ResponseCode;

    fn reply_with(rcode: ResponseCode, answers: Vec<DNSResource>) -> DNSPacket {
        let query = DNSPacket::new_query(1, "2.0.0.127.bl.example.org", DNSResourceType::A);
        let mut reply = DNSPacket::response_to(&query);
        reply.header.rcode = rcode.to_u8();
        reply.answers = answers;
        reply.update_counts();
        reply
    }

    #[test]
    fn test_classify_listed() {
        let reply = reply_with(
            ResponseCode::NoError,
            vec![DNSResource::new_a(
                "2.0.0.127.bl.example.org",
                "127.0.0.2".parse().unwrap(),
                900,
            )],
        );
        let (listing, response, error, ttl) = RblResolver::classify(&reply);
        assert_eq!(listing, Listing::Listed);
        assert_eq!(response, Some("127.0.0.2".parse().unwrap()));
        assert_eq!(error, None);
        assert_eq!(ttl, 900);
    }

    #[test]
    fn test_classify_listed_without_ttl_defaults() {
        let reply = reply_with(
            ResponseCode::NoError,
            vec![DNSResource::new_a(
                "2.0.0.127.bl.example.org",
                "127.0.0.4".parse().unwrap(),
                0,
            )],
        );
        let (_, _, _, ttl) = RblResolver::classify(&reply);
        assert_eq!(ttl, DEFAULT_LISTED_TTL);
    }

    #[test]
    fn test_classify_nxdomain_not_listed() {
        let reply = reply_with(ResponseCode::NameError, Vec::new());
        let (listing, response, error, ttl) = RblResolver::classify(&reply);
        assert_eq!(listing, Listing::NotListed);
        assert_eq!(response, None);
        assert_eq!(error, None);
        assert_eq!(ttl, NOT_LISTED_TTL);
    }

    #[test]
    fn test_classify_no_data_not_listed() {
        let reply = reply_with(ResponseCode::NoError, Vec::new());
        let (listing, _, _, _) = RblResolver::classify(&reply);
        assert_eq!(listing, Listing::NotListed);
    }

    #[test]
    fn test_classify_servfail_is_error() {
        let reply = reply_with(ResponseCode::ServerFailure, Vec::new());
        let (listing, _, error, ttl) = RblResolver::classify(&reply);
        assert_eq!(listing, Listing::Error);
        assert_eq!(error, Some(LookupErrorKind::UpstreamServfail));
        assert_eq!(ttl, ERROR_TTL);
    }
}
