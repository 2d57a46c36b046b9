//! UDP and TCP DNS front-end: decode, classify, dispatch, encode.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::aggregate::AggregateExecutor;
use crate::cache::Listing;
use crate::config::ServerConfig;
use crate::constants::{
    AGGREGATE_TTL, AGGREGATE_TXT_LIST_CAP, CUSTOM_TTL, LISTED_SENTINEL, MAX_UDP_RESPONSE_SIZE,
};
use crate::custom::CustomRblStore;
use crate::dns::enums::{DNSResourceType, ResponseCode};
use crate::dns::{DNSPacket, DNSResource};
use crate::error::{MimirError, Result};
use crate::forwarder::Forwarder;
use crate::rbl::{AggregateZone, RblServer};
use crate::resolver::RblResolver;
use crate::zone::{QueryClassification, ZoneRegistry};

/// The request pipeline with its collaborators passed in explicitly.
pub struct DnsServer {
    config: ServerConfig,
    registry: Arc<ZoneRegistry>,
    resolver: Arc<RblResolver>,
    aggregate: AggregateExecutor,
    custom: CustomRblStore,
    forwarder: Forwarder,
}

impl DnsServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<ZoneRegistry>,
        resolver: Arc<RblResolver>,
        aggregate: AggregateExecutor,
        custom: CustomRblStore,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            config,
            registry,
            resolver,
            aggregate,
            custom,
            forwarder,
        }
    }

    /// Run both listeners until shutdown is signalled.
    pub async fn run(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Result<()> {
        let udp = tokio::spawn(run_udp_server(self.clone(), shutdown_tx.subscribe()));
        let tcp = tokio::spawn(run_tcp_server(self.clone(), shutdown_tx.subscribe()));

        let (udp_result, tcp_result) = tokio::join!(udp, tcp);
        udp_result.map_err(|e| MimirError::Upstream(format!("UDP listener task: {}", e)))??;
        tcp_result.map_err(|e| MimirError::Upstream(format!("TCP listener task: {}", e)))??;
        Ok(())
    }

    /// Handle one wire-format request. Returns None for input that cannot be
    /// parsed at all - the only case where no response is sent.
    pub async fn handle_query(&self, buf: &[u8]) -> Option<Vec<u8>> {
        let packet = match DNSPacket::parse(buf) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping malformed packet: {:?} ({} bytes)", e, buf.len());
                return None;
            }
        };

        if !packet.is_query() {
            debug!("Dropping DNS response received as query");
            return None;
        }

        let response = match self.dispatch(&packet).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Query handling failed: {}", e);
                DNSPacket::rcode_response(&packet, ResponseCode::ServerFailure)
            }
        };

        match response.serialize() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Failed to serialize response: {:?}", e);
                DNSPacket::rcode_response(&packet, ResponseCode::ServerFailure)
                    .serialize()
                    .ok()
            }
        }
    }

    async fn dispatch(&self, packet: &DNSPacket) -> Result<DNSPacket> {
        let Some(question) = packet.first_question() else {
            return Ok(DNSPacket::rcode_response(packet, ResponseCode::FormatError));
        };

        if packet.header.opcode != 0 {
            return Ok(DNSPacket::rcode_response(packet, ResponseCode::NotImplemented));
        }

        let qname = question.qname();
        let qtype = question.qtype;

        match self.registry.classify(&qname) {
            QueryClassification::SingleRbl { rbl, addr } => {
                debug!("Query {} ({:?}): single RBL {}", qname, qtype, rbl.host);
                self.answer_single(packet, &qname, qtype, &addr, &rbl).await
            }
            QueryClassification::Aggregate { zone, addr } => {
                debug!("Query {} ({:?}): aggregate zone {}", qname, qtype, zone.domain);
                self.answer_aggregate(packet, &qname, qtype, addr, &zone).await
            }
            QueryClassification::Custom { addr } => {
                debug!("Query {} ({:?}): custom RBL", qname, qtype);
                self.answer_custom(packet, &qname, qtype, &addr).await
            }
            QueryClassification::Forward => {
                debug!("Query {} ({:?}): forwarding upstream", qname, qtype);
                self.forwarder.forward(packet).await
            }
        }
    }

    async fn answer_single(
        &self,
        packet: &DNSPacket,
        qname: &str,
        qtype: DNSResourceType,
        addr: &IpAddr,
        rbl: &RblServer,
    ) -> Result<DNSPacket> {
        match qtype {
            DNSResourceType::A | DNSResourceType::ANY => {
                let result = self.resolver.lookup(addr, rbl).await;
                match result.listing {
                    Listing::Listed => {
                        let mut response = DNSPacket::authoritative_response(packet);
                        if let Some(IpAddr::V4(listed_addr)) = result.response {
                            response
                                .answers
                                .push(DNSResource::new_a(qname, listed_addr, result.ttl));
                        }
                        response.update_counts();
                        Ok(response)
                    }
                    Listing::NotListed => {
                        Ok(DNSPacket::rcode_response(packet, ResponseCode::NameError))
                    }
                    Listing::Error => {
                        Ok(DNSPacket::rcode_response(packet, ResponseCode::ServerFailure))
                    }
                }
            }
            DNSResourceType::TXT => {
                // Reason text lives upstream; relay the TXT question.
                let reply = self.resolver.relay_txt(addr, rbl).await?;
                let mut response = DNSPacket::authoritative_response(packet);
                response.header.rcode = reply.header.rcode;
                response.answers = reply.answers;
                response.update_counts();
                Ok(response)
            }
            // AAAA (and anything else) under an RBL zone is authoritative
            // no-data.
            _ => Ok(DNSPacket::authoritative_response(packet)),
        }
    }

    async fn answer_aggregate(
        &self,
        packet: &DNSPacket,
        qname: &str,
        qtype: DNSResourceType,
        addr: IpAddr,
        zone: &Arc<AggregateZone>,
    ) -> Result<DNSPacket> {
        match qtype {
            DNSResourceType::A | DNSResourceType::TXT | DNSResourceType::ANY => {}
            _ => return Ok(DNSPacket::authoritative_response(packet)),
        }

        let outcome = self.aggregate.check(addr, zone).await;
        info!(
            "Aggregate {} for {}: {}/{} complete, {} listed in {}ms",
            zone.domain,
            addr,
            outcome.completed(),
            outcome.total,
            outcome.listed_count(),
            outcome.elapsed.as_millis()
        );

        if outcome.listed_count() == 0 {
            return Ok(DNSPacket::rcode_response(packet, ResponseCode::NameError));
        }

        let mut response = DNSPacket::authoritative_response(packet);
        match qtype {
            DNSResourceType::TXT => {
                response
                    .answers
                    .push(DNSResource::new_txt(qname, &outcome.summary(), AGGREGATE_TTL));

                let listed = outcome.listed();
                for result in listed.iter().take(AGGREGATE_TXT_LIST_CAP) {
                    response.answers.push(DNSResource::new_txt(
                        qname,
                        &format!("{}: LISTED", result.rbl.name),
                        AGGREGATE_TTL,
                    ));
                }
                if listed.len() > AGGREGATE_TXT_LIST_CAP {
                    response.answers.push(DNSResource::new_txt(
                        qname,
                        &format!(
                            "... and {} more ({}/{} shown)",
                            listed.len() - AGGREGATE_TXT_LIST_CAP,
                            AGGREGATE_TXT_LIST_CAP,
                            listed.len()
                        ),
                        AGGREGATE_TTL,
                    ));
                }
            }
            _ => {
                response
                    .answers
                    .push(DNSResource::new_a(qname, LISTED_SENTINEL, AGGREGATE_TTL));
            }
        }
        response.update_counts();
        Ok(response)
    }

    async fn answer_custom(
        &self,
        packet: &DNSPacket,
        qname: &str,
        qtype: DNSResourceType,
        addr: &IpAddr,
    ) -> Result<DNSPacket> {
        match qtype {
            DNSResourceType::A | DNSResourceType::TXT | DNSResourceType::ANY => {}
            _ => return Ok(DNSPacket::authoritative_response(packet)),
        }

        let check = self.custom.check(addr).await?;
        if !check.listed {
            return Ok(DNSPacket::rcode_response(packet, ResponseCode::NameError));
        }

        let mut response = DNSPacket::authoritative_response(packet);
        match qtype {
            DNSResourceType::TXT => {
                let reason = check
                    .reason
                    .as_deref()
                    .unwrap_or("Listed in custom blocklist");
                response
                    .answers
                    .push(DNSResource::new_txt(qname, reason, CUSTOM_TTL));
            }
            _ => {
                response
                    .answers
                    .push(DNSResource::new_a(qname, LISTED_SENTINEL, CUSTOM_TTL));
            }
        }
        response.update_counts();
        Ok(response)
    }
}

/// Run the UDP listener until shutdown. Each datagram is handled on its own
/// task; oversized responses are truncated with TC=1.
pub async fn run_udp_server(
    server: Arc<DnsServer>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let sock = Arc::new(UdpSocket::bind(server.config.bind_addr).await?);
    info!("UDP DNS server listening on {}", server.config.bind_addr);

    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP server received shutdown signal");
                break;
            }

            result = sock.recv_from(&mut buf) => {
                let (read_bytes, src_addr) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("UDP receive error: {}", e);
                        continue;
                    }
                };

                let query_data = buf[..read_bytes].to_vec();
                let server = server.clone();
                let sock = sock.clone();

                tokio::spawn(async move {
                    let Some(mut response_data) = server.handle_query(&query_data).await else {
                        return;
                    };

                    if response_data.len() > MAX_UDP_RESPONSE_SIZE
                        && let Ok(query) = DNSPacket::parse(&query_data)
                    {
                        debug!(
                            "Response too large for UDP ({} bytes), sending truncated response",
                            response_data.len()
                        );
                        match DNSPacket::truncated_response(&query).serialize() {
                            Ok(truncated) => response_data = truncated,
                            Err(e) => error!("Failed to serialize truncated response: {:?}", e),
                        }
                    }

                    if let Err(e) = sock.send_to(&response_data, src_addr).await {
                        error!("Failed to send UDP response to {}: {}", src_addr, e);
                    }
                });
            }
        }
    }

    Ok(())
}

/// Run the TCP listener until shutdown. Each connection is handled on its
/// own task with 2-byte length framing.
pub async fn run_tcp_server(
    server: Arc<DnsServer>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(server.config.bind_addr).await?;
    info!("TCP DNS server listening on {}", server.config.bind_addr);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("TCP server received shutdown signal");
                break;
            }

            result = listener.accept() => {
                let (stream, src_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("TCP accept error: {}", e);
                        continue;
                    }
                };

                let server = server.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_tcp_connection(stream, server).await {
                        debug!("TCP connection error from {}: {}", src_addr, e);
                    }
                });
            }
        }
    }

    Ok(())
}

async fn handle_tcp_connection(mut stream: TcpStream, server: Arc<DnsServer>) -> Result<()> {
    let mut length_buf = [0u8; 2];

    loop {
        match stream.read_exact(&mut length_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Client closed the connection.
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let message_length = u16::from_be_bytes(length_buf) as usize;
        let mut message_buf = vec![0u8; message_length];
        stream.read_exact(&mut message_buf).await?;

        let Some(response_data) = server.handle_query(&message_buf).await else {
            // Unparseable over TCP: drop the connection.
            break;
        };

        let response_length = response_data.len() as u16;
        stream.write_all(&response_length.to_be_bytes()).await?;
        stream.write_all(&response_data).await?;
        stream.flush().await?;
    }

    Ok(())
}
