//! Shared test fixtures: a scriptable stub upstream resolver and a fully
//! wired server instance backed by an in-memory store.
#![allow(dead_code)]
#![allow(clippy::field_reassign_with_default)]

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;

use mimir::aggregate::AggregateExecutor;
use mimir::cache::{CacheEntry, MemoryCache, SqlCacheStore, TieredCache};
use mimir::config::ServerConfig;
use mimir::custom::CustomRblStore;
use mimir::db::Database;
use mimir::dns::enums::{DNSResourceType, ResponseCode};
use mimir::dns::{DNSPacket, DNSResource};
use mimir::forwarder::Forwarder;
use mimir::rbl::{AggregateZone, RblServer};
use mimir::resolver::{RblResolver, UpstreamClient};
use mimir::server::DnsServer;
use mimir::zone::ZoneRegistry;

/// How the stub upstream answers a given query name.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// A record after an optional delay
    Listed {
        addr: Ipv4Addr,
        ttl: u32,
        delay: Duration,
    },
    /// NXDOMAIN
    NotListed,
    /// NOERROR with no answers
    NoData,
    /// SERVFAIL
    ServFail,
    /// Never answer
    Silent,
    /// TXT record for TXT questions
    Txt { text: String },
}

/// Stub upstream DNS server on an ephemeral localhost port. Each datagram
/// is answered on its own task so scripted delays overlap.
pub struct StubUpstream {
    pub addr: SocketAddr,
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl StubUpstream {
    pub async fn start(rules: HashMap<String, StubBehavior>) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let counts: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let rules = Arc::new(rules);

        {
            let socket = socket.clone();
            let counts = counts.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let Ok((read, src)) = socket.recv_from(&mut buf).await else {
                        break;
                    };
                    let Ok(query) = DNSPacket::parse(&buf[..read]) else {
                        continue;
                    };
                    let Some(question) = query.first_question() else {
                        continue;
                    };

                    let qname = question.qname();
                    let qtype = question.qtype;
                    *counts.lock().unwrap().entry(qname.clone()).or_insert(0) += 1;

                    let behavior = rules.get(&qname).cloned().unwrap_or(StubBehavior::NotListed);
                    let socket = socket.clone();
                    tokio::spawn(async move {
                        let mut response = DNSPacket::response_to(&query);
                        response.header.ra = true;

                        match behavior {
                            StubBehavior::Listed { addr, ttl, delay } => {
                                if !delay.is_zero() {
                                    tokio::time::sleep(delay).await;
                                }
                                if qtype == DNSResourceType::A {
                                    response.answers.push(DNSResource::new_a(&qname, addr, ttl));
                                }
                            }
                            StubBehavior::NotListed => {
                                response.header.rcode = ResponseCode::NameError.to_u8();
                            }
                            StubBehavior::NoData => {}
                            StubBehavior::ServFail => {
                                response.header.rcode = ResponseCode::ServerFailure.to_u8();
                            }
                            StubBehavior::Silent => return,
                            StubBehavior::Txt { text } => {
                                if qtype == DNSResourceType::TXT {
                                    response.answers.push(DNSResource::new_txt(&qname, &text, 300));
                                }
                            }
                        }

                        response.update_counts();
                        let bytes = response.serialize().unwrap();
                        let _ = socket.send_to(&bytes, src).await;
                    });
                }
            });
        }

        Self { addr, counts }
    }

    /// How many times a name has been queried, across all record types.
    pub fn hits(&self, qname: &str) -> usize {
        *self.counts.lock().unwrap().get(qname).unwrap_or(&0)
    }
}

pub struct Harness {
    pub server: Arc<DnsServer>,
    pub cache: Arc<TieredCache>,
    pub custom: CustomRblStore,
    pub resolver: Arc<RblResolver>,
    pub stub: StubUpstream,
}

pub fn rbl(host: &str) -> RblServer {
    RblServer {
        name: host.to_string(),
        host: host.to_string(),
        description: String::new(),
    }
}

/// One-rule convenience map.
pub fn rbl_rules(qname: &str, behavior: StubBehavior) -> HashMap<String, StubBehavior> {
    let mut rules = HashMap::new();
    rules.insert(qname.to_string(), behavior);
    rules
}

/// Wire up a complete server against a scripted stub upstream and an
/// in-memory durable store.
pub async fn build_harness(
    rules: HashMap<String, StubBehavior>,
    rbl_hosts: &[&str],
    aggregate: Option<(&str, &[&str])>,
    custom_zone: Option<&str>,
) -> Harness {
    build_harness_on(
        rules,
        rbl_hosts,
        aggregate,
        custom_zone,
        "127.0.0.1:0".parse().unwrap(),
    )
    .await
}

/// As `build_harness`, with an explicit listener address for transport
/// tests.
pub async fn build_harness_on(
    rules: HashMap<String, StubBehavior>,
    rbl_hosts: &[&str],
    aggregate: Option<(&str, &[&str])>,
    custom_zone: Option<&str>,
    bind_addr: SocketAddr,
) -> Harness {
    let stub = StubUpstream::start(rules).await;

    let mut config = ServerConfig::default();
    config.bind_addr = bind_addr;
    config.upstream_resolver = stub.addr;
    config.upstream_timeout = Duration::from_secs(1);
    config.aggregate_timeout = Duration::from_millis(250);
    config.database_path = ":memory:".to_string();

    let rbls: Vec<RblServer> = rbl_hosts.iter().map(|h| rbl(h)).collect();
    let aggregates = match aggregate {
        Some((domain, hosts)) => vec![Arc::new(AggregateZone {
            domain: domain.to_string(),
            description: None,
            rbls: hosts.iter().map(|h| rbl(h)).collect(),
        })],
        None => Vec::new(),
    };

    let db = Database::connect(&config.database_path, config.database_pool_max)
        .await
        .unwrap();
    let custom = CustomRblStore::new(db.pool().clone());
    if let Some(zone) = custom_zone {
        custom.set_config(zone, None, true).await.unwrap();
    }

    let registry = Arc::new(ZoneRegistry::new(
        rbls,
        aggregates,
        custom_zone.map(|z| z.to_string()),
    ));

    let l1: Arc<dyn mimir::cache::CacheTier> = Arc::new(MemoryCache::new(1024));
    let cache = Arc::new(TieredCache::new(
        Some(l1),
        SqlCacheStore::new(db.pool().clone()),
    ));

    let client = Arc::new(UpstreamClient::new(
        config.upstream_resolver,
        config.upstream_timeout,
    ));
    let resolver = Arc::new(RblResolver::new(client.clone(), cache.clone()));
    let aggregate_executor = AggregateExecutor::new(resolver.clone(), config.aggregate_timeout);
    let forwarder = Forwarder::new(client);

    let server = Arc::new(DnsServer::new(
        config,
        registry,
        resolver.clone(),
        aggregate_executor,
        custom.clone(),
        forwarder,
    ));

    Harness {
        server,
        cache,
        custom,
        resolver,
        stub,
    }
}

/// Run one query through the full decode/dispatch/encode pipeline.
pub async fn ask(server: &DnsServer, qname: &str, qtype: DNSResourceType) -> DNSPacket {
    let query = DNSPacket::new_query(0x4242, qname, qtype);
    let bytes = server
        .handle_query(&query.serialize().unwrap())
        .await
        .expect("query should produce a response");
    DNSPacket::parse(&bytes).unwrap()
}

/// Wait for a fire-and-forget cache write to land.
pub async fn wait_for_cache_entry(
    cache: &TieredCache,
    ip: &str,
    rbl_host: &str,
) -> Option<CacheEntry> {
    let addr = ip.parse().unwrap();
    for _ in 0..50 {
        if let Some(entry) = cache.get(&addr, rbl_host).await {
            return Some(entry);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}
