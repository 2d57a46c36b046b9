//! Query-name classification: which handler owns a given qname.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use crate::ip;
use crate::rbl::{AggregateZone, RblServer};

/// What a query name resolves to. Aggregate and custom zones take precedence
/// over single RBLs, and all owned zones take precedence over forwarding.
#[derive(Debug, Clone)]
pub enum QueryClassification {
    /// Reverse-octet lookup under one configured RBL
    SingleRbl { rbl: RblServer, addr: IpAddr },
    /// Fan-out lookup under an aggregate zone
    Aggregate {
        zone: Arc<AggregateZone>,
        addr: IpAddr,
    },
    /// Containment check against the custom block-list
    Custom { addr: IpAddr },
    /// Not ours; pass to the upstream resolver
    Forward,
}

/// Immutable after construction; classification is a linear suffix scan.
pub struct ZoneRegistry {
    rbls: Vec<RblServer>,
    aggregates: Vec<Arc<AggregateZone>>,
    custom_zone: Option<String>,
}

impl ZoneRegistry {
    pub fn new(
        rbls: Vec<RblServer>,
        aggregates: Vec<Arc<AggregateZone>>,
        custom_zone: Option<String>,
    ) -> Self {
        let mut rbls = rbls;
        // Longest suffix first so the most specific RBL zone wins.
        rbls.sort_by(|a, b| b.host.len().cmp(&a.host.len()));

        Self {
            rbls,
            aggregates,
            custom_zone: custom_zone.map(|z| z.trim_end_matches('.').to_lowercase()),
        }
    }

    pub fn rbls(&self) -> &[RblServer] {
        &self.rbls
    }

    pub fn aggregates(&self) -> &[Arc<AggregateZone>] {
        &self.aggregates
    }

    pub fn custom_zone(&self) -> Option<&str> {
        self.custom_zone.as_deref()
    }

    fn suffix_matches(qname: &str, zone: &str) -> bool {
        qname.len() > zone.len() + 1
            && qname.ends_with(zone)
            && qname.as_bytes()[qname.len() - zone.len() - 1] == b'.'
    }

    /// Classify a lowercase query name. A name under an owned zone whose
    /// prefix is not a well-formed reversed IP is treated as not ours.
    pub fn classify(&self, qname: &str) -> QueryClassification {
        // Aggregate and custom zones first, most specific suffix winning.
        let mut owned: Option<(usize, QueryClassification)> = None;

        for zone in &self.aggregates {
            if Self::suffix_matches(qname, &zone.domain)
                && owned.as_ref().is_none_or(|(len, _)| zone.domain.len() > *len)
                && let Some(addr) = ip::parse_reverse(qname, &zone.domain)
            {
                owned = Some((
                    zone.domain.len(),
                    QueryClassification::Aggregate {
                        zone: zone.clone(),
                        addr,
                    },
                ));
            }
        }

        if let Some(custom) = &self.custom_zone
            && Self::suffix_matches(qname, custom)
            && owned.as_ref().is_none_or(|(len, _)| custom.len() > *len)
            && let Some(addr) = ip::parse_reverse(qname, custom)
        {
            owned = Some((custom.len(), QueryClassification::Custom { addr }));
        }

        if let Some((_, classification)) = owned {
            return classification;
        }

        // Single RBLs are pre-sorted longest suffix first.
        for rbl in &self.rbls {
            if Self::suffix_matches(qname, &rbl.host) {
                if let Some(addr) = ip::parse_reverse(qname, &rbl.host) {
                    return QueryClassification::SingleRbl {
                        rbl: rbl.clone(),
                        addr,
                    };
                }
                debug!("Query {} under RBL zone {} has no reversed IP prefix", qname, rbl.host);
            }
        }

        QueryClassification::Forward
    }
}
