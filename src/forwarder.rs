//! Pass-through for queries mimir is not authoritative for.

use std::sync::Arc;

use tracing::debug;

use crate::dns::enums::DNSResourceType;
use crate::dns::DNSPacket;
use crate::error::Result;
use crate::resolver::UpstreamClient;

/// Forwards a client's question to the configured upstream resolver and
/// copies the reply sections back.
pub struct Forwarder {
    client: Arc<UpstreamClient>,
}

impl Forwarder {
    pub fn new(client: Arc<UpstreamClient>) -> Self {
        Self { client }
    }

    /// Forward `query` upstream. The response keeps the client's id and
    /// question; answer, authority and additional sections plus the rcode
    /// are taken from the upstream reply.
    pub async fn forward(&self, query: &DNSPacket) -> Result<DNSPacket> {
        let Some(question) = query.first_question() else {
            // Nothing to forward; an empty NOERROR is the best we can do.
            return Ok(DNSPacket::response_to(query));
        };

        let upstream_query = DNSPacket::new_query(
            self.client.next_id(),
            &question.qname(),
            question.qtype,
        );
        let reply = self.client.exchange(&upstream_query).await?;

        debug!(
            "Forwarded {} ({:?}): rcode={} answers={}",
            question.qname(),
            question.qtype,
            reply.header.rcode,
            reply.answers.len()
        );

        let mut response = DNSPacket::response_to(query);
        response.header.rcode = reply.header.rcode;
        response.header.ra = reply.header.ra;
        response.header.aa = reply.header.aa;
        response.answers = reply.answers;
        response.authorities = reply.authorities;
        // OPT pseudo-records negotiate per-hop EDNS state and must not be
        // replayed to the client.
        response.resources = reply
            .resources
            .into_iter()
            .filter(|r| r.rtype != DNSResourceType::OPT)
            .collect();
        response.update_counts();
        Ok(response)
    }
}
