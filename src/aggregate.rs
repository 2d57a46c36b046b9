//! Deadline-bounded fan-out over an aggregate zone's RBL set.
//!
//! Each RBL check runs as a detached task reporting over a channel; the
//! collector drains results until everything completed or the deadline
//! fired. Abandoned stragglers keep running and still populate the cache.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use crate::rbl::AggregateZone;
use crate::resolver::{RblLookupResult, RblResolver};

/// Snapshot of the fan-out at the moment the answer was assembled.
#[derive(Debug)]
pub struct AggregateOutcome {
    /// Lookups that completed before the deadline
    pub results: Vec<RblLookupResult>,
    /// RBLs queried in total
    pub total: usize,
    /// Wall-clock time spent collecting
    pub elapsed: Duration,
}

impl AggregateOutcome {
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    /// Completed lookups that reported the IP as listed.
    pub fn listed(&self) -> Vec<&RblLookupResult> {
        self.results.iter().filter(|r| r.is_listed()).collect()
    }

    pub fn listed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_listed()).count()
    }

    /// Summary line for the aggregate TXT answer.
    pub fn summary(&self) -> String {
        format!(
            "Listed on {}/{} RBLs ({}/{} checked in {}ms)",
            self.listed_count(),
            self.completed(),
            self.completed(),
            self.total,
            self.elapsed.as_millis()
        )
    }
}

pub struct AggregateExecutor {
    resolver: Arc<RblResolver>,
    deadline: Duration,
}

impl AggregateExecutor {
    pub fn new(resolver: Arc<RblResolver>, deadline: Duration) -> Self {
        Self { resolver, deadline }
    }

    /// Check one IP against every RBL of `zone`, returning whatever
    /// completed within the deadline.
    pub async fn check(&self, addr: IpAddr, zone: &AggregateZone) -> AggregateOutcome {
        let total = zone.rbls.len();
        let start = Instant::now();

        let (tx, mut rx) = mpsc::channel::<RblLookupResult>(total.max(1));
        for rbl in zone.rbls.iter().cloned() {
            let resolver = self.resolver.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = resolver.lookup(&addr, &rbl).await;
                // The collector may already have given up on us.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        while results.len() < total {
            tokio::select! {
                _ = &mut deadline => {
                    debug!(
                        "Aggregate deadline hit for {} on {}: {}/{} complete",
                        addr,
                        zone.domain,
                        results.len(),
                        total
                    );
                    break;
                }
                received = rx.recv() => match received {
                    Some(result) => results.push(result),
                    None => break,
                },
            }
        }

        AggregateOutcome {
            results,
            total,
            elapsed: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Listing;
    use crate::error::LookupErrorKind;
    use crate::rbl::RblServer;

    fn result(host: &str, listing: Listing) -> RblLookupResult {
        RblLookupResult {
            rbl: RblServer {
                name: host.to_string(),
                host: host.to_string(),
                description: String::new(),
            },
            listing,
            response: match listing {
                Listing::Listed => Some("127.0.0.2".parse().unwrap()),
                _ => None,
            },
            error: match listing {
                Listing::Error => Some(LookupErrorKind::Timeout),
                _ => None,
            },
            ttl: 300,
            response_time: Duration::from_millis(10),
            from_cache: false,
        }
    }

    #[test]
    fn test_summary_counts() {
        let outcome = AggregateOutcome {
            results: vec![
                result("a.example.org", Listing::Listed),
                result("b.example.org", Listing::Listed),
            ],
            total: 3,
            elapsed: Duration::from_millis(42),
        };

        assert_eq!(outcome.listed_count(), 2);
        assert_eq!(outcome.completed(), 2);
        assert_eq!(outcome.summary(), "Listed on 2/2 RBLs (2/3 checked in 42ms)");
    }

    #[test]
    fn test_errors_are_not_listed() {
        let outcome = AggregateOutcome {
            results: vec![
                result("a.example.org", Listing::Error),
                result("b.example.org", Listing::NotListed),
            ],
            total: 2,
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(outcome.listed_count(), 0);
        assert_eq!(outcome.completed(), 2);
    }
}
