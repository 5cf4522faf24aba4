//! Iterative resolution: delegation walk, CNAME chasing, single-hop
//! queries, and the read-through / write-through cache policy.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_recursion::async_recursion;
use dns_wire::rdata::{a_to_ip_string, aaaa_to_ip_string, name_rdata, soa_negative_ttl};
use dns_wire::serialise::build_query;
use dns_wire::types::{
    DomainName, Message, ResourceRecord, CLASS_IN, TYPE_A, TYPE_AAAA, TYPE_CNAME, TYPE_NS,
    TYPE_SOA,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use crate::cache::{CacheKey, NegativeEntry, PositiveEntry, SharedCache};
use crate::daemon_client::{DaemonClient, Lookup};
use crate::transport::{send_dot_bytes, send_tcp_bytes, send_udp_bytes};

/// Default negative-cache TTL used when a negative reply carries no usable
/// SOA (absent, malformed, or the connection used no EDNS at all), and when
/// the delegation walk runs out of nameservers to try before ever getting a
/// reply to classify.
pub const DEFAULT_NEGATIVE_TTL_SECS: u32 = 60;

/// Maximum CNAME indirections followed before giving up.
pub const MAX_CNAME_HOPS: usize = 10;

/// Hard ceiling on iterations of the delegation walk, independent of
/// `MAX_CNAME_HOPS`; bounds pathological nameserver configurations that
/// keep referring without ever answering or looping through a single name.
pub const SAFETY_BUDGET: usize = 64;

const RCODE_NXDOMAIN: u8 = 3;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug)]
pub enum ResolutionError {
    NoRootServers,
    Timeout,
    TooManyCnameHops,
    SafetyBudgetExhausted,
    DotRequiresSni,
    Transport,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::NoRootServers => write!(f, "no root/starting nameservers configured"),
            ResolutionError::Timeout => write!(f, "resolution timed out"),
            ResolutionError::TooManyCnameHops => write!(f, "too many CNAME indirections"),
            ResolutionError::SafetyBudgetExhausted => write!(f, "safety iteration budget exhausted"),
            ResolutionError::DotRequiresSni => write!(f, "DNS-over-TLS requires an SNI hostname"),
            ResolutionError::Transport => write!(f, "transport failure"),
        }
    }
}

impl std::error::Error for ResolutionError {}

#[derive(Debug, Clone)]
pub enum ResolveResult {
    Ok {
        records: Vec<ResourceRecord>,
        wire: bytes::Bytes,
    },
    Nxdomain {
        ttl: u32,
    },
    Nodata {
        ttl: u32,
    },
}

/// Which transport a query should use.
#[derive(Debug, Clone)]
pub enum QueryMode {
    Dns,
    Dot { sni: String, insecure: bool },
}

/// Classification of a single reply against the question it answers, used
/// to decide what the delegation walk should do next.
#[derive(Debug)]
enum Decision {
    FinalOk(Vec<ResourceRecord>),
    FinalNxdomain { ttl: u32 },
    FinalNodata { ttl: u32 },
    Cname(DomainName),
    Referral(Vec<(DomainName, Vec<IpAddr>)>),
    Retry,
}

pub struct Engine {
    pub cache: Option<SharedCache>,
    /// Handle to the side-car cache daemon, if configured. Consulted ahead
    /// of the local cache on read, and written through to after the local
    /// cache on write, so several resolver processes converge on one
    /// shared view of what is cached.
    pub daemon: Option<Arc<AsyncMutex<DaemonClient>>>,
    pub use_edns: bool,
    pub timeout: Duration,
    pub trace: bool,
    /// Port used when turning a referral's glue address into a server to
    /// query. Always 53 in production; overridable so scenario tests can
    /// point referrals at stub servers on ephemeral ports.
    pub ns_port: u16,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            cache: None,
            daemon: None,
            use_edns: true,
            timeout: DEFAULT_QUERY_TIMEOUT,
            trace: false,
            ns_port: 53,
        }
    }
}

impl Engine {
    /// Sends a single query to `server` and returns the parsed reply,
    /// without any delegation logic. Upgrades to TCP automatically when the
    /// UDP reply is truncated.
    pub async fn single_query_to(
        &self,
        server: SocketAddr,
        name: &DomainName,
        qtype: u16,
        mode: &QueryMode,
    ) -> Result<Message, ResolutionError> {
        let query = build_query(name, qtype, self.use_edns).map_err(|_| ResolutionError::Transport)?;

        let raw = match mode {
            QueryMode::Dns => {
                let udp_reply = send_udp_bytes(server, &query, self.timeout).await;
                if udp_reply.is_empty() {
                    return Err(ResolutionError::Transport);
                }
                match Message::from_octets(&udp_reply) {
                    Ok(msg) if msg.header.is_truncated() => {
                        send_tcp_bytes(server, &query, self.timeout).await
                    }
                    _ => udp_reply,
                }
            }
            QueryMode::Dot { sni, insecure } => {
                if sni.is_empty() {
                    return Err(ResolutionError::DotRequiresSni);
                }
                send_dot_bytes(server, sni, &query, *insecure, self.timeout).await
            }
        };

        if raw.is_empty() {
            return Err(ResolutionError::Transport);
        }
        Message::from_octets(&raw).map_err(|_| ResolutionError::Transport)
    }

    /// Resolves `name`/`qtype` starting from `roots`, walking delegations
    /// and chasing CNAMEs until a terminal answer, reading and writing
    /// through `self.daemon` (if reachable) and `self.cache` at every step.
    pub async fn resolve(
        &self,
        roots: &[SocketAddr],
        name: &DomainName,
        qtype: u16,
        mode: &QueryMode,
    ) -> Result<ResolveResult, ResolutionError> {
        if roots.is_empty() {
            return Err(ResolutionError::NoRootServers);
        }

        let now = Instant::now();
        let key = CacheKey::new(name.clone(), qtype, CLASS_IN);

        if let Some(daemon) = &self.daemon {
            let mut client = daemon.lock().await;
            match client.get(name, qtype).await {
                Ok(Lookup::Positive { ttl, rdata }) => {
                    trace!(%name, qtype, "daemon hit (positive)");
                    let records = rdata
                        .into_iter()
                        .map(|rd| ResourceRecord {
                            name: name.clone(),
                            rtype: qtype,
                            rclass: CLASS_IN,
                            ttl,
                            rdata: bytes::Bytes::from(rd),
                            rdata_offset: 0,
                        })
                        .collect();
                    return Ok(ResolveResult::Ok {
                        records,
                        wire: bytes::Bytes::new(),
                    });
                }
                Ok(Lookup::Negative { ttl, rcode }) => {
                    trace!(%name, qtype, "daemon hit (negative)");
                    return Ok(if rcode == RCODE_NXDOMAIN {
                        ResolveResult::Nxdomain { ttl }
                    } else {
                        ResolveResult::Nodata { ttl }
                    });
                }
                Ok(Lookup::NotFound) | Err(_) => {
                    // Not cached there, or the daemon is unreachable right
                    // now: fall through to the local cache.
                }
            }
        }

        if let Some(cache) = &self.cache {
            if let Some((entry, _ttl)) = cache.get_positive(&key, now).await {
                trace!(%name, qtype, "cache hit (positive)");
                return Ok(ResolveResult::Ok {
                    records: entry.records,
                    wire: entry.wire,
                });
            }
            if let Some((entry, ttl)) = cache.get_negative(&key, now).await {
                trace!(%name, qtype, "cache hit (negative)");
                return Ok(if entry.is_nxdomain {
                    ResolveResult::Nxdomain { ttl }
                } else {
                    ResolveResult::Nodata { ttl }
                });
            }
        }

        let result = self.resolve_recursive(roots, name.clone(), qtype, mode, 0).await?;

        if let Some(cache) = &self.cache {
            match &result {
                ResolveResult::Ok { records, wire } => {
                    let ttl = records.iter().map(|r| r.ttl).min().unwrap_or(0);
                    cache
                        .put_positive(
                            key.clone(),
                            PositiveEntry {
                                records: records.clone(),
                                wire: wire.clone(),
                            },
                            Duration::from_secs(u64::from(ttl)),
                            now,
                        )
                        .await;
                }
                ResolveResult::Nxdomain { ttl } | ResolveResult::Nodata { ttl } => {
                    cache
                        .put_negative(
                            key.clone(),
                            NegativeEntry {
                                is_nxdomain: matches!(result, ResolveResult::Nxdomain { .. }),
                            },
                            Duration::from_secs(u64::from(*ttl)),
                            now,
                        )
                        .await;
                }
            }
        }

        if let Some(daemon) = &self.daemon {
            let mut client = daemon.lock().await;
            match &result {
                ResolveResult::Ok { records, .. } => {
                    let ttl = records.iter().map(|r| r.ttl).min().unwrap_or(0);
                    let rdata: Vec<Vec<u8>> = records.iter().map(|r| r.rdata.to_vec()).collect();
                    let _ = client.put_positive(name, qtype, ttl, &rdata).await;
                }
                ResolveResult::Nxdomain { ttl } => {
                    let _ = client.put_negative(name, qtype, *ttl, RCODE_NXDOMAIN).await;
                }
                ResolveResult::Nodata { ttl } => {
                    let _ = client.put_negative(name, qtype, *ttl, 0).await;
                }
            }
        }

        Ok(result)
    }

    #[async_recursion]
    async fn resolve_recursive(
        &self,
        roots: &[SocketAddr],
        mut name: DomainName,
        qtype: u16,
        mode: &QueryMode,
        cname_hops: usize,
    ) -> Result<ResolveResult, ResolutionError> {
        // ns_queue is a LIFO stack: the delegation walk always tries the
        // most recently learned (or listed) nameserver address first.
        let mut ns_queue: Vec<SocketAddr> = roots.to_vec();
        let mut tried_ns: HashSet<SocketAddr> = HashSet::new();
        let mut safety = 0usize;
        let mut hops = cname_hops;

        loop {
            safety += 1;
            if safety > SAFETY_BUDGET {
                return Err(ResolutionError::SafetyBudgetExhausted);
            }

            let Some(server) = ns_queue.pop() else {
                return Ok(ResolveResult::Nodata {
                    ttl: DEFAULT_NEGATIVE_TTL_SECS,
                });
            };
            if !tried_ns.insert(server) {
                continue;
            }

            debug!(%name, qtype, %server, "querying");
            if self.trace {
                eprintln!(";; querying {server} for {name} {qtype}");
            }
            let reply = match self.single_query_to(server, &name, qtype, mode).await {
                Ok(msg) => msg,
                Err(_) => continue,
            };

            match classify(&reply, &name, qtype) {
                Decision::FinalOk(records) => {
                    return Ok(ResolveResult::Ok {
                        records,
                        wire: reply.wire,
                    })
                }
                Decision::FinalNxdomain { ttl } => return Ok(ResolveResult::Nxdomain { ttl }),
                Decision::FinalNodata { ttl } => return Ok(ResolveResult::Nodata { ttl }),
                Decision::Cname(target) => {
                    hops += 1;
                    if hops > MAX_CNAME_HOPS {
                        return Err(ResolutionError::TooManyCnameHops);
                    }
                    name = target;
                    // Restart the walk from the server that just answered,
                    // not from the original roots.
                    ns_queue = vec![server];
                    tried_ns.clear();
                }
                Decision::Referral(delegations) => {
                    tried_ns.clear();
                    for (ns_name, glue) in delegations {
                        if glue.is_empty() {
                            if let Ok(ResolveResult::Ok { records, .. }) = self
                                .resolve_recursive(roots, ns_name.clone(), TYPE_A, mode, hops)
                                .await
                            {
                                for rr in records {
                                    if let Some(ip) = a_to_ip_string(&rr).and_then(|s| s.parse().ok())
                                    {
                                        ns_queue.push(SocketAddr::new(ip, self.ns_port));
                                    }
                                }
                            }
                            if let Ok(ResolveResult::Ok { records, .. }) = self
                                .resolve_recursive(roots, ns_name.clone(), TYPE_AAAA, mode, hops)
                                .await
                            {
                                for rr in records {
                                    if let Some(ip) =
                                        aaaa_to_ip_string(&rr).and_then(|s| s.parse().ok())
                                    {
                                        ns_queue.push(SocketAddr::new(ip, self.ns_port));
                                    }
                                }
                            }
                        } else {
                            for ip in glue {
                                ns_queue.push(SocketAddr::new(ip, self.ns_port));
                            }
                        }
                    }
                }
                Decision::Retry => continue,
            }
        }
    }
}

/// Classifies a reply against the question that produced it.
fn classify(msg: &Message, name: &DomainName, qtype: u16) -> Decision {
    if msg.header.rcode() == RCODE_NXDOMAIN {
        return Decision::FinalNxdomain {
            ttl: negative_ttl_of(msg),
        };
    }
    if msg.header.rcode() != 0 {
        return Decision::Retry;
    }

    let direct: Vec<ResourceRecord> = msg
        .answers
        .iter()
        .filter(|rr| rr.name == *name && rr.rtype == qtype && rr.rclass == CLASS_IN)
        .cloned()
        .collect();
    if !direct.is_empty() {
        return Decision::FinalOk(direct);
    }

    if qtype != TYPE_CNAME {
        if let Some(cname_rr) = msg
            .answers
            .iter()
            .find(|rr| rr.name == *name && rr.rtype == TYPE_CNAME)
        {
            if let Ok(target) = name_rdata(msg, cname_rr) {
                return Decision::Cname(target);
            }
        }
    }

    // NODATA is signalled by an SOA in the authority section, not by the
    // AA bit: a referral can be non-authoritative yet still carry an SOA,
    // and an authoritative empty answer with no SOA at all is not NODATA.
    if msg.authority.iter().any(|rr| rr.rtype == TYPE_SOA) {
        return Decision::FinalNodata {
            ttl: negative_ttl_of(msg),
        };
    }

    let delegations = collect_referral(msg);
    if !delegations.is_empty() {
        return Decision::Referral(delegations);
    }

    Decision::Retry
}

/// Pulls NS names from the authority section, paired with any matching
/// glue (A/AAAA) addresses found in the additional section, preserving
/// the order they were listed so the LIFO `ns_queue` tries the
/// last-listed address first.
fn collect_referral(msg: &Message) -> Vec<(DomainName, Vec<IpAddr>)> {
    let mut out = Vec::new();
    for rr in &msg.authority {
        if rr.rtype != TYPE_NS {
            continue;
        }
        let Ok(ns_name) = name_rdata(msg, rr) else {
            continue;
        };
        let glue: Vec<IpAddr> = msg
            .additional
            .iter()
            .filter(|a| a.name == ns_name)
            .filter_map(|a| match a.rtype {
                TYPE_A => a_to_ip_string(a).and_then(|s| s.parse().ok()),
                TYPE_AAAA => aaaa_to_ip_string(a).and_then(|s| s.parse().ok()),
                _ => None,
            })
            .collect();
        out.push((ns_name, glue));
    }
    out
}

/// Extracts the SOA-derived negative TTL for a reply that carries one, or
/// `DEFAULT_NEGATIVE_TTL_SECS` if it does not.
pub fn negative_ttl_of(msg: &Message) -> u32 {
    msg.authority
        .iter()
        .find(|rr| rr.rtype == TYPE_SOA)
        .map_or(DEFAULT_NEGATIVE_TTL_SECS, |rr| soa_negative_ttl(msg, rr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_wire::types::Header;

    fn msg(rcode: u8, aa: bool, authority: Vec<ResourceRecord>) -> Message {
        let flags = u16::from(rcode) | if aa { 0b0000_0100_0000_0000 } else { 0 };
        Message {
            header: Header {
                id: 1,
                flags,
                qdcount: 1,
                ancount: 0,
                nscount: authority.len() as u16,
                arcount: 0,
            },
            questions: Vec::new(),
            answers: Vec::new(),
            authority,
            additional: Vec::new(),
            wire: bytes::Bytes::new(),
        }
    }

    fn soa_rr() -> ResourceRecord {
        // rdata contents don't matter for these tests; only its rtype is
        // inspected by classify's SOA-presence check. soa_negative_ttl
        // falls back to DEFAULT_NEGATIVE_TTL_SECS on malformed rdata.
        ResourceRecord {
            name: DomainName::new("example.com"),
            rtype: TYPE_SOA,
            rclass: CLASS_IN,
            ttl: 3600,
            rdata: bytes::Bytes::new(),
            rdata_offset: 0,
        }
    }

    fn ns_rr() -> ResourceRecord {
        ResourceRecord {
            name: DomainName::new("example.com"),
            rtype: TYPE_NS,
            rclass: CLASS_IN,
            ttl: 3600,
            rdata: bytes::Bytes::new(),
            rdata_offset: 0,
        }
    }

    #[test]
    fn nxdomain_rcode_classifies_as_final_nxdomain() {
        let reply = msg(3, false, Vec::new());
        let name = DomainName::new("example.com");
        assert!(matches!(
            classify(&reply, &name, TYPE_A),
            Decision::FinalNxdomain { .. }
        ));
    }

    #[test]
    fn soa_in_authority_classifies_as_nodata_regardless_of_the_aa_bit() {
        let reply = msg(0, false, vec![soa_rr()]);
        let name = DomainName::new("example.com");
        assert!(matches!(
            classify(&reply, &name, TYPE_A),
            Decision::FinalNodata { .. }
        ));
    }

    #[test]
    fn authoritative_empty_answer_without_soa_is_not_nodata() {
        // Authoritative but no SOA and no referral: the AA bit alone must
        // not be read as NODATA.
        let reply = msg(0, true, Vec::new());
        let name = DomainName::new("example.com");
        assert!(matches!(classify(&reply, &name, TYPE_A), Decision::Retry));
    }

    #[test]
    fn referral_with_no_soa_is_a_referral_even_when_not_authoritative() {
        let reply = msg(0, false, vec![ns_rr()]);
        let name = DomainName::new("example.com");
        assert!(matches!(
            classify(&reply, &name, TYPE_A),
            Decision::Referral(_)
        ));
    }

    #[test]
    fn empty_answer_with_no_soa_and_no_referral_falls_back_to_retry() {
        let reply = msg(0, false, Vec::new());
        let name = DomainName::new("example.com");
        assert!(matches!(classify(&reply, &name, TYPE_A), Decision::Retry));
    }

    #[test]
    fn server_failure_rcode_is_a_retry() {
        let reply = msg(2, false, Vec::new());
        let name = DomainName::new("example.com");
        assert!(matches!(classify(&reply, &name, TYPE_A), Decision::Retry));
    }
}
