//! STUN-based NAT classification
//!
//! The STUN wire protocol lives in an external library; this module drives
//! it (method preference order, ranked server list, per-attempt tallying)
//! and votes on the final label. The scan is best-effort: individual server
//! failures only count as inconclusive attempts.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

/// Ranked default STUN servers, tried in order
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun.voipgate.com:3478",
    "stun.l.google.com:19302",
    "stun.cloudflare.com:3478",
    "stun.miwifi.com:3478",
];

/// Address used only to learn the default-route local IP; no packet is sent
const OUTBOUND_PROBE_ADDR: &str = "8.8.8.8:80";

/// RFC method variants in preference order
pub const METHOD_PREFERENCE: [StunMethod; 3] = [
    StunMethod::Rfc5780,
    StunMethod::Rfc5389,
    StunMethod::Rfc3489,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StunMethod {
    Rfc5780,
    Rfc5389,
    Rfc3489,
}

impl fmt::Display for StunMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StunMethod::Rfc5780 => write!(f, "RFC5780"),
            StunMethod::Rfc5389 => write!(f, "RFC5389"),
            StunMethod::Rfc3489 => write!(f, "RFC3489"),
        }
    }
}

/// Which address families to test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    #[default]
    V4,
    V6,
    Both,
}

/// Mapping or filtering behavior observed by the STUN sub-tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    EndpointIndependent,
    AddressDependent,
    AddressAndPortDependent,
    Inconclusive,
}

/// Result of one (method, server) run of the external STUN library
#[derive(Debug, Clone, Copy)]
pub struct NatBehavior {
    pub mapping: Behavior,
    pub filtering: Behavior,
}

#[derive(Debug, Error)]
#[error("stun test failed: {0}")]
pub struct StunError(pub String);

/// External STUN library boundary: runs the mapping/filtering sub-tests of
/// one RFC method against one server.
#[async_trait]
pub trait StunBehaviorTest: Send + Sync {
    async fn mapping_and_filtering(
        &self,
        server: &str,
        method: StunMethod,
    ) -> Result<NatBehavior, StunError>;
}

/// External geo/IP lookup boundary reporting this node's public IP
#[async_trait]
pub trait ExternalIpSource: Send + Sync {
    async fn external_ip(&self) -> Result<IpAddr, StunError>;
}

/// Final classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatType {
    OpenPublic,
    FullCone,
    RestrictedCone,
    PortRestrictedCone,
    Symmetric,
    Inconclusive,
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatType::OpenPublic => write!(f, "OpenPublic"),
            NatType::FullCone => write!(f, "FullCone"),
            NatType::RestrictedCone => write!(f, "RestrictedCone"),
            NatType::PortRestrictedCone => write!(f, "PortRestrictedCone"),
            NatType::Symmetric => write!(f, "Symmetric"),
            NatType::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// Derive the classification label from observed behaviors
pub fn classify_behavior(behavior: &NatBehavior) -> NatType {
    match (behavior.mapping, behavior.filtering) {
        (Behavior::EndpointIndependent, Behavior::EndpointIndependent) => NatType::FullCone,
        (Behavior::EndpointIndependent, Behavior::AddressDependent) => NatType::RestrictedCone,
        (Behavior::EndpointIndependent, Behavior::AddressAndPortDependent) => {
            NatType::PortRestrictedCone
        }
        (Behavior::AddressDependent | Behavior::AddressAndPortDependent, _) => NatType::Symmetric,
        _ => NatType::Inconclusive,
    }
}

/// Drives NAT classification across methods and servers
pub struct NatClassifier {
    stun: Arc<dyn StunBehaviorTest>,
    external_ip: Arc<dyn ExternalIpSource>,
    servers: Vec<String>,
    ip_version: IpVersion,
}

impl NatClassifier {
    pub fn new(stun: Arc<dyn StunBehaviorTest>, external_ip: Arc<dyn ExternalIpSource>) -> Self {
        Self {
            stun,
            external_ip,
            servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            ip_version: IpVersion::default(),
        }
    }

    /// Override the ranked server list
    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers = servers;
        self
    }

    pub fn with_ip_version(mut self, ip_version: IpVersion) -> Self {
        self.ip_version = ip_version;
        self
    }

    /// Determine the NAT type.
    ///
    /// Fast path: a machine whose outbound local IP equals its externally
    /// observed IP sits directly on the internet. Otherwise every (method,
    /// server) attempt contributes one label and the majority wins, ties
    /// broken by whichever label reached the maximum first.
    pub async fn classify(&self) -> NatType {
        if self.is_open_internet().await {
            return NatType::OpenPublic;
        }

        let servers = self.servers_for_version();
        let mut tally: Vec<(NatType, u32)> = Vec::new();

        for method in METHOD_PREFERENCE {
            for server in &servers {
                let label = match self.stun.mapping_and_filtering(server, method).await {
                    Ok(behavior) => classify_behavior(&behavior),
                    Err(err) => {
                        debug!(%server, %method, error = %err, "stun attempt failed");
                        NatType::Inconclusive
                    }
                };
                debug!(%server, %method, %label, "nat attempt classified");

                match tally.iter_mut().find(|(seen, _)| *seen == label) {
                    Some((_, count)) => *count += 1,
                    None => tally.push((label, 1)),
                }
            }
        }

        let mut winner = NatType::Inconclusive;
        let mut max_count = 0;
        for (label, count) in tally {
            if count > max_count {
                max_count = count;
                winner = label;
            }
        }

        info!(nat_type = %winner, "nat classification complete");
        winner
    }

    async fn is_open_internet(&self) -> bool {
        let Some(local) = outbound_local_ip() else {
            return false;
        };
        match self.external_ip.external_ip().await {
            Ok(external) => open_internet_fast_path(local, external),
            Err(err) => {
                debug!(error = %err, "external ip lookup failed");
                false
            }
        }
    }

    fn servers_for_version(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|server| match self.ip_version {
                IpVersion::V4 => !server.contains('['),
                IpVersion::V6 => server.contains('['),
                IpVersion::Both => true,
            })
            .cloned()
            .collect()
    }
}

/// An outbound local IP matching the externally observed IP means no NAT
pub fn open_internet_fast_path(local: IpAddr, external: IpAddr) -> bool {
    local == external
}

/// Local IP the default route would use, learned via a connected UDP
/// socket without sending anything
pub fn outbound_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(OUTBOUND_PROBE_ADDR).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct ScriptedStun {
        outcomes: Mutex<Vec<Result<NatBehavior, StunError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedStun {
        fn new(outcomes: Vec<Result<NatBehavior, StunError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StunBehaviorTest for ScriptedStun {
        async fn mapping_and_filtering(
            &self,
            _server: &str,
            _method: StunMethod,
        ) -> Result<NatBehavior, StunError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().await;
            if outcomes.is_empty() {
                Err(StunError("script exhausted".to_string()))
            } else {
                outcomes.remove(0)
            }
        }
    }

    struct NoExternalIp;

    #[async_trait]
    impl ExternalIpSource for NoExternalIp {
        async fn external_ip(&self) -> Result<IpAddr, StunError> {
            Err(StunError("lookup unavailable".to_string()))
        }
    }

    fn behavior(mapping: Behavior, filtering: Behavior) -> Result<NatBehavior, StunError> {
        Ok(NatBehavior { mapping, filtering })
    }

    fn classifier(stun: ScriptedStun, servers: &[&str]) -> NatClassifier {
        NatClassifier::new(Arc::new(stun), Arc::new(NoExternalIp))
            .with_servers(servers.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn behavior_pairs_map_to_classic_labels() {
        use Behavior::*;

        assert_eq!(
            classify_behavior(&NatBehavior {
                mapping: EndpointIndependent,
                filtering: EndpointIndependent
            }),
            NatType::FullCone
        );
        assert_eq!(
            classify_behavior(&NatBehavior {
                mapping: EndpointIndependent,
                filtering: AddressDependent
            }),
            NatType::RestrictedCone
        );
        assert_eq!(
            classify_behavior(&NatBehavior {
                mapping: EndpointIndependent,
                filtering: AddressAndPortDependent
            }),
            NatType::PortRestrictedCone
        );
        assert_eq!(
            classify_behavior(&NatBehavior {
                mapping: AddressAndPortDependent,
                filtering: EndpointIndependent
            }),
            NatType::Symmetric
        );
        assert_eq!(
            classify_behavior(&NatBehavior {
                mapping: Inconclusive,
                filtering: EndpointIndependent
            }),
            NatType::Inconclusive
        );
    }

    #[test]
    fn fast_path_requires_equal_addresses() {
        let a: IpAddr = "203.0.113.7".parse().unwrap();
        let b: IpAddr = "198.51.100.1".parse().unwrap();
        assert!(open_internet_fast_path(a, a));
        assert!(!open_internet_fast_path(a, b));
    }

    #[tokio::test]
    async fn majority_label_wins() {
        use Behavior::*;

        // One server, three methods: symmetric twice, full cone once
        let stun = ScriptedStun::new(vec![
            behavior(AddressDependent, EndpointIndependent),
            behavior(EndpointIndependent, EndpointIndependent),
            behavior(AddressAndPortDependent, EndpointIndependent),
        ]);
        let classifier = classifier(stun, &["stun.example.com:3478"]);

        assert_eq!(classifier.classify().await, NatType::Symmetric);
    }

    #[tokio::test]
    async fn ties_break_to_the_first_seen_label() {
        use Behavior::*;

        // Full cone and symmetric tie 1-1 with a third distinct label;
        // full cone reached its count first
        let stun = ScriptedStun::new(vec![
            behavior(EndpointIndependent, EndpointIndependent),
            behavior(AddressDependent, EndpointIndependent),
            behavior(EndpointIndependent, AddressDependent),
        ]);
        let classifier = classifier(stun, &["stun.example.com:3478"]);

        assert_eq!(classifier.classify().await, NatType::FullCone);
    }

    #[tokio::test]
    async fn server_failures_count_as_inconclusive_and_do_not_abort() {
        use Behavior::*;

        // Two servers x three methods = six attempts; four errors, two
        // real observations that agree
        let stun = ScriptedStun::new(vec![
            Err(StunError("unreachable".to_string())),
            behavior(EndpointIndependent, AddressAndPortDependent),
            Err(StunError("unreachable".to_string())),
            Err(StunError("unreachable".to_string())),
            behavior(EndpointIndependent, AddressAndPortDependent),
            Err(StunError("unreachable".to_string())),
        ]);
        let classifier = classifier(
            stun,
            &["stun-a.example.com:3478", "stun-b.example.com:3478"],
        );

        // 4 inconclusive vs 2 port-restricted: majority is inconclusive,
        // which is exactly what a mostly-failed scan should report
        assert_eq!(classifier.classify().await, NatType::Inconclusive);
    }

    #[tokio::test]
    async fn every_method_and_server_pair_is_attempted() {
        let stun = Arc::new(ScriptedStun::new(Vec::new()));
        let classifier = NatClassifier::new(
            Arc::clone(&stun) as Arc<dyn StunBehaviorTest>,
            Arc::new(NoExternalIp),
        )
        .with_servers(vec![
            "stun-a.example.com:3478".to_string(),
            "stun-b.example.com:3478".to_string(),
        ]);

        classifier.classify().await;

        // 3 methods x 2 servers
        assert_eq!(stun.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn ipv6_servers_are_excluded_for_v4_scans() {
        let stun = ScriptedStun::new(Vec::new());
        let calls = Arc::new(stun);
        let classifier = NatClassifier::new(Arc::clone(&calls) as Arc<dyn StunBehaviorTest>, Arc::new(NoExternalIp))
            .with_servers(vec![
                "stun.example.com:3478".to_string(),
                "[2001:db8::1]:3478".to_string(),
            ])
            .with_ip_version(IpVersion::V4);

        classifier.classify().await;

        // 3 methods x 1 v4 server
        assert_eq!(calls.calls.load(Ordering::SeqCst), 3);
    }
}
