//! Declarative tunnel topology
//!
//! The manager never talks to sockets itself; it declares listeners,
//! handlers and the relay chain, and hands the whole picture to the
//! tunnel-transport library to realize.

use crate::config::{NatMode, WorkerConfig};

/// Name of the single relay chain every topology declares
pub const RELAY_CHAIN: &str = "relay-chain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Protocol auto-detecting listener for proxy clients
    Auto,
    /// Reverse-TCP listener reached through the relay
    ReverseTcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Auto,
    ReverseTcp,
}

/// Where a service accepts connections
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSpec {
    pub kind: ListenerKind,
    pub bind_host: String,
    /// Zero asks the transport for an ephemeral port
    pub bind_port: u16,
    /// Chain the listener dials through to become reachable
    pub chain: Option<String>,
}

/// What a service does with accepted connections
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerSpec {
    pub kind: HandlerKind,
    pub chain: Option<String>,
}

/// One declared tunnel endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub listener: ListenerSpec,
    pub handler: HandlerSpec,
    /// Forward target for reverse-TCP services
    pub forward_to: Option<String>,
}

/// Relay node carrying the tunnel credentials
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub name: String,
    pub addr: String,
    pub username: String,
    pub password: String,
    pub tunnel_id: String,
    /// ws towards the relay when TLS is disabled, wss otherwise
    pub dialer: String,
    pub tls_secure: bool,
    pub tls_server_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HopSpec {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainSpec {
    pub name: String,
    pub hops: Vec<HopSpec>,
}

/// Everything the tunnel-transport library needs to realize a session
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub services: Vec<ServiceSpec>,
    pub chains: Vec<ChainSpec>,
}

impl Topology {
    /// Services whose listener rides the relay chain
    pub fn chained_listeners(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services
            .iter()
            .filter(|service| service.listener.chain.is_some())
    }
}

/// Build the session topology for a validated configuration.
///
/// Static mode declares three endpoints (public auto listener, local auto
/// listener, reverse-TCP listener); dynamic mode drops the public one. The
/// relay chain is attached only to the reverse-TCP listener: that is the
/// one leg that must cross the relay to reach this node from outside. The
/// auto handler talks to the public internet directly and the reverse-TCP
/// handler talks to the local auto service directly, so any chain
/// assignment that lands on a handler is cleared before realization.
pub fn build_topology(config: &WorkerConfig) -> Topology {
    let local_target = format!("127.0.0.1:{}", config.local_port);

    let mut services = Vec::new();

    if config.nat_type == NatMode::Static {
        services.push(ServiceSpec {
            name: "public-auto".to_string(),
            listener: ListenerSpec {
                kind: ListenerKind::Auto,
                bind_host: "0.0.0.0".to_string(),
                bind_port: config.fixed_port,
                chain: None,
            },
            handler: HandlerSpec {
                kind: HandlerKind::Auto,
                chain: Some(RELAY_CHAIN.to_string()),
            },
            forward_to: None,
        });
    }

    services.push(ServiceSpec {
        name: "local-auto".to_string(),
        listener: ListenerSpec {
            kind: ListenerKind::Auto,
            bind_host: "127.0.0.1".to_string(),
            bind_port: config.local_port,
            chain: None,
        },
        handler: HandlerSpec {
            kind: HandlerKind::Auto,
            chain: Some(RELAY_CHAIN.to_string()),
        },
        forward_to: None,
    });

    services.push(ServiceSpec {
        name: "reverse-tunnel".to_string(),
        listener: ListenerSpec {
            kind: ListenerKind::ReverseTcp,
            bind_host: "0.0.0.0".to_string(),
            bind_port: 0,
            chain: Some(RELAY_CHAIN.to_string()),
        },
        handler: HandlerSpec {
            kind: HandlerKind::ReverseTcp,
            chain: Some(RELAY_CHAIN.to_string()),
        },
        forward_to: Some(local_target),
    });

    let chain = ChainSpec {
        name: RELAY_CHAIN.to_string(),
        hops: vec![HopSpec {
            name: "relay-hop".to_string(),
            nodes: vec![NodeSpec {
                name: "relay".to_string(),
                addr: format!("{}:{}", config.proxy_server_ip, config.proxy_server_port),
                username: config.sn.clone(),
                password: config.token.clone(),
                tunnel_id: config.tunnel_id.clone(),
                dialer: if config.disable_tls { "ws" } else { "wss" }.to_string(),
                tls_secure: config.tls_secure,
                tls_server_name: if config.server_name.is_empty() {
                    config.proxy_server_ip.clone()
                } else {
                    config.server_name.clone()
                },
            }],
        }],
    };

    let mut topology = Topology {
        services,
        chains: vec![chain],
    };
    enforce_chain_assignment(&mut topology);
    topology
}

/// Clear chain assignments that must not route through the relay. Only the
/// reverse-TCP listener keeps its chain.
fn enforce_chain_assignment(topology: &mut Topology) {
    for service in &mut topology.services {
        if service.handler.chain.take().is_some() {
            tracing::debug!(
                service = %service.name,
                "cleared handler chain; handlers connect directly"
            );
        }
        if service.listener.kind != ListenerKind::ReverseTcp {
            service.listener.chain = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nat_type: NatMode) -> WorkerConfig {
        WorkerConfig {
            sn: "SN-1".to_string(),
            token: "tok".to_string(),
            tunnel_id: "tun-1".to_string(),
            proxy_server_ip: "203.0.113.10".to_string(),
            proxy_server_port: 8443,
            local_port: 10800,
            nat_type,
            fixed_port: 24443,
            disable_tls: false,
            tls_secure: false,
            server_name: String::new(),
        }
    }

    #[test]
    fn static_mode_declares_three_endpoints() {
        let topology = build_topology(&config(NatMode::Static));
        assert_eq!(topology.services.len(), 3);

        let names: Vec<_> = topology
            .services
            .iter()
            .map(|service| service.name.as_str())
            .collect();
        assert_eq!(names, ["public-auto", "local-auto", "reverse-tunnel"]);
    }

    #[test]
    fn dynamic_mode_declares_two_endpoints() {
        let topology = build_topology(&config(NatMode::Dynamic));
        assert_eq!(topology.services.len(), 2);
        assert_eq!(topology.services[0].name, "local-auto");
        assert_eq!(topology.services[1].name, "reverse-tunnel");
    }

    #[test]
    fn only_the_reverse_listener_rides_the_chain() {
        for mode in [NatMode::Static, NatMode::Dynamic] {
            let topology = build_topology(&config(mode));

            for service in &topology.services {
                // Handlers never route through the relay
                assert!(service.handler.chain.is_none(), "{}", service.name);
                if service.listener.kind == ListenerKind::ReverseTcp {
                    assert_eq!(service.listener.chain.as_deref(), Some(RELAY_CHAIN));
                } else {
                    assert!(service.listener.chain.is_none(), "{}", service.name);
                }
            }

            assert_eq!(topology.chained_listeners().count(), 1);
        }
    }

    #[test]
    fn reverse_tunnel_forwards_to_the_local_service() {
        let topology = build_topology(&config(NatMode::Dynamic));
        let reverse = topology
            .services
            .iter()
            .find(|service| service.listener.kind == ListenerKind::ReverseTcp)
            .unwrap();
        assert_eq!(reverse.forward_to.as_deref(), Some("127.0.0.1:10800"));
        // Ephemeral port towards the relay
        assert_eq!(reverse.listener.bind_port, 0);
    }

    #[test]
    fn relay_node_carries_credentials_and_dialer() {
        let mut cfg = config(NatMode::Dynamic);
        cfg.disable_tls = true;
        let topology = build_topology(&cfg);

        let node = &topology.chains[0].hops[0].nodes[0];
        assert_eq!(node.addr, "203.0.113.10:8443");
        assert_eq!(node.username, "SN-1");
        assert_eq!(node.password, "tok");
        assert_eq!(node.tunnel_id, "tun-1");
        assert_eq!(node.dialer, "ws");
        // Server name falls back to the relay address
        assert_eq!(node.tls_server_name, "203.0.113.10");
    }
}
