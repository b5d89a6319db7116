// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Connectias

//! Loopback listeners of instrumentation servers (frida-server, IDA debug server).

use super::{bounded, ProbeContext};
use crate::signal::{names, Observation, ProbeError, ProbeFamily, RawSignal, SignalCategory, Strength};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Connect, then close straight away. Refused, unreachable and timed out all
/// count as closed.
async fn probe_port(port: u16, bound: Duration) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match timeout(bound, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(_)) => false,
        Err(_) => false,
    }
}

/// Probes every port concurrently and returns the ones that accepted, in the
/// order they were given.
pub async fn scan_loopback(ports: &[u16], bound: Duration) -> Vec<u16> {
    let tasks: Vec<_> = ports
        .iter()
        .map(|&port| (port, tokio::spawn(probe_port(port, bound))))
        .collect();

    let mut open = Vec::new();
    for (port, task) in tasks {
        if let Ok(true) = task.await {
            open.push(port);
        }
    }
    open
}

pub fn loopback_ports(ctx: &ProbeContext<'_>) -> Result<Observation, ProbeError> {
    let ports = ctx.config.instrumentation_ports.clone();
    let bound = ctx.config.port_timeout;
    let open = bounded::block_on(async move { scan_loopback(&ports, bound).await })?;

    let mut observation = Observation::new();
    for port in &open {
        observation.push(
            RawSignal::flag(
                names::INSTRUMENTATION_PORT_OPEN,
                SignalCategory::Instrumentation,
                ProbeFamily::LoopbackPorts,
                Strength::Weak,
            )
            .with_evidence([format!("127.0.0.1:{}", port)]),
        );
    }
    if !open.is_empty() {
        observation.fact("openPorts", open);
    }
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Capabilities, EngineConfig, Environment, HostFacts};
    use std::net::TcpListener;

    /// A port nothing listens on: bind, read the number, release it.
    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    }

    #[test]
    fn listening_port_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let open_port = listener.local_addr().expect("addr").port();
        let config = EngineConfig {
            instrumentation_ports: vec![closed_port(), open_port],
            port_timeout: Duration::from_millis(500),
            ..EngineConfig::default()
        };
        let capabilities = Capabilities::new(Environment::Linux);
        let host = HostFacts::default();
        let ctx = ProbeContext {
            config: &config,
            capabilities: &capabilities,
            host: &host,
        };

        let observation = loopback_ports(&ctx).expect("probe");
        assert_eq!(observation.signals().len(), 1);
        assert_eq!(
            observation.signals()[0].evidence(),
            [format!("127.0.0.1:{}", open_port)]
        );
        assert!(!observation.signals()[0].is_strong());
    }

    #[tokio::test]
    async fn closed_ports_are_negative() {
        let open = scan_loopback(&[closed_port()], Duration::from_millis(200)).await;
        assert!(open.is_empty());
    }
}
