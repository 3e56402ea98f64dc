//! Async runtime driver
//!
//! Wraps a CoordinationCore in a tokio task: a UDP-backed bus endpoint,
//! a receive loop feeding frames in, and a tick timer driving `step`.
//! Virtual time for the core is elapsed time since start, so the core
//! itself stays clock-free and deterministic under test.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use furrow_alloc::ClaimResult;
use furrow_channel::{start_receive_loop, UdpBus};
use furrow_core::{AgentId, FurrowResult, SectionId};

use crate::{AgentConfig, CoordinationCore, CoreEvent};

const RECEIVE_BUFFER: usize = 1024;

/// One agent's running coordination endpoint.
pub struct AgentRuntime {
    core: Arc<Mutex<CoordinationCore>>,
    bus: Arc<UdpBus>,
    started: Instant,
    driver: JoinHandle<()>,
}

impl AgentRuntime {
    /// Bind the bus and start the driver task.
    pub async fn start(
        cfg: AgentConfig,
        addr: SocketAddr,
        peers: HashMap<AgentId, SocketAddr>,
    ) -> FurrowResult<Self> {
        let bus = Arc::new(UdpBus::bind(addr, peers).await?);
        info!(agent = %cfg.agent_id, addr = %bus.local_addr(), "coordination endpoint up");

        let tick_interval = cfg.tick_interval;
        let core = Arc::new(Mutex::new(CoordinationCore::new(cfg)));
        let started = Instant::now();

        let driver = tokio::spawn(Self::drive(
            Arc::clone(&core),
            Arc::clone(&bus),
            started,
            tick_interval,
        ));

        Ok(AgentRuntime {
            core,
            bus,
            started,
            driver,
        })
    }

    async fn drive(
        core: Arc<Mutex<CoordinationCore>>,
        bus: Arc<UdpBus>,
        started: Instant,
        tick_interval: std::time::Duration,
    ) {
        let mut frames = start_receive_loop(bus.socket(), RECEIVE_BUFFER);
        let mut ticker = tokio::time::interval(tick_interval);

        loop {
            tokio::select! {
                maybe_frame = frames.recv() => {
                    let Some(bytes) = maybe_frame else {
                        break;
                    };
                    let now = started.elapsed();
                    if let Err(e) = core.lock().handle_frame(&bytes, now) {
                        warn!(error = %e, "dropping unparseable frame");
                    }
                }
                _ = ticker.tick() => {
                    let now = started.elapsed();
                    let batches = match core.lock().step(now) {
                        Ok(batches) => batches,
                        Err(e) => {
                            warn!(error = %e, "coordination step failed");
                            continue;
                        }
                    };
                    for outgoing in &batches {
                        if let Err(e) = bus.send_outgoing(outgoing).await {
                            warn!(dest = %outgoing.destination, error = %e, "bus send failed");
                        }
                    }
                }
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.bus.local_addr()
    }

    pub fn agent_id(&self) -> AgentId {
        self.core.lock().agent_id().clone()
    }

    pub fn claim(&self, section: &SectionId) -> ClaimResult {
        self.core.lock().claim(section, self.started.elapsed())
    }

    pub fn release(&self, section: &SectionId) {
        self.core.lock().release(section, self.started.elapsed())
    }

    pub fn owner_of(&self, section: &SectionId) -> Option<AgentId> {
        self.core.lock().owner_of(section).cloned()
    }

    pub fn sections_owned(&self) -> BTreeSet<SectionId> {
        self.core.lock().sections_owned()
    }

    pub fn emergency_stop(&self, code: u8) {
        self.core.lock().emergency_stop(code, self.started.elapsed())
    }

    pub fn publish_telemetry(&self, payload: Vec<u8>) {
        self.core
            .lock()
            .publish_telemetry(payload, self.started.elapsed())
    }

    pub fn is_halted(&self) -> bool {
        self.core.lock().is_halted()
    }

    pub fn drain_events(&self) -> Vec<CoreEvent> {
        self.core.lock().take_events()
    }

    /// Stop the driver task. Pending retries are dropped.
    pub fn shutdown(&self) {
        self.driver.abort();
    }
}

impl Drop for AgentRuntime {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Reserve an ephemeral port so both runtimes can know each other's
    /// address before either is started.
    fn reserve_addr() -> SocketAddr {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    }

    async fn fleet_of_two() -> (AgentRuntime, AgentRuntime) {
        let a_id = AgentId::new("tractor-01");
        let b_id = AgentId::new("tractor-02");
        let fleet = vec![a_id.clone(), b_id.clone()];
        let (a_addr, b_addr) = (reserve_addr(), reserve_addr());

        let mut cfg_a = AgentConfig::new(a_id.clone(), fleet.clone());
        cfg_a.tick_interval = Duration::from_millis(2);
        let a = AgentRuntime::start(
            cfg_a,
            a_addr,
            HashMap::from([(b_id.clone(), b_addr)]),
        )
        .await
        .unwrap();

        let mut cfg_b = AgentConfig::new(b_id, fleet);
        cfg_b.tick_interval = Duration::from_millis(2);
        let b = AgentRuntime::start(cfg_b, b_addr, HashMap::from([(a_id, a_addr)]))
            .await
            .unwrap();

        (a, b)
    }

    #[tokio::test]
    async fn test_claim_reaches_peer_over_udp() {
        let (a, b) = fleet_of_two().await;
        let s = SectionId::new("strip-4");

        assert_eq!(a.claim(&s), ClaimResult::Granted);

        let deadline = Instant::now() + Duration::from_secs(2);
        while b.owner_of(&s).is_none() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(b.owner_of(&s), Some(AgentId::new("tractor-01")));
    }

    #[tokio::test]
    async fn test_emergency_stop_reaches_peer_over_udp() {
        let (a, b) = fleet_of_two().await;

        a.emergency_stop(1);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !b.is_halted() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(b.is_halted());
        assert!(matches!(
            b.drain_events().as_slice(),
            [CoreEvent::EmergencyReceived { code: 1, .. }]
        ));
    }
}
