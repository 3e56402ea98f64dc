//! Fleet simulator
//!
//! Runs a whole fleet of coordination cores over chaos links in virtual
//! time. Every link is independently seeded, so a failing scenario
//! replays exactly. No sockets and no sleeps; a simulated minute takes
//! milliseconds of wall time.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use furrow_agent::{AgentConfig, CoordinationCore};
use furrow_core::{AgentId, FurrowResult};

use crate::chaos::{ChaosConfig, ChaosLink};

/// A fleet of cores wired through directed chaos links.
pub struct FleetSimulator {
    agents: Vec<CoordinationCore>,
    links: HashMap<(AgentId, AgentId), ChaosLink>,
    now: Duration,
}

impl FleetSimulator {
    /// Build a full-mesh fleet. Link seeds derive from `seed` so the whole
    /// run is reproducible.
    pub fn new(names: &[&str], link_cfg: ChaosConfig, seed: u64) -> Self {
        let fleet: Vec<AgentId> = names.iter().map(|n| AgentId::new(*n)).collect();

        let agents = fleet
            .iter()
            .map(|id| CoordinationCore::new(AgentConfig::new(id.clone(), fleet.clone())))
            .collect();

        let mut links = HashMap::new();
        let mut link_seed = seed;
        for from in &fleet {
            for to in &fleet {
                if from != to {
                    link_seed = link_seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
                    links.insert(
                        (from.clone(), to.clone()),
                        ChaosLink::new(link_cfg.clone(), link_seed),
                    );
                }
            }
        }

        FleetSimulator {
            agents,
            links,
            now: Duration::ZERO,
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn core(&self, id: &AgentId) -> &CoordinationCore {
        self.agents.iter().find(|c| c.agent_id() == id).unwrap()
    }

    pub fn core_mut(&mut self, id: &AgentId) -> &mut CoordinationCore {
        self.agents.iter_mut().find(|c| *c.agent_id() == *id).unwrap()
    }

    pub fn link_stats(&self, from: &AgentId, to: &AgentId) -> &crate::chaos::ChaosStats {
        self.links[&(from.clone(), to.clone())].stats()
    }

    /// One simulation step: every core steps, its output enters the
    /// links, and everything due on the links is fed to its receiver.
    pub fn tick(&mut self, dt: Duration) -> FurrowResult<()> {
        self.now += dt;

        let mut sends: Vec<(AgentId, AgentId, Vec<u8>)> = Vec::new();
        for core in &mut self.agents {
            let from = core.agent_id().clone();
            for outgoing in core.step(self.now)? {
                for frame in &outgoing.frames {
                    sends.push((from.clone(), outgoing.destination.clone(), frame.serialize()?));
                }
            }
        }
        for (from, to, bytes) in sends {
            if let Some(link) = self.links.get_mut(&(from, to)) {
                link.send(bytes);
            }
        }

        let mut arrivals: Vec<(AgentId, Vec<u8>)> = Vec::new();
        for ((_, to), link) in &mut self.links {
            for bytes in link.tick(dt) {
                arrivals.push((to.clone(), bytes));
            }
        }
        let now = self.now;
        for (to, bytes) in arrivals {
            if let Err(e) = self.core_mut(&to).handle_frame(&bytes, now) {
                warn!(agent = %to, error = %e, "simulated frame rejected");
            }
        }

        Ok(())
    }

    /// Run until every replica holds identical allocation state, or
    /// `max` simulated time passes. Returns the elapsed time on success.
    pub fn run_until_converged(&mut self, dt: Duration, max: Duration) -> Option<Duration> {
        let start = self.now;
        while self.now - start < max {
            self.tick(dt).expect("simulation step failed");
            if self.converged() {
                return Some(self.now - start);
            }
        }
        None
    }

    /// Run for a fixed stretch of simulated time.
    pub fn run_for(&mut self, dt: Duration, total: Duration) {
        let start = self.now;
        while self.now - start < total {
            self.tick(dt).expect("simulation step failed");
        }
    }

    /// True when every replica's full record set is identical.
    pub fn converged(&self) -> bool {
        let Some((first, rest)) = self.agents.split_first() else {
            return true;
        };
        let reference = first.store().full_delta();
        rest.iter().all(|c| c.store().full_delta() == reference)
    }
}
