//! Agent configuration
//!
//! AgentId assignment and fleet membership are external inputs: the core
//! takes the known fleet as configuration and still handles messages
//! from agents it has never seen.

use std::time::Duration;

use furrow_channel::ChannelConfig;
use furrow_core::AgentId;

/// Configuration for one coordination core.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// This agent's identity.
    pub agent_id: AgentId,
    /// Known fleet members (including this agent).
    pub fleet: Vec<AgentId>,
    /// Scheduler tick interval for the runtime driver.
    pub tick_interval: Duration,
    /// Channel tuning.
    pub channel: ChannelConfig,
    /// Wall-clock base in epoch milliseconds; record timestamps are
    /// `wall_base_ms` plus elapsed virtual time. Agents' bases drift in
    /// the field - the tie-break tolerates that by design of the store.
    pub wall_base_ms: u64,
}

impl AgentConfig {
    pub fn new(agent_id: AgentId, fleet: Vec<AgentId>) -> Self {
        AgentConfig {
            agent_id,
            fleet,
            tick_interval: Duration::from_millis(10),
            channel: ChannelConfig::default(),
            wall_base_ms: 0,
        }
    }

    /// Every fleet member except this agent.
    pub fn peers(&self) -> Vec<AgentId> {
        self.fleet
            .iter()
            .filter(|id| **id != self.agent_id)
            .cloned()
            .collect()
    }
}
