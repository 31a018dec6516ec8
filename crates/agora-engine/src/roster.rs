use chrono::{DateTime, Utc};
use tracing::debug;

use agora_core::decision::Decision;
use agora_core::types::{AgentRole, AgentUnit};

/// The run's mutable working copy of the roster.
///
/// An arena addressed by stable id: disabling is a tombstone bit, never a
/// physical removal, so earlier trace entries keep resolving their agent ids.
#[derive(Debug, Clone)]
pub struct WorkingRoster {
    units: Vec<AgentUnit>,
}

impl WorkingRoster {
    pub fn new(units: Vec<AgentUnit>) -> Self {
        Self { units }
    }

    pub fn units(&self) -> &[AgentUnit] {
        &self.units
    }

    pub fn get(&self, id: &str) -> Option<&AgentUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Enabled units matching the given ids, in the ids' order.
    pub fn enabled_named(&self, ids: &[String]) -> Vec<AgentUnit> {
        ids.iter()
            .filter_map(|id| self.get(id))
            .filter(|u| u.enabled)
            .cloned()
            .collect()
    }

    pub fn enabled_with_role(&self, role: AgentRole) -> Vec<AgentUnit> {
        self.units
            .iter()
            .filter(|u| u.enabled && u.role == role)
            .cloned()
            .collect()
    }

    /// The single scoring agent used for the scoring stage, if any is enabled.
    pub fn scoring_agent(&self) -> Option<AgentUnit> {
        self.units
            .iter()
            .find(|u| u.enabled && u.role == AgentRole::ScoringAgent)
            .cloned()
    }

    pub fn fact_checker_id(&self) -> Option<String> {
        self.units
            .iter()
            .find(|u| u.enabled && u.role == AgentRole::FactChecker)
            .map(|u| u.id.clone())
    }

    /// Apply a decision's roster mutations in order: prompt updates, then
    /// creations, then disables.
    pub fn apply(&mut self, decision: &Decision, now: DateTime<Utc>) {
        for update in &decision.prompt_updates {
            if let Some(unit) = self.units.iter_mut().find(|u| u.id == update.agent_id) {
                debug!(agent_id = %update.agent_id, reason = %update.reason, "prompt updated");
                unit.system_prompt = update.new_prompt.clone();
                unit.updated_at = now;
            }
        }

        for created in &decision.create_agents {
            // The normalizer deduplicates ids against the roster it saw;
            // guard anyway against duplicates within one decision.
            if self.get(&created.id).is_none() {
                debug!(agent_id = %created.id, role = ?created.role, "agent created");
                self.units.push(created.clone());
            }
        }

        for id in &decision.disable_agents {
            if let Some(unit) = self.units.iter_mut().find(|u| u.id == *id) {
                debug!(agent_id = %id, "agent disabled");
                unit.enabled = false;
                unit.updated_at = now;
            }
        }
    }
}
