//! Agent profiles and the in-memory registry behind the CRUD surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Conversational tone applied on top of the agent's system prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentBehavior {
    #[default]
    Professional,
    Character,
    Chatty,
    Concise,
    Empathetic,
}

/// The slice of an agent profile a session consumes. Immutable for the
/// session's lifetime once selected.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub system_prompt: String,
    pub behavior: AgentBehavior,
    pub greeting: Option<String>,
    pub custom_knowledge: Option<String>,
    pub guardrails_enabled: bool,
}

/// Full registry record exposed over the CRUD routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    /// Display id derived from the name (`Name-xxxxxxxx`).
    pub agent_id: String,
    pub name: String,
    pub voice: String,
    pub speed: String,
    pub greeting: String,
    pub system_prompt: String,
    pub behavior: AgentBehavior,
    pub custom_knowledge: String,
    pub guardrails_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub conversations: u64,
    pub minutes_spoken: f64,
}

impl AgentProfile {
    /// Project the profile down to what a session needs.
    pub fn session_config(&self) -> AgentConfig {
        AgentConfig {
            name: self.name.clone(),
            system_prompt: self.system_prompt.clone(),
            behavior: self.behavior,
            greeting: non_empty(&self.greeting),
            custom_knowledge: non_empty(&self.custom_knowledge),
            guardrails_enabled: self.guardrails_enabled,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn display_id(name: &str, id: &str) -> String {
    let short = &id[..id.len().min(8)];
    format!("{}-{short}", name.replace(' ', "-"))
}

/// Fields accepted when creating an agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NewAgent {
    pub name: String,
    pub voice: String,
    pub speed: String,
    pub greeting: String,
    pub system_prompt: String,
    pub behavior: AgentBehavior,
    pub custom_knowledge: String,
    pub guardrails_enabled: bool,
}

impl Default for NewAgent {
    fn default() -> Self {
        Self {
            name: "Untitled Agent".to_owned(),
            voice: "Vincent".to_owned(),
            speed: "1.0x".to_owned(),
            greeting: String::new(),
            system_prompt: String::new(),
            behavior: AgentBehavior::default(),
            custom_knowledge: String::new(),
            guardrails_enabled: false,
        }
    }
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<String>,
    pub greeting: Option<String>,
    pub system_prompt: Option<String>,
    pub behavior: Option<AgentBehavior>,
    pub custom_knowledge: Option<String>,
    pub guardrails_enabled: Option<bool>,
}

/// Lookup seam the session consumes.
pub trait AgentRegistry: Send + Sync {
    /// Resolve an agent id (or display id) to its session config.
    fn get(&self, agent_id: &str) -> Option<AgentConfig>;
}

/// Process-local agent storage.
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<String, AgentProfile>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the sample agents the frontend expects.
    pub fn with_samples() -> Self {
        let registry = Self::new();
        registry.insert(NewAgent {
            name: "Bozidar".to_owned(),
            greeting: "Hello! I'm Bozidar. How can I help you today?".to_owned(),
            system_prompt: "You are Bozidar, a helpful and professional assistant.".to_owned(),
            behavior: AgentBehavior::Professional,
            ..NewAgent::default()
        });
        registry.insert(NewAgent {
            greeting: "Hi there! How can I assist you?".to_owned(),
            system_prompt: "You are a friendly conversational assistant.".to_owned(),
            behavior: AgentBehavior::Chatty,
            ..NewAgent::default()
        });
        registry
    }

    /// All profiles, unordered.
    pub fn list(&self) -> Vec<AgentProfile> {
        self.read().values().cloned().collect()
    }

    /// One profile by primary id.
    pub fn profile(&self, id: &str) -> Option<AgentProfile> {
        self.read().get(id).cloned()
    }

    /// Create a profile, returning the stored record.
    pub fn insert(&self, new: NewAgent) -> AgentProfile {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let profile = AgentProfile {
            agent_id: display_id(&new.name, &id),
            id: id.clone(),
            name: new.name,
            voice: new.voice,
            speed: new.speed,
            greeting: new.greeting,
            system_prompt: new.system_prompt,
            behavior: new.behavior,
            custom_knowledge: new.custom_knowledge,
            guardrails_enabled: new.guardrails_enabled,
            created_at: now,
            updated_at: now,
            conversations: 0,
            minutes_spoken: 0.0,
        };
        self.write().insert(id, profile.clone());
        profile
    }

    /// Apply a partial update. Returns the updated record, or `None` if
    /// the agent does not exist.
    pub fn update(&self, id: &str, patch: AgentPatch) -> Option<AgentProfile> {
        let mut agents = self.write();
        let profile = agents.get_mut(id)?;

        if let Some(name) = patch.name {
            profile.agent_id = display_id(&name, &profile.id);
            profile.name = name;
        }
        if let Some(voice) = patch.voice {
            profile.voice = voice;
        }
        if let Some(speed) = patch.speed {
            profile.speed = speed;
        }
        if let Some(greeting) = patch.greeting {
            profile.greeting = greeting;
        }
        if let Some(system_prompt) = patch.system_prompt {
            profile.system_prompt = system_prompt;
        }
        if let Some(behavior) = patch.behavior {
            profile.behavior = behavior;
        }
        if let Some(custom_knowledge) = patch.custom_knowledge {
            profile.custom_knowledge = custom_knowledge;
        }
        if let Some(guardrails_enabled) = patch.guardrails_enabled {
            profile.guardrails_enabled = guardrails_enabled;
        }
        profile.updated_at = Utc::now();
        Some(profile.clone())
    }

    /// Delete a profile. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    /// Bump conversation stats after a call ends.
    pub fn record_conversation(&self, id: &str, duration_seconds: f64) -> Option<AgentProfile> {
        let mut agents = self.write();
        let profile = agents.get_mut(id)?;
        profile.conversations += 1;
        profile.minutes_spoken += duration_seconds / 60.0;
        profile.updated_at = Utc::now();
        Some(profile.clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, AgentProfile>> {
        match self.agents.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, AgentProfile>> {
        match self.agents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn get(&self, agent_id: &str) -> Option<AgentConfig> {
        let agents = self.read();
        if let Some(profile) = agents.get(agent_id) {
            return Some(profile.session_config());
        }
        // Fall back to the display id the frontend shows.
        agents
            .values()
            .find(|p| p.agent_id == agent_id)
            .map(AgentProfile::session_config)
    }
}
