//! Run profile store (`config/agent_profiles.json`)
//!
//! Shape: `{agent_name: [ {label, command, streamlit_port} ]}`. Entries that
//! are not objects or lack a label/command are dropped on load, and agents left
//! with no valid profile are omitted.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::types::RunProfile;
use crate::error::AppError;
use crate::store;

pub type ProfileMap = BTreeMap<String, Vec<RunProfile>>;

#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> ProfileMap {
        let raw: Value = match store::read_json(&self.path) {
            Some(raw) => raw,
            None => return ProfileMap::new(),
        };
        parse_profiles(&raw)
    }

    pub fn save(&self, profiles: &ProfileMap) -> Result<(), AppError> {
        store::write_json_atomic(&self.path, profiles)
    }

    /// Replace an agent's profiles wholesale; an empty list removes the agent
    pub fn replace(&self, agent: &str, profiles: Vec<RunProfile>) -> Result<(), AppError> {
        let mut all = self.load();
        let profiles: Vec<RunProfile> = profiles
            .into_iter()
            .filter(|p| !p.label.is_empty() && !p.command.is_empty())
            .collect();
        if profiles.is_empty() {
            all.remove(agent);
        } else {
            all.insert(agent.to_string(), profiles);
        }
        self.save(&all)
    }

    pub fn for_agent(&self, agent: &str) -> Vec<RunProfile> {
        self.load().remove(agent).unwrap_or_default()
    }

    pub fn find(&self, agent: &str, label: &str) -> Option<RunProfile> {
        self.for_agent(agent).into_iter().find(|p| p.label == label)
    }
}

fn parse_profiles(raw: &Value) -> ProfileMap {
    let mut profiles = ProfileMap::new();
    let Some(agents) = raw.as_object() else {
        return profiles;
    };

    for (agent, items) in agents {
        let Some(items) = items.as_array() else {
            continue;
        };
        let parsed: Vec<RunProfile> = items.iter().filter_map(parse_profile).collect();
        if !parsed.is_empty() {
            profiles.insert(agent.clone(), parsed);
        }
    }
    profiles
}

fn parse_profile(item: &Value) -> Option<RunProfile> {
    let obj = item.as_object()?;
    let label = obj.get("label")?.as_str().filter(|s| !s.is_empty())?;
    let command = obj.get("command")?.as_str().filter(|s| !s.is_empty())?;
    let streamlit_port = obj
        .get("streamlit_port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok());

    Some(RunProfile {
        label: label.to_string(),
        command: command.to_string(),
        streamlit_port,
    })
}
