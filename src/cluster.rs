//! Cluster instance: command endpoints and attributes living at one endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::attribute::{AttributeDef, AttributeStore};
use crate::command::CommandEndpoint;
use crate::tlv::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterInstanceId {
    pub endpoint: u16,
    pub cluster: u32,
}

impl ClusterInstanceId {
    pub fn new(endpoint: u16, cluster: u32) -> Self {
        Self { endpoint, cluster }
    }
}

impl std::fmt::Display for ClusterInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{:#06x}", self.endpoint, self.cluster)
    }
}

#[derive(Debug)]
pub struct Cluster {
    id: ClusterInstanceId,
    commands: HashMap<u32, Arc<CommandEndpoint>>,
    attributes: AttributeStore,
    max_depth: usize,
}

impl Cluster {
    pub fn builder(id: ClusterInstanceId) -> ClusterBuilder {
        ClusterBuilder {
            id,
            commands: Vec::new(),
            attributes: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn id(&self) -> ClusterInstanceId {
        self.id
    }

    pub fn command(&self, invoke_id: u32) -> Option<&Arc<CommandEndpoint>> {
        self.commands.get(&invoke_id)
    }

    pub fn command_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.commands.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

pub struct ClusterBuilder {
    id: ClusterInstanceId,
    commands: Vec<CommandEndpoint>,
    attributes: Vec<AttributeDef>,
    max_depth: usize,
}

impl ClusterBuilder {
    pub fn command(mut self, endpoint: CommandEndpoint) -> Self {
        self.commands.push(endpoint);
        self
    }

    pub fn attribute(mut self, def: AttributeDef) -> Self {
        self.attributes.push(def);
        self
    }

    pub fn max_tlv_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Check all definitions and freeze them. Schemas are not touched after this point.
    pub fn build(self) -> Result<Cluster> {
        let id = self.id;
        let mut commands = HashMap::new();
        for ep in self.commands {
            ep.request
                .validate()
                .context(format!("{} request schema of {}", id, ep.name))?;
            ep.response
                .validate()
                .context(format!("{} response schema of {}", id, ep.name))?;
            if commands.contains_key(&ep.invoke_id) {
                anyhow::bail!("{} command {:#x} ({}) declared twice", id, ep.invoke_id, ep.name);
            }
            commands.insert(ep.invoke_id, Arc::new(ep));
        }
        let attributes = AttributeStore::new(self.attributes)
            .context(format!("{} attributes", id))?
            .with_max_depth(self.max_depth);
        log::debug!(
            "cluster {} built with {} commands, {} attributes",
            id,
            commands.len(),
            attributes.ids().len()
        );
        Ok(Cluster {
            id,
            commands,
            attributes,
            max_depth: self.max_depth,
        })
    }
}
