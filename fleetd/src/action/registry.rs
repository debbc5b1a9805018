//! Per-resource action state

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::CoreError;

/// Kind of a tracked resource, decides which flags apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Build,
    Deployment,
    Server,
}

impl ResourceKind {
    pub fn flags(&self) -> &'static [ActionFlag] {
        match self {
            ResourceKind::Build => &[
                ActionFlag::Pulling,
                ActionFlag::Building,
                ActionFlag::Cloning,
                ActionFlag::Updating,
                ActionFlag::Deleting,
            ],
            ResourceKind::Deployment => &[
                ActionFlag::Deploying,
                ActionFlag::Deleting,
                ActionFlag::Starting,
                ActionFlag::Stopping,
                ActionFlag::Pulling,
                ActionFlag::Cloning,
                ActionFlag::Updating,
            ],
            ResourceKind::Server => &[ActionFlag::Removing],
        }
    }

    pub fn supports(&self, flag: ActionFlag) -> bool {
        self.flags().contains(&flag)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Build => "build",
            ResourceKind::Deployment => "deployment",
            ResourceKind::Server => "server",
        };
        f.write_str(name)
    }
}

/// Named in-progress marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionFlag {
    Pulling,
    Building,
    Cloning,
    Updating,
    Deleting,
    Deploying,
    Starting,
    Stopping,
    Removing,
}

impl ActionFlag {
    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionFlag::Pulling => "pulling",
            ActionFlag::Building => "building",
            ActionFlag::Cloning => "cloning",
            ActionFlag::Updating => "updating",
            ActionFlag::Deleting => "deleting",
            ActionFlag::Deploying => "deploying",
            ActionFlag::Starting => "starting",
            ActionFlag::Stopping => "stopping",
            ActionFlag::Removing => "removing",
        }
    }
}

impl fmt::Display for ActionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct ActionState {
    kind: ResourceKind,
    active: u16,
}

impl ActionState {
    fn new(kind: ResourceKind) -> Self {
        Self { kind, active: 0 }
    }

    fn is_set(&self, flag: ActionFlag) -> bool {
        self.active & flag.bit() != 0
    }

    fn set(&mut self, flag: ActionFlag, value: bool) {
        if value {
            self.active |= flag.bit();
        } else {
            self.active &= !flag.bit();
        }
    }

    fn busy(&self) -> bool {
        self.active != 0
    }
}

/// In-memory map from resource id to its action flags.
///
/// Every access to one id goes through the map's shard lock, so updates to
/// the same id are linearized while different ids proceed independently.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    states: Arc<DashMap<String, ActionState>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zeroed flag set. An existing entry is left untouched.
    pub fn register(&self, id: &str, kind: ResourceKind) {
        match self.states.entry(id.to_string()) {
            Entry::Occupied(_) => {
                warn!("Action state for {} {} already registered", kind, id);
            }
            Entry::Vacant(entry) => {
                entry.insert(ActionState::new(kind));
                debug!("Registered action state for {} {}", kind, id);
            }
        }
    }

    /// Drop the flag set, no-op for unknown ids
    pub fn unregister(&self, id: &str) {
        if self.states.remove(id).is_some() {
            debug!("Unregistered action state for {}", id);
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    pub fn set(&self, id: &str, flag: ActionFlag, value: bool) -> Result<(), CoreError> {
        let mut state = self
            .states
            .get_mut(id)
            .ok_or_else(|| CoreError::UnregisteredResource(id.to_string()))?;
        if !state.kind.supports(flag) {
            return Err(CoreError::InvalidFlag {
                kind: state.kind.to_string(),
                flag: flag.to_string(),
            });
        }
        state.set(flag, value);
        Ok(())
    }

    /// Current value of a flag, `false` for unknown ids
    pub fn get(&self, id: &str, flag: ActionFlag) -> bool {
        self.states
            .get(id)
            .map(|state| state.is_set(flag))
            .unwrap_or(false)
    }

    /// True iff any flag of the resource is set
    pub fn busy(&self, id: &str) -> bool {
        self.states.get(id).map(|state| state.busy()).unwrap_or(false)
    }

    /// All flags of a resource, `None` for unknown ids
    pub fn snapshot(&self, id: &str) -> Option<BTreeMap<ActionFlag, bool>> {
        let state = *self.states.get(id)?;
        Some(
            state
                .kind
                .flags()
                .iter()
                .map(|flag| (*flag, state.is_set(*flag)))
                .collect(),
        )
    }

    /// Check-and-set in one step.
    ///
    /// Returns `Ok(None)` when the resource is busy. The returned guard
    /// clears the flag when dropped.
    pub fn try_acquire(&self, id: &str, flag: ActionFlag) -> Result<Option<ActionGuard>, CoreError> {
        let mut state = self
            .states
            .get_mut(id)
            .ok_or_else(|| CoreError::UnregisteredResource(id.to_string()))?;
        if !state.kind.supports(flag) {
            return Err(CoreError::InvalidFlag {
                kind: state.kind.to_string(),
                flag: flag.to_string(),
            });
        }
        if state.busy() {
            return Ok(None);
        }
        state.set(flag, true);
        drop(state);

        Ok(Some(ActionGuard {
            registry: self.clone(),
            id: id.to_string(),
            flag,
        }))
    }

    /// Acquire several flags, all or nothing.
    ///
    /// Returns `Ok(None)` when any of the resources is busy; flags already
    /// taken are released before returning.
    pub fn try_acquire_all(
        &self,
        targets: &[(String, ActionFlag)],
    ) -> Result<Option<Vec<ActionGuard>>, CoreError> {
        let mut guards = Vec::with_capacity(targets.len());
        for (id, flag) in targets {
            match self.try_acquire(id, *flag)? {
                Some(guard) => guards.push(guard),
                None => return Ok(None),
            }
        }
        Ok(Some(guards))
    }
}

/// Holds one action flag; clears it on drop
#[derive(Debug)]
pub struct ActionGuard {
    registry: ActionRegistry,
    id: String,
    flag: ActionFlag,
}

impl ActionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flag(&self) -> ActionFlag {
        self.flag
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        // The resource may have been unregistered while the flag was held
        if let Some(mut state) = self.registry.states.get_mut(&self.id) {
            state.set(self.flag, false);
        }
    }
}
