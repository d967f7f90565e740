//! History reconstruction across many instances.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::events::{AuditEvent, EventKind};
use super::instance::{InstanceHistory, InstanceHistoryBuilder};
use super::types::{
    HistoryError, ImageLocator, InstanceHistoryState, InstanceId, InstanceLocator, InstanceState,
    Tenancy,
};

/// Histories for all instances seen in an analysis window, split into
/// those that could be fully reconstructed and those that need more data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSetHistory {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub complete: Vec<InstanceHistory>,
    pub incomplete: Vec<InstanceHistory>,
}

impl InstanceSetHistory {
    /// Number of incomplete histories in each state.
    pub fn incomplete_by_state(&self) -> BTreeMap<InstanceHistoryState, usize> {
        let mut counts = BTreeMap::new();
        for history in &self.incomplete {
            *counts.entry(history.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize instance history")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write instance history to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read instance history: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse instance history: {}", path.display()))
    }
}

/// An instance observed in a live inventory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingInstance {
    pub instance_id: InstanceId,
    pub reference: InstanceLocator,
    #[serde(default)]
    pub image: Option<ImageLocator>,
    pub state: InstanceState,
    pub tenancy: Tenancy,
}

/// Load an inventory snapshot from a JSON array.
pub fn load_inventory(path: &Path) -> Result<Vec<ExistingInstance>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read inventory: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse inventory: {}", path.display()))
}

/// Routes events to one [`InstanceHistoryBuilder`] per instance ID.
#[derive(Debug, Clone)]
pub struct InstanceSetHistoryBuilder {
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    instances: BTreeMap<InstanceId, InstanceHistoryBuilder>,
}

impl InstanceSetHistoryBuilder {
    pub fn new(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        debug_assert!(window_start <= window_end);
        Self {
            window_start,
            window_end,
            instances: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Seed a builder from inventory, replacing any builder for the same ID.
    /// The instance is taken to be last seen at the end of the window.
    pub fn add_existing_instance(
        &mut self,
        instance_id: InstanceId,
        reference: InstanceLocator,
        image: Option<ImageLocator>,
        state: InstanceState,
        tenancy: Tenancy,
    ) -> Result<(), HistoryError> {
        let builder = InstanceHistoryBuilder::for_existing_instance(
            instance_id,
            reference,
            image,
            state,
            self.window_end,
            tenancy,
        )?;

        if let Some(previous) = self.instances.insert(instance_id, builder) {
            if previous.last_event_date().is_some() {
                log::warn!(
                    "Replaced history for instance {} that had already processed events",
                    instance_id
                );
            }
        }
        Ok(())
    }

    pub fn add_inventory(&mut self, inventory: &[ExistingInstance]) -> Result<(), HistoryError> {
        for instance in inventory {
            self.add_existing_instance(
                instance.instance_id,
                instance.reference.clone(),
                instance.image.clone(),
                instance.state,
                instance.tenancy,
            )?;
        }
        Ok(())
    }

    fn builder_for(&mut self, instance_id: InstanceId) -> Result<&mut InstanceHistoryBuilder, HistoryError> {
        match self.instances.entry(instance_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let builder = InstanceHistoryBuilder::for_deleted_instance(instance_id)?;
                Ok(entry.insert(builder))
            }
        }
    }

    /// Apply one event. Events must arrive newest first per instance;
    /// events without an instance, failed operations, unrelated kinds and
    /// events outside the window are ignored.
    pub fn process(&mut self, event: &AuditEvent) -> Result<(), HistoryError> {
        let Some(instance_id) = event.relevant_instance() else {
            return Ok(());
        };

        let date = event.timestamp;
        if date < self.window_start || date > self.window_end {
            log::debug!(
                "Instance {}: skipping {:?} at {}, outside window {} to {}",
                instance_id,
                event.kind,
                date,
                self.window_start,
                self.window_end
            );
            return Ok(());
        }

        let builder = self.builder_for(instance_id)?;
        log::debug!("Instance {}: {:?} at {}", instance_id, event.kind, date);

        match &event.kind {
            EventKind::Insert { reference, image } => {
                builder.on_insert(date, reference.as_ref(), image.as_ref())
            }
            EventKind::Start { reference } | EventKind::Resume { reference } => {
                builder.on_start(date, reference.as_ref())
            }
            EventKind::Stop { reference }
            | EventKind::Suspend { reference }
            | EventKind::Delete { reference }
            | EventKind::GuestTerminate { reference }
            | EventKind::TerminateOnHostMaintenance { reference } => {
                builder.on_stop(date, reference.as_ref())
            }
            EventKind::SetPlacement { server_id } => builder.on_set_placement(server_id, date),
            EventKind::Other => Ok(()),
        }
    }

    pub fn process_all<'a, I>(&mut self, events: I) -> Result<(), HistoryError>
    where
        I: IntoIterator<Item = &'a AuditEvent>,
    {
        for event in events {
            self.process(event)?;
        }
        Ok(())
    }

    /// Snapshot all builders, partitioned by completeness.
    pub fn build(&self) -> InstanceSetHistory {
        let (complete, incomplete): (Vec<_>, Vec<_>) = self
            .instances
            .values()
            .map(InstanceHistoryBuilder::build)
            .partition(|history| history.state == InstanceHistoryState::Complete);

        debug_assert!(complete.iter().all(|h| h.tenancy != Tenancy::Unknown));

        log::info!(
            "Built history for {} instances ({} complete, {} incomplete)",
            self.instances.len(),
            complete.len(),
            incomplete.len()
        );

        InstanceSetHistory {
            window_start: self.window_start,
            window_end: self.window_end,
            complete,
            incomplete,
        }
    }
}
