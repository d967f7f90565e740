//! Per-instance history reconstruction by backward replay.
//!
//! Events are fed newest first. Each event bounds the placement that began
//! before it, so by the time a placement's start is seen its end is known.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cursor::TimeCursor;
use super::placement::Placement;
use super::types::{
    HistoryError, ImageLocator, InstanceHistoryState, InstanceId, InstanceLocator, InstanceState,
    Tenancy,
};

/// Reconstructed history of one instance. Placements are chronological,
/// non-overlapping and gap-merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHistory {
    pub instance_id: InstanceId,
    pub reference: Option<InstanceLocator>,
    pub image: Option<ImageLocator>,
    pub tenancy: Tenancy,
    pub state: InstanceHistoryState,
    pub placements: Vec<Placement>,
}

/// Accumulates placements for one instance from events in reverse order.
#[derive(Debug, Clone)]
pub struct InstanceHistoryBuilder {
    instance_id: InstanceId,
    reference: Option<InstanceLocator>,
    image: Option<ImageLocator>,
    tenancy: Tenancy,

    /// Front is the earliest placement known so far
    placements: VecDeque<Placement>,

    /// Most recent stop seen, bounds the next placement found
    last_stopped_on: Option<DateTime<Utc>>,

    missing_stop_event: bool,
    cursor: TimeCursor,
}

impl InstanceHistoryBuilder {
    fn new(instance_id: InstanceId) -> Result<Self, HistoryError> {
        if instance_id == 0 {
            return Err(HistoryError::ZeroInstanceId);
        }

        Ok(Self {
            instance_id,
            reference: None,
            image: None,
            tenancy: Tenancy::Unknown,
            placements: VecDeque::new(),
            last_stopped_on: None,
            missing_stop_event: false,
            cursor: TimeCursor::new(),
        })
    }

    /// Builder for an instance that still exists as of `last_seen`.
    ///
    /// A running instance is seeded with a zero-length placement at
    /// `last_seen`, so the newest start or placement event is bounded by it.
    pub fn for_existing_instance(
        instance_id: InstanceId,
        reference: InstanceLocator,
        image: Option<ImageLocator>,
        state: InstanceState,
        last_seen: DateTime<Utc>,
        tenancy: Tenancy,
    ) -> Result<Self, HistoryError> {
        let mut builder = Self::new(instance_id)?;
        builder.reference = Some(reference);
        builder.image = image;
        builder.tenancy = tenancy;
        builder.cursor = TimeCursor::starting_at(last_seen);

        if state == InstanceState::Running {
            builder.add_placement(Placement::new(tenancy, None, last_seen, last_seen));
        }

        Ok(builder)
    }

    /// Builder for an instance that is only known from audit events.
    pub fn for_deleted_instance(instance_id: InstanceId) -> Result<Self, HistoryError> {
        Self::new(instance_id)
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn tenancy(&self) -> Tenancy {
        self.tenancy
    }

    /// Timestamp of the last processed event.
    pub fn last_event_date(&self) -> Option<DateTime<Utc>> {
        self.cursor.last()
    }

    pub fn state(&self) -> InstanceHistoryState {
        if self.missing_stop_event {
            InstanceHistoryState::MissingStopEvent
        } else if self.tenancy == Tenancy::Unknown {
            InstanceHistoryState::MissingTenancy
        } else if self.reference.is_none() {
            InstanceHistoryState::MissingName
        } else if self.tenancy == Tenancy::SoleTenant && self.image.is_none() {
            InstanceHistoryState::MissingImage
        } else {
            InstanceHistoryState::Complete
        }
    }

    fn add_placement(&mut self, placement: Placement) {
        match placement.tenancy {
            Tenancy::SoleTenant => self.tenancy = Tenancy::SoleTenant,
            Tenancy::Fleet if self.tenancy == Tenancy::Unknown => self.tenancy = Tenancy::Fleet,
            _ => {}
        }

        if let Some(subsequent) = self.placements.front() {
            if placement.is_adjacent(subsequent) {
                let merged = placement.merge(subsequent);
                self.placements[0] = merged;
                return;
            }
        }
        self.placements.push_front(placement);
    }

    /// Register a placement that began at `date` and lasted until the next
    /// known boundary.
    fn add_placement_starting(&mut self, tenancy: Tenancy, server_id: Option<&str>, date: DateTime<Utc>) {
        let placed_until = match (self.placements.front(), self.last_stopped_on) {
            (Some(subsequent), Some(stopped)) => subsequent.from.min(stopped),
            (Some(subsequent), None) => subsequent.from,
            (None, Some(stopped)) => stopped,
            (None, None) => {
                // Nothing later bounds this placement
                log::warn!(
                    "Instance {} placed at {} without a subsequent stop event",
                    self.instance_id,
                    date
                );
                self.missing_stop_event = true;
                return;
            }
        };

        self.add_placement(Placement::new(
            tenancy,
            server_id.map(str::to_string),
            date,
            placed_until,
        ));
    }

    fn fill_reference(&mut self, reference: Option<&InstanceLocator>) {
        if self.reference.is_none() {
            self.reference = reference.cloned();
        }
    }

    /// The instance was created at `date`.
    pub fn on_insert(
        &mut self,
        date: DateTime<Utc>,
        reference: Option<&InstanceLocator>,
        image: Option<&ImageLocator>,
    ) -> Result<(), HistoryError> {
        self.cursor.advance(date)?;
        self.fill_reference(reference);
        if self.image.is_none() {
            self.image = image.cloned();
        }

        self.add_placement_starting(Tenancy::Fleet, None, date);
        Ok(())
    }

    /// The instance was started or resumed at `date`.
    pub fn on_start(
        &mut self,
        date: DateTime<Utc>,
        reference: Option<&InstanceLocator>,
    ) -> Result<(), HistoryError> {
        self.cursor.advance(date)?;
        self.fill_reference(reference);

        self.add_placement_starting(Tenancy::Fleet, None, date);
        Ok(())
    }

    /// The instance stopped at `date`.
    pub fn on_stop(
        &mut self,
        date: DateTime<Utc>,
        reference: Option<&InstanceLocator>,
    ) -> Result<(), HistoryError> {
        self.cursor.advance(date)?;
        self.fill_reference(reference);

        self.last_stopped_on = Some(date);
        Ok(())
    }

    /// The instance was placed on sole-tenant node `server_id` at `date`.
    pub fn on_set_placement(&mut self, server_id: &str, date: DateTime<Utc>) -> Result<(), HistoryError> {
        self.cursor.advance(date)?;

        self.add_placement_starting(Tenancy::SoleTenant, Some(server_id), date);
        Ok(())
    }

    /// Snapshot of the history accumulated so far.
    pub fn build(&self) -> InstanceHistory {
        InstanceHistory {
            instance_id: self.instance_id,
            reference: self.reference.clone(),
            image: self.image.clone(),
            tenancy: self.tenancy,
            state: self.state(),
            placements: self.placements.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 12, d, 0, 0, 0).unwrap()
    }

    fn reference() -> InstanceLocator {
        InstanceLocator::new("project-1", "zone-1", "instance-1")
    }

    fn image() -> ImageLocator {
        ImageLocator::new("windows-cloud", "windows-2019")
    }

    #[test]
    fn test_zero_instance_id_rejected() {
        assert_eq!(
            InstanceHistoryBuilder::for_deleted_instance(0).unwrap_err(),
            HistoryError::ZeroInstanceId
        );
        assert!(InstanceHistoryBuilder::for_existing_instance(
            0,
            reference(),
            None,
            InstanceState::Running,
            day(31),
            Tenancy::Fleet
        )
        .is_err());
    }

    #[test]
    fn test_stop_then_placement_yields_one_placement() {
        let mut b = InstanceHistoryBuilder::for_deleted_instance(1).unwrap();
        b.on_stop(day(31), Some(&reference())).unwrap();
        b.on_set_placement("server-1", day(30)).unwrap();

        let history = b.build();
        assert_eq!(
            history.placements,
            vec![Placement::sole_tenant("server-1", day(30), day(31))]
        );
        assert_eq!(history.tenancy, Tenancy::SoleTenant);
        assert_eq!(history.state, InstanceHistoryState::MissingImage);

        b.on_insert(day(29), None, Some(&image())).unwrap();
        let history = b.build();
        assert_eq!(history.state, InstanceHistoryState::Complete);
        assert_eq!(
            history.placements,
            vec![Placement::sole_tenant("server-1", day(29), day(31))]
        );
    }

    #[test]
    fn test_redundant_placements_merge_into_running_seed() {
        let mut b = InstanceHistoryBuilder::for_existing_instance(
            1,
            reference(),
            Some(image()),
            InstanceState::Running,
            day(31),
            Tenancy::SoleTenant,
        )
        .unwrap();
        b.on_set_placement("server-1", day(30)).unwrap();
        b.on_set_placement("server-1", day(29)).unwrap();

        let history = b.build();
        assert_eq!(
            history.placements,
            vec![Placement::sole_tenant("server-1", day(29), day(31))]
        );
        assert_eq!(history.state, InstanceHistoryState::Complete);
    }

    #[test]
    fn test_placement_without_stop_is_flagged() {
        let mut b = InstanceHistoryBuilder::for_deleted_instance(1).unwrap();
        b.on_set_placement("server-1", day(30)).unwrap();

        let history = b.build();
        assert!(history.placements.is_empty());
        assert_eq!(history.state, InstanceHistoryState::MissingStopEvent);
    }

    #[test]
    fn test_missing_stop_outranks_missing_image() {
        let mut b = InstanceHistoryBuilder::for_deleted_instance(1).unwrap();
        b.on_set_placement("server-1", day(30)).unwrap();
        b.on_stop(day(20), Some(&reference())).unwrap();
        b.on_set_placement("server-1", day(19)).unwrap();

        let history = b.build();
        assert_eq!(history.tenancy, Tenancy::SoleTenant);
        assert!(history.image.is_none());
        assert_eq!(history.state, InstanceHistoryState::MissingStopEvent);
    }

    #[test]
    fn test_missing_tenancy_and_name() {
        let mut b = InstanceHistoryBuilder::for_deleted_instance(1).unwrap();
        b.on_stop(day(31), None).unwrap();
        assert_eq!(b.state(), InstanceHistoryState::MissingTenancy);

        b.on_start(day(30), None).unwrap();
        assert_eq!(b.state(), InstanceHistoryState::MissingName);
        assert_eq!(b.tenancy(), Tenancy::Fleet);

        b.on_insert(day(29), Some(&reference()), None).unwrap();
        // Fleet instances do not need an image
        assert_eq!(b.state(), InstanceHistoryState::Complete);
    }

    #[test]
    fn test_stop_bounds_earlier_placement_separately() {
        let mut b = InstanceHistoryBuilder::for_existing_instance(
            1,
            reference(),
            Some(image()),
            InstanceState::Running,
            day(31),
            Tenancy::SoleTenant,
        )
        .unwrap();
        b.on_set_placement("server-2", day(25)).unwrap();
        b.on_stop(day(20), None).unwrap();
        b.on_set_placement("server-1", day(10)).unwrap();
        b.on_insert(day(10), None, None).unwrap();

        let history = b.build();
        assert_eq!(
            history.placements,
            vec![
                Placement::sole_tenant("server-1", day(10), day(20)),
                Placement::sole_tenant("server-2", day(25), day(31)),
            ]
        );
    }

    #[test]
    fn test_migration_between_servers_is_not_merged() {
        let mut b = InstanceHistoryBuilder::for_deleted_instance(1).unwrap();
        b.on_stop(day(31), Some(&reference())).unwrap();
        b.on_set_placement("server-2", day(20)).unwrap();
        b.on_set_placement("server-1", day(10)).unwrap();

        let history = b.build();
        assert_eq!(
            history.placements,
            vec![
                Placement::sole_tenant("server-1", day(10), day(20)),
                Placement::sole_tenant("server-2", day(20), day(31)),
            ]
        );
    }

    #[test]
    fn test_fleet_instance_restarts() {
        let mut b = InstanceHistoryBuilder::for_existing_instance(
            1,
            reference(),
            None,
            InstanceState::Running,
            day(31),
            Tenancy::Fleet,
        )
        .unwrap();
        b.on_start(day(20), None).unwrap();
        b.on_stop(day(15), None).unwrap();
        b.on_start(day(10), None).unwrap();

        let history = b.build();
        assert_eq!(
            history.placements,
            vec![Placement::fleet(day(10), day(15)), Placement::fleet(day(20), day(31))]
        );
        assert_eq!(history.state, InstanceHistoryState::Complete);
    }

    #[test]
    fn test_terminated_instance_has_no_seed() {
        let mut b = InstanceHistoryBuilder::for_existing_instance(
            1,
            reference(),
            None,
            InstanceState::Terminated,
            day(31),
            Tenancy::Fleet,
        )
        .unwrap();
        assert!(b.build().placements.is_empty());

        b.on_stop(day(20), None).unwrap();
        b.on_start(day(10), None).unwrap();
        assert_eq!(b.build().placements, vec![Placement::fleet(day(10), day(20))]);
    }

    #[test]
    fn test_out_of_order_event_rejected() {
        let mut b = InstanceHistoryBuilder::for_deleted_instance(1).unwrap();
        b.on_stop(day(20), None).unwrap();

        assert!(matches!(
            b.on_start(day(21), None),
            Err(HistoryError::OutOfOrder { .. })
        ));

        let mut existing = InstanceHistoryBuilder::for_existing_instance(
            2,
            reference(),
            None,
            InstanceState::Running,
            day(20),
            Tenancy::Fleet,
        )
        .unwrap();
        assert!(existing.on_start(day(21), None).is_err());
    }

    #[test]
    fn test_reference_first_writer_wins() {
        let newer = InstanceLocator::new("project-1", "zone-1", "renamed");
        let mut b = InstanceHistoryBuilder::for_deleted_instance(1).unwrap();
        b.on_stop(day(20), Some(&newer)).unwrap();
        b.on_start(day(10), Some(&reference())).unwrap();

        assert_eq!(b.build().reference, Some(newer));
    }
}
