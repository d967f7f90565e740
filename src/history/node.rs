//! Sole-tenant node occupancy derived from instance histories.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::InstanceHistory;
use super::instance_set::InstanceSetHistory;
use super::timeseries::{daily_high_watermarks, high_watermark, DataPoint};
use super::types::Tenancy;

/// One interval during which an instance occupied a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePlacement {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub instance: Arc<InstanceHistory>,
}

/// Occupancy timeline of one sole-tenant node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHistory {
    pub server_id: String,
    pub first_use: DateTime<Utc>,
    pub last_use: DateTime<Utc>,
    pub peak_concurrent_placements: u32,
    /// Ordered by start time
    pub placements: Vec<NodePlacement>,
}

impl NodeHistory {
    fn new(server_id: String, mut placements: Vec<NodePlacement>) -> Option<Self> {
        placements.sort_by_key(|p| p.from);

        let first_use = placements.iter().map(|p| p.from).min()?;
        let last_use = placements.iter().map(|p| p.to).max()?;
        let peak_concurrent_placements = high_watermark(placements.iter().map(|p| (p.from, p.to)));

        Some(Self {
            server_id,
            first_use,
            last_use,
            peak_concurrent_placements,
            placements,
        })
    }

    /// Daily peak of concurrent placements on this node within the window.
    pub fn max_placements_by_day(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<DataPoint> {
        let intervals: Vec<_> = self.placements.iter().map(|p| (p.from, p.to)).collect();
        daily_high_watermarks(&intervals, window_start, window_end)
    }
}

/// Occupancy timelines for all nodes used by a set of instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSetHistory {
    /// Ordered by server ID
    pub nodes: Vec<NodeHistory>,
}

impl NodeSetHistory {
    /// Group the sole-tenant placements of `instances` by server.
    pub fn from_instance_history(instances: &[InstanceHistory]) -> Self {
        let mut by_server: BTreeMap<String, Vec<NodePlacement>> = BTreeMap::new();

        for instance in instances {
            let shared = Arc::new(instance.clone());
            for placement in &instance.placements {
                if placement.tenancy != Tenancy::SoleTenant {
                    continue;
                }
                let Some(server_id) = &placement.server_id else {
                    continue;
                };

                by_server
                    .entry(server_id.clone())
                    .or_default()
                    .push(NodePlacement {
                        from: placement.from,
                        to: placement.to,
                        instance: shared.clone(),
                    });
            }
        }

        let nodes: Vec<NodeHistory> = by_server
            .into_iter()
            .filter_map(|(server_id, placements)| NodeHistory::new(server_id, placements))
            .collect();

        log::info!("Derived occupancy for {} sole-tenant nodes", nodes.len());
        Self { nodes }
    }

    /// Node histories for the complete part of an instance set.
    pub fn from_instance_set_history(set: &InstanceSetHistory) -> Self {
        Self::from_instance_history(&set.complete)
    }

    pub fn node(&self, server_id: &str) -> Option<&NodeHistory> {
        self.nodes.iter().find(|n| n.server_id == server_id)
    }

    /// Number of nodes with at least one placement on each day of the window.
    pub fn active_nodes_by_day(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<DataPoint> {
        let mut totals: Vec<DataPoint> = Vec::new();

        for node in &self.nodes {
            let daily = node.max_placements_by_day(window_start, window_end);
            if totals.is_empty() {
                totals = daily
                    .iter()
                    .map(|p| DataPoint {
                        timestamp: p.timestamp,
                        value: 0,
                    })
                    .collect();
            }
            for (total, point) in totals.iter_mut().zip(daily) {
                if point.value > 0 {
                    total.value += 1;
                }
            }
        }

        if totals.is_empty() {
            totals = daily_high_watermarks(&[], window_start, window_end);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::placement::Placement;
    use crate::history::types::InstanceHistoryState;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 12, d, 0, 0, 0).unwrap()
    }

    fn instance(id: u64, placements: Vec<Placement>) -> InstanceHistory {
        InstanceHistory {
            instance_id: id,
            reference: None,
            image: None,
            tenancy: Tenancy::SoleTenant,
            state: InstanceHistoryState::Complete,
            placements,
        }
    }

    #[test]
    fn test_groups_placements_by_server() {
        let instances = vec![
            instance(
                1,
                vec![
                    Placement::sole_tenant("server-1", day(1), day(5)),
                    Placement::sole_tenant("server-2", day(6), day(9)),
                ],
            ),
            instance(2, vec![Placement::sole_tenant("server-1", day(3), day(7))]),
            instance(3, vec![Placement::fleet(day(1), day(10))]),
        ];

        let set = NodeSetHistory::from_instance_history(&instances);
        assert_eq!(set.nodes.len(), 2);

        let node = set.node("server-1").unwrap();
        assert_eq!(node.first_use, day(1));
        assert_eq!(node.last_use, day(7));
        assert_eq!(node.peak_concurrent_placements, 2);
        assert_eq!(node.placements.len(), 2);
        assert_eq!(node.placements[1].instance.instance_id, 2);

        let node = set.node("server-2").unwrap();
        assert_eq!(node.peak_concurrent_placements, 1);
        assert_eq!((node.first_use, node.last_use), (day(6), day(9)));
    }

    #[test]
    fn test_peak_counts_simultaneous_placements() {
        let instances: Vec<InstanceHistory> = (1..=3)
            .map(|id| instance(id, vec![Placement::sole_tenant("server-1", day(id as u32), day(10))]))
            .chain(std::iter::once(instance(
                4,
                vec![Placement::sole_tenant("server-1", day(11), day(12))],
            )))
            .collect();

        let set = NodeSetHistory::from_instance_history(&instances);
        assert_eq!(set.nodes[0].peak_concurrent_placements, 3);
    }

    #[test]
    fn test_active_nodes_by_day() {
        let instances = vec![
            instance(1, vec![Placement::sole_tenant("server-1", day(1), day(3))]),
            instance(2, vec![Placement::sole_tenant("server-2", day(2), day(4))]),
        ];
        let set = NodeSetHistory::from_instance_history(&instances);

        let values: Vec<u32> = set
            .active_nodes_by_day(day(1), day(5))
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, vec![1, 2, 1, 0]);

        assert_eq!(
            NodeSetHistory::default().active_nodes_by_day(day(1), day(3)).len(),
            2
        );
    }
}
