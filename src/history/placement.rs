//! Placement intervals and their merge rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::Tenancy;

/// Largest gap between two placements that still counts as contiguous.
///
/// Audit logs come from independent sources whose clocks disagree by a few
/// seconds, so placements this close together are treated as one.
pub const PLACEMENT_MERGE_THRESHOLD: Duration = Duration::seconds(30);

/// An interval during which a VM ran on one node or on the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub tenancy: Tenancy,
    /// Only set for sole-tenant placements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Placement {
    pub fn new(
        tenancy: Tenancy,
        server_id: Option<String>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        debug_assert!(from <= to, "placement starts after it ends");
        Self {
            tenancy,
            server_id,
            from,
            to,
        }
    }

    pub fn fleet(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self::new(Tenancy::Fleet, None, from, to)
    }

    pub fn sole_tenant(server_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self::new(Tenancy::SoleTenant, Some(server_id.to_string()), from, to)
    }

    /// Whether `subsequent`, which starts at or after this placement ends,
    /// continues this placement.
    ///
    /// Placements on two different known servers are never adjacent, no
    /// matter how small the gap: that is a migration.
    pub fn is_adjacent(&self, subsequent: &Placement) -> bool {
        let gap = (subsequent.from - self.to).abs();
        if gap > PLACEMENT_MERGE_THRESHOLD {
            return false;
        }

        match (&self.server_id, &subsequent.server_id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Join with an adjacent placement. Sole-tenant evidence wins over
    /// fleet, and a known server ID wins over an absent one.
    pub fn merge(&self, subsequent: &Placement) -> Placement {
        debug_assert!(self.is_adjacent(subsequent));

        let tenancy = match (self.tenancy, subsequent.tenancy) {
            (Tenancy::SoleTenant, _) | (_, Tenancy::SoleTenant) => Tenancy::SoleTenant,
            (Tenancy::Fleet, _) | (_, Tenancy::Fleet) => Tenancy::Fleet,
            _ => Tenancy::Unknown,
        };

        Placement::new(
            tenancy,
            self.server_id.clone().or_else(|| subsequent.server_id.clone()),
            self.from.min(subsequent.from),
            self.to.max(subsequent.to),
        )
    }
}
