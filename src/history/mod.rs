//! Placement history reconstruction from audit events.
//!
//! Events are replayed newest first into one builder per instance, which
//! yields a list of placements per instance. Sole-tenant placements are then
//! regrouped per node to show how each node was used over time.

pub mod types;
pub mod cursor;
pub mod placement;
pub mod events;
pub mod instance;
pub mod instance_set;
pub mod timeseries;
pub mod node;
pub mod report;

pub use types::*;
pub use placement::{Placement, PLACEMENT_MERGE_THRESHOLD};
pub use events::{load_events, AuditEvent, EventKind, Severity};
pub use instance::{InstanceHistory, InstanceHistoryBuilder};
pub use instance_set::{load_inventory, ExistingInstance, InstanceSetHistory, InstanceSetHistoryBuilder};
pub use timeseries::DataPoint;
pub use node::{NodeHistory, NodePlacement, NodeSetHistory};
pub use report::{generate_json_report, generate_text_report, print_summary, HistoryReport};
