//! Core data types for placement history reconstruction.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Numeric instance identity. Names and zones can be reused, IDs cannot.
/// Zero is never a valid ID.
pub type InstanceId = u64;

/// Errors raised by malformed input to the history builders.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Instance ID 0 is not a valid instance ID")]
    ZeroInstanceId,

    #[error("Event at {date} is later than previously processed event at {last}; events must be newest first")]
    OutOfOrder {
        date: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("Invalid {kind} locator: {value}")]
    InvalidLocator { kind: &'static str, value: String },
}

/// Whether a VM ran on shared fleet hardware or a dedicated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tenancy {
    /// Not yet known; never part of a complete history
    Unknown,
    Fleet,
    SoleTenant,
}

impl fmt::Display for Tenancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tenancy::Unknown => write!(f, "unknown"),
            Tenancy::Fleet => write!(f, "fleet"),
            Tenancy::SoleTenant => write!(f, "sole-tenant"),
        }
    }
}

/// Lifecycle state of an instance observed in a live inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Running,
    Terminated,
}

/// How much of an instance's history could be reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceHistoryState {
    Complete,
    /// A placement was seen without any later stop or placement to bound it
    MissingStopEvent,
    MissingTenancy,
    MissingName,
    MissingImage,
}

impl fmt::Display for InstanceHistoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceHistoryState::Complete => "complete",
            InstanceHistoryState::MissingStopEvent => "missing stop event",
            InstanceHistoryState::MissingTenancy => "missing tenancy",
            InstanceHistoryState::MissingName => "missing name",
            InstanceHistoryState::MissingImage => "missing image",
        };
        write!(f, "{}", label)
    }
}

static INSTANCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:.*/)?projects/([^/]+)/zones/([^/]+)/instances/([^/]+)$")
        .expect("Invalid instance locator regex")
});

static IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:.*/)?projects/([^/]+)/global/images/([^/]+)$")
        .expect("Invalid image locator regex")
});

/// Project, zone and name of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceLocator {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl InstanceLocator {
    pub fn new(project: &str, zone: &str, name: &str) -> Self {
        Self {
            project: project.to_string(),
            zone: zone.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for InstanceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/zones/{}/instances/{}",
            self.project, self.zone, self.name
        )
    }
}

impl FromStr for InstanceLocator {
    type Err = HistoryError;

    /// Accepts `projects/p/zones/z/instances/n`, optionally prefixed by a
    /// service URL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = INSTANCE_PATTERN
            .captures(s.trim())
            .ok_or_else(|| HistoryError::InvalidLocator {
                kind: "instance",
                value: s.to_string(),
            })?;
        Ok(Self::new(&caps[1], &caps[2], &caps[3]))
    }
}

/// Project and name of a disk image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageLocator {
    pub project: String,
    pub name: String,
}

impl ImageLocator {
    pub fn new(project: &str, name: &str) -> Self {
        Self {
            project: project.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/global/images/{}", self.project, self.name)
    }
}

impl FromStr for ImageLocator {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = IMAGE_PATTERN
            .captures(s.trim())
            .ok_or_else(|| HistoryError::InvalidLocator {
                kind: "image",
                value: s.to_string(),
            })?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(InstanceLocator);
string_serde!(ImageLocator);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_locator() {
        let locator: InstanceLocator = "projects/proj-1/zones/us-central1-a/instances/vm-1"
            .parse()
            .unwrap();
        assert_eq!(locator, InstanceLocator::new("proj-1", "us-central1-a", "vm-1"));
        assert_eq!(
            locator.to_string(),
            "projects/proj-1/zones/us-central1-a/instances/vm-1"
        );

        let prefixed: InstanceLocator =
            "https://compute.example.com/compute/v1/projects/p/zones/z/instances/n"
                .parse()
                .unwrap();
        assert_eq!(prefixed, InstanceLocator::new("p", "z", "n"));
    }

    #[test]
    fn test_parse_invalid_locator() {
        assert!(matches!(
            "projects/p/zones/z".parse::<InstanceLocator>(),
            Err(HistoryError::InvalidLocator { kind: "instance", .. })
        ));
        assert!("projects/p/zones/z/instances/n".parse::<ImageLocator>().is_err());
    }

    #[test]
    fn test_image_locator_serde() {
        let image = ImageLocator::new("windows-cloud", "windows-server-2019");
        let json = serde_json::to_string(&image).unwrap();
        assert_eq!(json, "\"projects/windows-cloud/global/images/windows-server-2019\"");
        assert_eq!(serde_json::from_str::<ImageLocator>(&json).unwrap(), image);
    }
}
