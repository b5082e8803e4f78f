use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Version};

/// Full state of an aggregate captured at one version.
///
/// State-based repositories store nothing else; event-sourced repositories
/// use a snapshot as the baseline and replay only the events recorded after
/// `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,

    /// Aggregate type name, e.g. `"User"`.
    pub aggregate_type: String,

    /// Version of the aggregate at capture time.
    pub version: Version,

    pub timestamp: DateTime<Utc>,

    pub state: serde_json::Value,
}

impl Snapshot {
    /// A snapshot from an already serialized state.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        timestamp: DateTime<Utc>,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            timestamp,
            state,
        }
    }

    /// Captures a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        timestamp: DateTime<Utc>,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_type,
            version,
            timestamp,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the captured state.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Profile {
        name: String,
        friends: Vec<String>,
    }

    #[test]
    fn test_state_survives_capture_and_restore() {
        let profile = Profile {
            name: "John".to_string(),
            friends: vec!["Jane".to_string()],
        };
        let now = Utc::now();

        let snapshot =
            Snapshot::from_state(AggregateId::new(), "User", Version::new(4), now, &profile)
                .unwrap();
        assert_eq!(snapshot.version, Version::new(4));
        assert_eq!(snapshot.timestamp, now);

        let restored: Profile = snapshot.into_state().unwrap();
        assert_eq!(restored, profile);
    }
}
