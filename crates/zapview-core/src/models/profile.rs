use nostr_sdk::Event;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PROFILE_NAME, NAMELESS_PROFILE_NAME};

/// Sender profile as shown next to a zap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Resolved display name, never empty
    pub name: String,
    pub display_name: Option<String>,
    pub picture: Option<String>,
    pub about: Option<String>,
    pub nip05: Option<String>,
    /// `created_at` of the kind:0 event this was parsed from
    #[serde(skip)]
    pub event_created_at: Option<u64>,
}

/// Loose shape of kind:0 content; every field optional
#[derive(Deserialize)]
struct MetadataContent {
    name: Option<String>,
    display_name: Option<String>,
    #[serde(rename = "displayName")]
    display_name_camel: Option<String>,
    picture: Option<String>,
    about: Option<String>,
    nip05: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Profile {
    /// The canonical profile used whenever metadata is missing or unusable
    pub fn anonymous() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            display_name: Some(DEFAULT_PROFILE_NAME.to_string()),
            picture: None,
            about: None,
            nip05: None,
            event_created_at: None,
        }
    }

    /// Parse a kind:0 metadata event. Returns `None` for unparsable content.
    pub fn from_metadata_event(event: &Event) -> Option<Self> {
        let content: MetadataContent = serde_json::from_str(&event.content).ok()?;
        let display_name = non_empty(content.display_name).or(non_empty(content.display_name_camel));
        let name = display_name
            .clone()
            .or(non_empty(content.name))
            .unwrap_or_else(|| NAMELESS_PROFILE_NAME.to_string());

        Some(Self {
            name,
            display_name,
            picture: non_empty(content.picture),
            about: non_empty(content.about),
            nip05: non_empty(content.nip05),
            event_created_at: Some(event.created_at.as_secs()),
        })
    }

    pub fn is_anonymous(&self) -> bool {
        self.event_created_at.is_none() && self.name == DEFAULT_PROFILE_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::{EventBuilder, Keys, Kind, Timestamp};

    fn metadata_event(content: &str) -> Event {
        let keys = Keys::generate();
        EventBuilder::new(Kind::Metadata, content)
            .custom_created_at(Timestamp::from(42))
            .sign_with_keys(&keys)
            .expect("Failed to sign event")
    }

    #[test]
    fn test_display_name_preferred() {
        let event = metadata_event(r#"{"name": "alice", "display_name": "Alice A.", "nip05": "alice@example.com"}"#);
        let profile = Profile::from_metadata_event(&event).unwrap();
        assert_eq!(profile.name, "Alice A.");
        assert_eq!(profile.nip05.as_deref(), Some("alice@example.com"));
        assert_eq!(profile.event_created_at, Some(42));
        assert!(!profile.is_anonymous());
    }

    #[test]
    fn test_falls_back_to_name_then_nameless() {
        let event = metadata_event(r#"{"name": "bob", "display_name": "  "}"#);
        assert_eq!(Profile::from_metadata_event(&event).unwrap().name, "bob");

        let event = metadata_event(r#"{"about": "no names here"}"#);
        assert_eq!(
            Profile::from_metadata_event(&event).unwrap().name,
            NAMELESS_PROFILE_NAME
        );
    }

    #[test]
    fn test_malformed_content() {
        let event = metadata_event("not json");
        assert!(Profile::from_metadata_event(&event).is_none());
        assert!(Profile::anonymous().is_anonymous());
    }
}
