//! Tag extraction utilities for parsing Nostr events
//!
//! Provides helper functions to reduce boilerplate when reading tags from events.

use nostr_sdk::Event;

/// Extract a single string value from a tag by name.
/// Returns the first occurrence if multiple tags exist.
pub fn extract_tag_str<'a>(event: &'a Event, tag_name: &str) -> Option<&'a str> {
    event.tags.iter().find_map(|tag| {
        let values = tag.as_slice();
        match values.first() {
            Some(name) if name == tag_name => values.get(1).map(String::as_str),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::{EventBuilder, Keys, Kind, Tag, TagKind};

    fn receipt_event() -> Event {
        let keys = Keys::generate();
        EventBuilder::new(Kind::ZapReceipt, "")
            .tag(Tag::custom(
                TagKind::Custom(std::borrow::Cow::Borrowed("bolt11")),
                vec!["lnbc10u1pjexample"],
            ))
            .tag(Tag::custom(
                TagKind::Custom(std::borrow::Cow::Borrowed("bolt11")),
                vec!["lnbc20u1pjexample"],
            ))
            .tag(Tag::custom(
                TagKind::Custom(std::borrow::Cow::Borrowed("preimage")),
                Vec::<String>::new(),
            ))
            .sign_with_keys(&keys)
            .expect("Failed to sign event")
    }

    #[test]
    fn test_extract_tag_str() {
        let event = receipt_event();
        // First occurrence wins
        assert_eq!(extract_tag_str(&event, "bolt11"), Some("lnbc10u1pjexample"));
        assert_eq!(extract_tag_str(&event, "description"), None);
        // A value-less tag has no string to extract
        assert_eq!(extract_tag_str(&event, "preimage"), None);
    }
}
