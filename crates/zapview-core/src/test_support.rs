//! Builders shared by unit tests across the crate

use nostr_sdk::prelude::*;

use crate::constants::kinds;

/// Shape of a zap receipt to build in tests
#[derive(Default)]
pub struct ZapSpec<'a> {
    pub created_at: u64,
    pub bolt11: Option<&'a str>,
    pub sender: Option<&'a Keys>,
    pub comment: &'a str,
    pub referenced: Option<EventId>,
    pub recipient: Option<PublicKey>,
}

fn custom_tag(name: &'static str, value: String) -> Tag {
    Tag::custom(TagKind::Custom(std::borrow::Cow::Borrowed(name)), vec![value])
}

/// Build and sign a kind:9735 receipt from a throwaway LNURL server key
pub fn zap_receipt(spec: ZapSpec<'_>) -> Event {
    let server = Keys::generate();
    let mut builder = EventBuilder::new(Kind::ZapReceipt, "")
        .custom_created_at(Timestamp::from(spec.created_at));

    if let Some(bolt11) = spec.bolt11 {
        builder = builder.tag(custom_tag("bolt11", bolt11.to_string()));
    }
    if let Some(sender) = spec.sender {
        let request = serde_json::json!({
            "kind": kinds::ZAP_REQUEST,
            "pubkey": sender.public_key().to_hex(),
            "content": spec.comment,
            "tags": [],
            "created_at": spec.created_at,
        });
        builder = builder.tag(custom_tag("description", request.to_string()));
    }
    if let Some(referenced) = spec.referenced {
        builder = builder.tag(Tag::event(referenced));
    }
    if let Some(recipient) = spec.recipient {
        builder = builder.tag(Tag::public_key(recipient));
    }

    builder.sign_with_keys(&server).expect("Failed to sign event")
}

/// Receipt with a decodable amount, the common case in pipeline tests
pub fn paid_zap(created_at: u64, bolt11: &str) -> Event {
    zap_receipt(ZapSpec {
        created_at,
        bolt11: Some(bolt11),
        ..Default::default()
    })
}

/// A plain kind:1 note, used as a reference target
pub fn text_note(content: &str) -> Event {
    let keys = Keys::generate();
    EventBuilder::new(Kind::from(kinds::TEXT_NOTE), content)
        .sign_with_keys(&keys)
        .expect("Failed to sign event")
}
