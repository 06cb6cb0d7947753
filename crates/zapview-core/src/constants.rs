//! Application-wide constants
//!
//! Event kinds, default relay lists and display defaults shared across modules.

/// Name given to senders whose profile cannot be resolved
pub const DEFAULT_PROFILE_NAME: &str = "anonymous";

/// Name shown for a profile that exists but carries no usable name
pub const NAMELESS_PROFILE_NAME: &str = "nameless";

/// Relays queried for kind:0 profile metadata
pub const DEFAULT_PROFILE_RELAYS: &[&str] = &[
    "wss://relay.nostr.band",
    "wss://purplepag.es",
    "wss://relay.damus.io",
    "wss://nostr.wine",
    "wss://directory.yabu.me",
];

/// Base URL of the nostr.band aggregate stats API
pub const DEFAULT_STATS_API_URL: &str = "https://api.nostr.band";

/// Default for the view colour mode when none (or an unparsable value) is given
pub const DEFAULT_COLOR_MODE: bool = true;

// Nostr event kinds used by the zap pipeline
pub mod kinds {
    /// Metadata (profiles)
    pub const METADATA: u16 = 0;
    /// Text note
    pub const TEXT_NOTE: u16 = 1;
    /// Channel creation
    pub const CHANNEL_CREATION: u16 = 40;
    /// Channel message
    pub const CHANNEL_MESSAGE: u16 = 42;
    /// Zap request (embedded in the receipt's description tag)
    pub const ZAP_REQUEST: u16 = 9734;
    /// Zap receipt
    pub const ZAP_RECEIPT: u16 = 9735;
    /// Long-form article
    pub const LONG_FORM: u16 = 30023;
    /// Badge definition
    pub const BADGE_DEFINITION: u16 = 30009;
    /// Emoji set
    pub const EMOJI_SET: u16 = 30030;
    /// Handler information (NIP-89)
    pub const HANDLER_INFORMATION: u16 = 31990;

    /// Kinds a zap receipt may point at through its `e` tag
    pub const REFERENCE_KINDS: &[u16] = &[
        TEXT_NOTE,
        LONG_FORM,
        EMOJI_SET,
        BADGE_DEFINITION,
        CHANNEL_CREATION,
        CHANNEL_MESSAGE,
        HANDLER_INFORMATION,
    ];
}
