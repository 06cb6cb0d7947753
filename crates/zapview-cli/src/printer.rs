use std::collections::HashMap;

use chrono::DateTime;
use nostr_sdk::{PublicKey, ToBech32};
use zapview_core::models::AmountTier;
use zapview_core::profiles::IdentityStatus;
use zapview_core::{DisplayUpdate, StatsView, ZapEvent};

/// Turns display updates into terminal lines
pub struct Printer {
    color_mode: bool,
    names: HashMap<PublicKey, String>,
}

impl Printer {
    pub fn new(color_mode: bool) -> Self {
        Self {
            color_mode,
            names: HashMap::new(),
        }
    }

    pub fn render(&mut self, update: &DisplayUpdate) -> Vec<String> {
        match update {
            DisplayUpdate::BatchUpdate { zaps, options, .. } => {
                let visible = options.max_visible.unwrap_or(zaps.len()).min(zaps.len());
                let mut lines = vec![format!(
                    "-- {} zap{}{}",
                    zaps.len(),
                    if zaps.len() == 1 { "" } else { "s" },
                    if options.is_initial { " (loading)" } else { "" }
                )];
                lines.extend(zaps[..visible].iter().map(|zap| self.zap_line(zap)));
                if visible < zaps.len() {
                    lines.push(format!("   ... {} more", zaps.len() - visible));
                }
                lines
            }
            DisplayUpdate::Append { zap, .. } => vec![format!("+ {}", self.zap_line(zap))],
            DisplayUpdate::Reference { zap, .. } => match zap.reference() {
                Some(reference) => vec![format!(
                    "  {} zapped kind {}: {}",
                    short_id(&zap.id().to_hex()),
                    reference.kind.as_u16(),
                    preview(&reference.content, 60)
                )],
                None => Vec::new(),
            },
            DisplayUpdate::Profile { pubkey, profile, .. } => {
                self.names.insert(*pubkey, profile.name.clone());
                Vec::new()
            }
            DisplayUpdate::Identity { pubkey, status, .. } => match status {
                IdentityStatus::Verified(address) => {
                    vec![format!("  {} verified as {}", self.name_of(pubkey), address)]
                }
                IdentityStatus::Mismatch => {
                    vec![format!("  {} NIP-05 does not match", self.name_of(pubkey))]
                }
                IdentityStatus::Unknown => Vec::new(),
            },
            DisplayUpdate::Stats { stats, .. } => vec![stats_line(stats)],
            DisplayUpdate::Empty { .. } => vec!["no zaps yet".to_string()],
        }
    }

    fn name_of(&self, pubkey: &PublicKey) -> String {
        self.names
            .get(pubkey)
            .cloned()
            .unwrap_or_else(|| short_npub(pubkey))
    }

    fn zap_line(&self, zap: &ZapEvent) -> String {
        let time = DateTime::from_timestamp(zap.created_at() as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "????-??-?? ??:??".to_string());

        let (sender, comment) = match zap.sender() {
            Some(sender) => (sender.pubkey, sender.comment),
            None => (zap.pubkey(), String::new()),
        };
        let amount = match zap.amount_msats() {
            Some(msats) => {
                let sats = msats / 1000;
                match AmountTier::for_display(sats, self.color_mode) {
                    Some(tier) if tier != AmountTier::Default => format!("{sats} sats [{}]", tier_label(tier)),
                    _ => format!("{sats} sats"),
                }
            }
            None => "? sats".to_string(),
        };

        let mut line = format!("{time}  {amount:>20}  {}", self.name_of(&sender));
        if !comment.is_empty() {
            line.push_str(": ");
            line.push_str(&preview(&comment, 80));
        }
        if zap.is_realtime() {
            line.push_str("  (new)");
        }
        line
    }
}

fn tier_label(tier: AmountTier) -> &'static str {
    match tier {
        AmountTier::Sats10k => "10k+",
        AmountTier::Sats5k => "5k+",
        AmountTier::Sats2k => "2k+",
        AmountTier::Sats1k => "1k+",
        AmountTier::Sats500 => "500+",
        AmountTier::Sats200 => "200+",
        AmountTier::Sats100 => "100+",
        AmountTier::Default => "",
    }
}

fn stats_line(stats: &StatsView) -> String {
    match stats {
        StatsView::Available(stats) => format!(
            "total: {} sats in {} zaps (largest {} sats)",
            stats.sats(),
            stats.count,
            stats.max_sats()
        ),
        StatsView::Unavailable => "total: unavailable".to_string(),
    }
}

fn short_id(hex: &str) -> &str {
    &hex[..hex.len().min(8)]
}

fn short_npub(pubkey: &PublicKey) -> String {
    match pubkey.to_bech32() {
        Ok(npub) => format!("{}...", &npub[..npub.len().min(16)]),
        Err(_) => short_id(&pubkey.to_hex()).to_string(),
    }
}

/// First `max` characters of `text` on one line
fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::{EventBuilder, Keys, Kind, Tag, TagKind, Timestamp};
    use zapview_core::display::BatchUpdateOptions;
    use zapview_core::{Profile, ViewId, ZapStats};

    fn receipt(created_at: u64, sender: &Keys, comment: &str) -> ZapEvent {
        let request = serde_json::json!({
            "kind": 9734,
            "pubkey": sender.public_key().to_hex(),
            "content": comment,
            "tags": [],
            "created_at": created_at,
        });
        let event = EventBuilder::new(Kind::ZapReceipt, "")
            .custom_created_at(Timestamp::from(created_at))
            .tag(Tag::custom(
                TagKind::Custom(std::borrow::Cow::Borrowed("description")),
                vec![request.to_string()],
            ))
            .sign_with_keys(&Keys::generate())
            .unwrap();
        let zap = ZapEvent::new(event, false);
        zap.set_amount_msats(2_100_000);
        zap
    }

    #[test]
    fn test_zap_line_uses_known_profile_name() {
        let sender = Keys::generate();
        let mut printer = Printer::new(true);
        printer.render(&DisplayUpdate::Profile {
            view: ViewId::from("v"),
            pubkey: sender.public_key(),
            profile: Profile {
                name: "alice".to_string(),
                ..Profile::anonymous()
            },
        });

        let line = printer.zap_line(&receipt(0, &sender, "thanks\nfor this"));
        assert!(line.starts_with("1970-01-01 00:00"));
        assert!(line.contains("2100 sats [2k+]"));
        assert!(line.ends_with("alice: thanks for this"));
    }

    #[test]
    fn test_colour_mode_off_hides_tier() {
        let printer = Printer::new(false);
        let line = printer.zap_line(&receipt(0, &Keys::generate(), ""));
        assert!(line.contains("2100 sats"));
        assert!(!line.contains('['));
        assert!(line.contains("npub1"));
    }

    #[test]
    fn test_batch_respects_max_visible() {
        let sender = Keys::generate();
        let zaps = (0..3)
            .map(|i| std::sync::Arc::new(receipt(i, &sender, "")))
            .collect();
        let mut printer = Printer::new(true);
        let lines = printer.render(&DisplayUpdate::BatchUpdate {
            view: ViewId::from("v"),
            zaps,
            options: BatchUpdateOptions {
                is_initial: true,
                max_visible: Some(2),
                color_mode: true,
            },
        });
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "-- 3 zaps (loading)");
        assert_eq!(lines[3], "   ... 1 more");
    }

    #[test]
    fn test_stats_line() {
        let stats = ZapStats::default().increment(21_000).increment(1_000_000);
        assert_eq!(
            stats_line(&StatsView::Available(stats)),
            "total: 1021 sats in 2 zaps (largest 1000 sats)"
        );
        assert_eq!(stats_line(&StatsView::Unavailable), "total: unavailable");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("a  b\tc", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
