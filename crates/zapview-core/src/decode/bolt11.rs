use super::InvoiceDecoder;

const MSATS_PER_BTC: u64 = 100_000_000_000;

/// Reads the amount from a bolt11 invoice's human-readable part.
///
/// Only the amount is needed, so the data part and signature are not checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bolt11AmountDecoder;

impl InvoiceDecoder for Bolt11AmountDecoder {
    fn amount_msats(&self, invoice: &str) -> Option<u64> {
        let invoice = invoice.trim().to_ascii_lowercase();
        let invoice = invoice.strip_prefix("lightning:").unwrap_or(&invoice);
        let separator = invoice.rfind('1')?;
        let hrp = invoice[..separator].strip_prefix("ln")?;

        // Currency prefix (bc, tb, bcrt, ...) runs up to the first digit
        let amount_start = hrp.find(|c: char| c.is_ascii_digit())?;
        let amount_part = &hrp[amount_start..];

        let multiplier = amount_part.chars().last()?;
        let (digits, multiplier) = match multiplier {
            c if c.is_ascii_digit() => (amount_part, None),
            c => (amount_part.strip_suffix(c)?, Some(c)),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let value: u64 = digits.parse().ok()?;

        match multiplier {
            None => value.checked_mul(MSATS_PER_BTC),
            Some('m') => value.checked_mul(100_000_000),
            Some('u') => value.checked_mul(100_000),
            Some('n') => value.checked_mul(100),
            // Pico-bitcoin amounts must land on whole millisatoshis
            Some('p') if value % 10 == 0 => Some(value / 10),
            _ => None,
        }
    }
}
