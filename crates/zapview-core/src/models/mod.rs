pub mod profile;
pub mod tag_utils;
pub mod zap;

pub use profile::Profile;
pub use zap::{AmountTier, SharedZap, ZapEvent, ZapSender};
