//! Device tokens: canonical form, platform routing and environment mode.
//!
//! A token reaches the engine as whatever string the device SDK produced.
//! [`normalize`] turns it into the canonical form used as the registry key,
//! and [`Platform::classify`] decides which transport delivers to it.

// Rust guideline compliant 2026-02

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER_PERMISSIVE;
use serde::{Deserialize, Serialize};

/// Prefix of the description string a broken iOS SDK sent instead of the token.
///
/// Such values (`{length = 32, bytes = 0x1234... 0xabcd}`) are truncated and
/// cannot be turned back into a token.
const BROKEN_SDK_SENTINEL: &str = "{length";

/// Length of a Platform-A canonical token in hex characters.
pub const APNS_TOKEN_HEX_LEN: usize = 64;

/// Width of one group in the historical space-separated token encoding.
const LEGACY_CHUNK_LEN: usize = 8;

/// Recipient environment, selecting which gateway host a send targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Production gateways.
    #[serde(rename = "P")]
    Production,
    /// Sandbox gateways, used by development builds.
    #[serde(rename = "D")]
    Development,
}

impl Mode {
    /// Whether this is the production environment.
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p" | "prod" | "production" => Ok(Self::Production),
            "d" | "dev" | "development" | "sandbox" => Ok(Self::Development),
            other => Err(format!("unknown mode '{other}' (expected production or development)")),
        }
    }
}

/// One registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    /// Canonical token string; unique across the registry.
    pub token: String,
    /// Recipient owning the device.
    pub owner_id: i64,
    /// Gateway environment the token was issued for.
    pub mode: Mode,
    /// Last (re-)registration time.
    pub registered_at: DateTime<Utc>,
}

impl DeviceToken {
    /// Build a row stamped with the current time.
    pub fn new(token: impl Into<String>, owner_id: i64, mode: Mode) -> Self {
        Self {
            token: token.into(),
            owner_id,
            mode,
            registered_at: Utc::now(),
        }
    }

    /// Transport family this token is delivered through.
    pub fn platform(&self) -> Platform {
        Platform::classify(&self.token)
    }
}

/// Device family, decided purely from the token shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// 64 hex characters: delivered through an Apple transport.
    Apple,
    /// Any other shape: delivered through the broadcast transport.
    Broadcast,
}

impl Platform {
    /// Route a canonical token.
    ///
    /// Exactly 64 hexadecimal characters is Platform-A; everything else is
    /// Platform-B. There is no other disambiguation signal.
    pub fn classify(token: &str) -> Self {
        if token.len() == APNS_TOKEN_HEX_LEN && token.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::Apple
        } else {
            Self::Broadcast
        }
    }
}

/// Canonicalize a raw token, or return `None` when it is unusable.
///
/// Strips all whitespace and the `<...>` wrapper older SDKs put around the
/// chunked hex form. Platform-A tokens are lowercased, matching the form
/// the feedback service reports them in. Empty tokens and the broken-SDK
/// description string are rejected.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with(BROKEN_SDK_SENTINEL) {
        return None;
    }

    let unwrapped = trimmed
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(trimmed);

    let canonical = fold_case(unwrapped.chars().filter(|c| !c.is_whitespace()).collect());
    if canonical.is_empty() {
        None
    } else {
        Some(canonical)
    }
}

/// Lowercase Platform-A tokens; leave every other shape untouched.
fn fold_case(token: String) -> String {
    if Platform::classify(&token) == Platform::Apple {
        token.to_ascii_lowercase()
    } else {
        token
    }
}

/// Historical encoding: 8-character groups separated by single spaces.
pub fn chunked(token: &str) -> String {
    token
        .as_bytes()
        .chunks(LEGACY_CHUNK_LEN)
        .map(|chunk| String::from_utf8_lossy(chunk))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every stored spelling a token may have: as given, canonical, and chunked.
///
/// Used by unregistration so rows written before normalization existed stay
/// purgeable. Platform-A tokens also match their uppercase spellings.
pub fn spellings(token: &str) -> Vec<String> {
    let mut out = vec![token.to_string()];
    let canonical = fold_case(token.chars().filter(|c| !c.is_whitespace()).collect());

    let mut candidates = vec![chunked(&canonical), canonical.clone()];
    if Platform::classify(&canonical) == Platform::Apple {
        let upper = canonical.to_ascii_uppercase();
        candidates.push(chunked(&upper));
        candidates.push(upper);
    }

    for candidate in candidates {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Decode a Platform-A canonical token into its 32 raw bytes.
pub fn decode_apns(token: &str) -> Option<[u8; 32]> {
    if token.len() != APNS_TOKEN_HEX_LEN {
        return None;
    }
    let bytes = HEXLOWER_PERMISSIVE.decode(token.as_bytes()).ok()?;
    bytes.try_into().ok()
}

/// Encode 32 raw token bytes as the lowercase hex canonical form.
pub fn encode_apns(raw: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(raw)
}

/// Shorten a token for log lines.
pub(crate) fn short(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map_or(token.len(), |(idx, _)| idx);
    &token[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_TOKEN: &str = "0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9";

    #[test]
    fn test_normalize_strips_whitespace() {
        let raw = "0a1b2c3d 4e5f6071 8293a4b5 c6d7e8f9 0a1b2c3d 4e5f6071 8293a4b5 c6d7e8f9";
        assert_eq!(normalize(raw).as_deref(), Some(HEX_TOKEN));
        assert_eq!(normalize(&format!("  {HEX_TOKEN}\n")).as_deref(), Some(HEX_TOKEN));
    }

    #[test]
    fn test_normalize_unwraps_angle_brackets() {
        let raw = format!("<{}>", chunked(HEX_TOKEN));
        assert_eq!(normalize(&raw).as_deref(), Some(HEX_TOKEN));
    }

    #[test]
    fn test_normalize_rejects_sentinel_and_empty() {
        assert_eq!(normalize("{length = 32, bytes = 0x0a1b2c3d ... 8293a4b5 }"), None);
        assert_eq!(normalize("   "), None);
        assert_eq!(normalize("<>"), None);
    }

    #[test]
    fn test_normalize_keeps_broadcast_tokens_verbatim() {
        let fcm = "dQw4w9WgXcQ:APA91bHun4MxP5egoKMwt2KZFBaFUH-1RYqx";
        assert_eq!(normalize(fcm).as_deref(), Some(fcm));
    }

    #[test]
    fn test_classify() {
        assert_eq!(Platform::classify(HEX_TOKEN), Platform::Apple);
        assert_eq!(Platform::classify(&HEX_TOKEN.to_uppercase()), Platform::Apple);
        assert_eq!(Platform::classify(&HEX_TOKEN[..63]), Platform::Broadcast);
        assert_eq!(Platform::classify(&format!("{HEX_TOKEN}0")), Platform::Broadcast);

        let not_hex = format!("{}zz", &HEX_TOKEN[..62]);
        assert_eq!(Platform::classify(&not_hex), Platform::Broadcast);
        assert_eq!(Platform::classify("APA91bHun4MxP5egoKMwt2KZFBaFUH"), Platform::Broadcast);
    }

    #[test]
    fn test_chunked_and_spellings() {
        let groups = chunked(HEX_TOKEN);
        assert_eq!(groups.split(' ').count(), 8);
        assert!(groups.starts_with("0a1b2c3d 4e5f6071"));

        let upper = HEX_TOKEN.to_uppercase();
        let from_canonical = spellings(HEX_TOKEN);
        assert_eq!(
            from_canonical,
            vec![HEX_TOKEN.to_string(), groups.clone(), chunked(&upper), upper.clone()]
        );

        let from_chunked = spellings(&groups);
        assert!(from_chunked.contains(&HEX_TOKEN.to_string()));
        assert!(from_chunked.contains(&groups));
        assert!(from_chunked.contains(&upper));
        assert_eq!(from_chunked.len(), 4);

        let broadcast = spellings("fcm:abc");
        assert_eq!(broadcast, vec!["fcm:abc".to_string()]);
    }

    #[test]
    fn test_normalize_lowercases_apple_tokens() {
        let upper = HEX_TOKEN.to_uppercase();
        assert_eq!(normalize(&upper).as_deref(), Some(HEX_TOKEN));
        assert_eq!(normalize(&chunked(&upper)).as_deref(), Some(HEX_TOKEN));

        let mixed_fcm = "APA91bHun4MxP5egoKMwt2KZFBaFUH";
        assert_eq!(normalize(mixed_fcm).as_deref(), Some(mixed_fcm));
    }

    #[test]
    fn test_decode_encode_apns() {
        let raw = decode_apns(HEX_TOKEN).expect("valid token");
        assert_eq!(raw[0], 0x0a);
        assert_eq!(raw[31], 0xf9);
        assert_eq!(encode_apns(&raw), HEX_TOKEN);

        assert!(decode_apns(&HEX_TOKEN.to_uppercase()).is_some());
        assert!(decode_apns("abcd").is_none());
    }

    #[test]
    fn test_mode_parse_and_serde() {
        assert_eq!("production".parse::<Mode>(), Ok(Mode::Production));
        assert_eq!("D".parse::<Mode>(), Ok(Mode::Development));
        assert!("staging".parse::<Mode>().is_err());

        assert_eq!(serde_json::to_string(&Mode::Development).unwrap(), "\"D\"");
    }

    #[test]
    fn test_short() {
        assert_eq!(short(HEX_TOKEN), "0a1b2c3d");
        assert_eq!(short("abc"), "abc");
    }
}
