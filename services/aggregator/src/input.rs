//! Connect-input classification.
//!
//! Supported inputs:
//! - Broadcast id: `lv12345`, or any URL containing a `/lv12345` path
//!   segment; routed to the niconico pipeline.
//! - Everything else is treated as a Twitch channel: lowercased, stripped
//!   of a leading `#` and of a `https://(www.)?twitch.tv/` prefix.

use std::fmt;

// ---------------------------------------------------------------------------
// BroadcastId
// ---------------------------------------------------------------------------

/// An `lv`-prefixed broadcast identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastId(String);

impl BroadcastId {
    /// Parse `lv` followed by at least one digit, nothing else.
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("lv")?;
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            Some(BroadcastId(s.to_owned()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Where a connect input is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Niconico(BroadcastId),
    /// Normalized channel name, ready for an IRC JOIN.
    Twitch(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("empty input")]
    Empty,
}

/// Classify a raw connect input.
pub fn classify(input: &str) -> Result<ConnectTarget, InputError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InputError::Empty);
    }

    if let Some(id) = BroadcastId::parse(trimmed) {
        return Ok(ConnectTarget::Niconico(id));
    }
    if let Some(id) = broadcast_id_in_path(trimmed) {
        return Ok(ConnectTarget::Niconico(id));
    }

    let channel = normalize_twitch_channel(trimmed);
    if channel.is_empty() {
        return Err(InputError::Empty);
    }
    Ok(ConnectTarget::Twitch(channel))
}

/// Scan for a `/lv<digits>` path segment.
fn broadcast_id_in_path(input: &str) -> Option<BroadcastId> {
    let mut rest = input;
    while let Some(pos) = rest.find("/lv") {
        let candidate = &rest[pos + 1..];
        let digit_len = candidate[2..]
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
        if digit_len > 0 {
            let end = 2 + digit_len;
            // The id must be a whole path segment.
            let terminated = candidate[end..]
                .chars()
                .next()
                .is_none_or(|c| matches!(c, '/' | '?' | '#' | '&'));
            if terminated {
                return BroadcastId::parse(&candidate[..end]);
            }
        }
        rest = &rest[pos + 3..];
    }
    None
}

fn normalize_twitch_channel(input: &str) -> String {
    let mut channel = input.to_lowercase();
    for prefix in [
        "https://www.twitch.tv/",
        "https://twitch.tv/",
        "http://www.twitch.tv/",
        "http://twitch.tv/",
    ] {
        if let Some(rest) = channel.strip_prefix(prefix) {
            // Drop any trailing path or query after the channel segment.
            let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
            channel = rest[..end].to_owned();
            break;
        }
    }
    channel.trim_start_matches('#').to_owned()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn niconico(input: &str) -> ConnectTarget {
        classify(input).unwrap()
    }

    #[test]
    fn bare_broadcast_id() {
        assert_eq!(
            niconico("lv42"),
            ConnectTarget::Niconico(BroadcastId::parse("lv42").unwrap())
        );
        assert_eq!(
            niconico("  lv346883570  "),
            ConnectTarget::Niconico(BroadcastId::parse("lv346883570").unwrap())
        );
    }

    #[test]
    fn broadcast_id_inside_url() {
        assert_eq!(
            niconico("https://live.nicovideo.jp/watch/lv346883570"),
            ConnectTarget::Niconico(BroadcastId::parse("lv346883570").unwrap())
        );
        assert_eq!(
            niconico("https://live.nicovideo.jp/watch/lv42?ref=top"),
            ConnectTarget::Niconico(BroadcastId::parse("lv42").unwrap())
        );
    }

    #[test]
    fn lv_prefix_without_digits_is_not_a_broadcast() {
        assert_eq!(niconico("lvxyz"), ConnectTarget::Twitch("lvxyz".to_owned()));
        assert_eq!(
            niconico("https://example.com/lvl/9"),
            ConnectTarget::Twitch("https://example.com/lvl/9".to_owned())
        );
    }

    #[test]
    fn twitch_channel_is_lowercased() {
        assert_eq!(
            niconico("SomeStreamer"),
            ConnectTarget::Twitch("somestreamer".to_owned())
        );
    }

    #[test]
    fn twitch_hash_prefix_is_stripped() {
        assert_eq!(
            niconico("#somechan"),
            ConnectTarget::Twitch("somechan".to_owned())
        );
    }

    #[test]
    fn twitch_url_prefixes_are_stripped() {
        for input in [
            "https://www.twitch.tv/SomeChan",
            "https://twitch.tv/somechan",
            "https://twitch.tv/somechan/videos",
            "https://www.twitch.tv/somechan?referrer=raid",
        ] {
            assert_eq!(
                niconico(input),
                ConnectTarget::Twitch("somechan".to_owned()),
                "input: {input}"
            );
        }
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert_eq!(classify(""), Err(InputError::Empty));
        assert_eq!(classify("   "), Err(InputError::Empty));
        assert_eq!(classify("#"), Err(InputError::Empty));
        assert_eq!(classify("https://twitch.tv/"), Err(InputError::Empty));
    }
}
