//! IRCv3 line parsing for the Twitch chat dialect.
//!
//! `@tags :prefix COMMAND params :trailing` with the tag escaping rules
//! from the message-tags spec (`\:` `\s` `\\` `\r` `\n`). Badge and emote
//! tags get dedicated parsers since they feed the normalized message
//! metadata directly.

use std::collections::BTreeMap;

/// One parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcMessage {
    pub tags: BTreeMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse one line (without its CRLF). Returns `None` for blank or
    /// structurally empty lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }
        let mut msg = IrcMessage::default();

        if let Some(tagged) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = tagged.split_once(' ')?;
            for tag in raw_tags.split(';') {
                match tag.split_once('=') {
                    Some((key, value)) => {
                        msg.tags.insert(key.to_owned(), unescape_tag_value(value));
                    }
                    None => {
                        msg.tags.insert(tag.to_owned(), String::new());
                    }
                }
            }
            rest = remainder;
        }

        if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix, remainder) = prefixed.split_once(' ')?;
            msg.prefix = Some(prefix.to_owned());
            rest = remainder;
        }

        let mut parts = rest.splitn(2, ' ');
        msg.command = parts.next()?.to_owned();
        if msg.command.is_empty() {
            return None;
        }

        if let Some(mut params) = parts.next() {
            loop {
                if let Some(trailing) = params.strip_prefix(':') {
                    msg.params.push(trailing.to_owned());
                    break;
                }
                match params.split_once(' ') {
                    Some((param, remainder)) => {
                        if !param.is_empty() {
                            msg.params.push(param.to_owned());
                        }
                        params = remainder;
                    }
                    None => {
                        if !params.is_empty() {
                            msg.params.push(params.to_owned());
                        }
                        break;
                    }
                }
            }
        }

        Some(msg)
    }

    /// The nick half of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split(['!', '@']).next().unwrap_or(prefix))
    }

    /// The trailing parameter (message text for PRIVMSG).
    pub fn text(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Non-empty `display-name` tag, if present.
    pub fn display_name(&self) -> Option<&str> {
        self.tags
            .get("display-name")
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// Undo IRCv3 tag-value escaping.
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Parse a `badges` tag (`subscriber/12,premium/1`) into name -> version.
pub fn parse_badges(tag: &str) -> BTreeMap<String, String> {
    let mut badges = BTreeMap::new();
    for badge in tag.split(',').filter(|b| !b.is_empty()) {
        match badge.split_once('/') {
            Some((name, version)) => badges.insert(name.to_owned(), version.to_owned()),
            None => badges.insert(badge.to_owned(), String::new()),
        };
    }
    badges
}

/// Parse an `emotes` tag (`25:0-4,12-16/1902:6-10`) into
/// emote id -> character ranges.
pub fn parse_emotes(tag: &str) -> BTreeMap<String, Vec<(u32, u32)>> {
    let mut emotes = BTreeMap::new();
    for emote in tag.split('/').filter(|e| !e.is_empty()) {
        let Some((id, raw_ranges)) = emote.split_once(':') else {
            continue;
        };
        let mut ranges = Vec::new();
        for range in raw_ranges.split(',') {
            let Some((start, end)) = range.split_once('-') else {
                continue;
            };
            if let (Ok(start), Ok(end)) = (start.parse(), end.parse()) {
                ranges.push((start, end));
            }
        }
        if !ranges.is_empty() {
            emotes.insert(id.to_owned(), ranges);
        }
    }
    emotes
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ping() {
        let msg = IrcMessage::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.text(), Some("tmi.twitch.tv"));
        assert!(msg.tags.is_empty());
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn privmsg_with_tags() {
        let line = "@badge-info=;badges=moderator/1,subscriber/12;display-name=SomeMod;emotes=25:0-4 :somemod!somemod@somemod.tmi.twitch.tv PRIVMSG #chan :Kappa nice";
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params[0], "#chan");
        assert_eq!(msg.text(), Some("Kappa nice"));
        assert_eq!(msg.nick(), Some("somemod"));
        assert_eq!(msg.display_name(), Some("SomeMod"));
        assert_eq!(msg.tags["badges"], "moderator/1,subscriber/12");
    }

    #[test]
    fn numeric_with_multiple_params() {
        let msg = IrcMessage::parse(":tmi.twitch.tv 001 justinfan123 :Welcome, GLHF!").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["justinfan123", "Welcome, GLHF!"]);
    }

    #[test]
    fn blank_lines_are_none() {
        assert_eq!(IrcMessage::parse(""), None);
        assert_eq!(IrcMessage::parse("\r\n"), None);
    }

    #[test]
    fn tag_unescaping() {
        assert_eq!(unescape_tag_value(r"hi\sthere"), "hi there");
        assert_eq!(unescape_tag_value(r"semi\:colon"), "semi;colon");
        assert_eq!(unescape_tag_value(r"back\\slash"), "back\\slash");
        assert_eq!(unescape_tag_value(r"line\r\nbreak"), "line\r\nbreak");
        assert_eq!(unescape_tag_value(r"trailing\"), "trailing");
    }

    #[test]
    fn system_msg_tag_round_trip() {
        let line = r"@system-msg=5\sraiders\sfrom\sX :tmi.twitch.tv USERNOTICE #chan";
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.tags["system-msg"], "5 raiders from X");
    }

    #[test]
    fn badges_parse() {
        let badges = parse_badges("moderator/1,subscriber/12");
        assert_eq!(badges["moderator"], "1");
        assert_eq!(badges["subscriber"], "12");
        assert!(parse_badges("").is_empty());
    }

    #[test]
    fn emotes_parse() {
        let emotes = parse_emotes("25:0-4,12-16/1902:6-10");
        assert_eq!(emotes["25"], vec![(0, 4), (12, 16)]);
        assert_eq!(emotes["1902"], vec![(6, 10)]);
        assert!(parse_emotes("").is_empty());
    }

    #[test]
    fn empty_tag_value() {
        let msg = IrcMessage::parse("@badge-info=;emote-only PING :x").unwrap();
        assert_eq!(msg.tags["badge-info"], "");
        assert_eq!(msg.tags["emote-only"], "");
    }

    #[test]
    fn nick_from_bare_server_prefix() {
        let msg = IrcMessage::parse(":tmi.twitch.tv RECONNECT").unwrap();
        assert_eq!(msg.command, "RECONNECT");
        assert_eq!(msg.nick(), Some("tmi.twitch.tv"));
        assert!(msg.params.is_empty());
    }
}
