//! Watch-page discovery.
//!
//! The broadcast landing page embeds a JSON blob in
//! `<script id="embedded-data" data-props="...">`; the signaling endpoint
//! URL sits at one of a handful of known paths inside it. Pages that ship
//! without the blob (or with a yet-unknown layout) fall back to scanning
//! the raw HTML for the first `ws://`/`wss://` URL.
//!
//! Discovery failures are config errors: never retried, surfaced to the
//! host, connection destroyed.

use serde_json::Value;

use crate::input::BroadcastId;

/// Probe order for the signaling URL inside the embedded props.
const WATCH_SERVER_PATHS: &[&[&str]] = &[
    &["site", "relive", "watchServer", "url"],
    &["site", "program", "watchServer", "url"],
    &["program", "broadcaster", "socialGroup", "watchServer", "url"],
    &["program", "broadcast", "watchServer", "url"],
    &["watchServer", "url"],
];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("watch page fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("watch page carries no signaling URL")]
    MissingSignalingUrl,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Fetch the watch page and extract the signaling endpoint URL.
///
/// `base` is the watch-page base URL without a trailing slash
/// (`https://live.nicovideo.jp/watch` in production).
pub async fn discover_signaling_url(
    client: &reqwest::Client,
    base: &str,
    broadcast_id: &BroadcastId,
) -> Result<String, PageError> {
    let html = client
        .get(format!("{base}/{broadcast_id}"))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    extract_signaling_url(&html).ok_or(PageError::MissingSignalingUrl)
}

/// Pure extraction half of [`discover_signaling_url`].
pub fn extract_signaling_url(html: &str) -> Option<String> {
    if let Some(props) = extract_embedded_props(html) {
        if let Some(url) = find_watch_server_url(&props) {
            return Some(url);
        }
    }
    scan_for_ws_url(html)
}

/// Locate the `embedded-data` script tag and parse its `data-props`
/// attribute as JSON (after HTML entity decoding).
pub fn extract_embedded_props(html: &str) -> Option<Value> {
    let marker = html.find("id=\"embedded-data\"")?;
    let tag_start = html[..marker].rfind('<')?;
    let tag_end = marker + html[marker..].find('>')?;
    let tag = &html[tag_start..tag_end];

    let attr_start = tag.find("data-props=\"")? + "data-props=\"".len();
    let attr_len = tag[attr_start..].find('"')?;
    let decoded = decode_html_entities(&tag[attr_start..attr_start + attr_len]);
    serde_json::from_str(&decoded).ok()
}

fn find_watch_server_url(props: &Value) -> Option<String> {
    for path in WATCH_SERVER_PATHS {
        let mut node = props;
        let mut found = true;
        for key in *path {
            match node.get(key) {
                Some(next) => node = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            if let Some(url) = node.as_str() {
                return Some(url.to_owned());
            }
        }
    }
    None
}

/// Last resort: the first `ws://` or `wss://` URL anywhere in the page.
fn scan_for_ws_url(html: &str) -> Option<String> {
    let start = match (html.find("wss://"), html.find("ws://")) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let rest = &html[start..];
    let end = rest
        .find(|c: char| c == '"' || c == '\'' || c == '<' || c == '&' || c.is_whitespace())
        .unwrap_or(rest.len());
    Some(rest[..end].to_owned())
}

// ---------------------------------------------------------------------------
// HTML entities
// ---------------------------------------------------------------------------

/// Longest entity name this decoder recognizes (`&#x10ffff;`).
const MAX_ENTITY_LEN: usize = 9;

/// Decode the named entities attribute values use (`&amp; &lt; &gt; &quot;
/// &apos; &nbsp;`) plus numeric `&#nnn;` and `&#xhhh;` references.
/// Unrecognized sequences pass through literally.
pub fn decode_html_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let resolved = rest[1..]
            .find(';')
            .filter(|semi| *semi <= MAX_ENTITY_LEN)
            .and_then(|semi| resolve_entity(&rest[1..=semi]).map(|text| (text, semi + 2)));
        match resolved {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_entity(name: &str) -> Option<String> {
    let text = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            return char::from_u32(code).map(String::from);
        }
    };
    Some(text.to_owned())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
