//! Invite URL handling.
//!
//! Three invite surfaces exist:
//!
//! - `https://host/join/<token>?room=…&coordinator=…#<key>` — remote bus
//! - `local://<path>/join/<token>?room=…&coordinator=…#<key>` — shared
//!   file-backed bus
//! - `data:application/json;base64,<payload>` — self-contained credentials,
//!   claimable without any bus call
//!
//! Coordination metadata (`room`, `coordinator`) is appended as query
//! params on URL-shaped invites and embedded directly into `data:` ones.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use sc_domain::error::{Error, Result};

use crate::types::ClaimedInvite;

const DATA_INVITE_PREFIX: &str = "data:application/json;base64,";

/// Whether the invite is a self-contained `data:` URL.
pub fn is_data_invite(invite_url: &str) -> bool {
    invite_url.starts_with("data:")
}

/// Encode credentials as a self-contained `data:` invite.
pub fn encode_data_invite(invite: &ClaimedInvite) -> Result<String> {
    let json = serde_json::to_string(invite)?;
    Ok(format!("{DATA_INVITE_PREFIX}{}", BASE64.encode(json)))
}

/// Decode a self-contained `data:` invite.
pub fn parse_data_invite(invite_url: &str) -> Result<ClaimedInvite> {
    let payload = invite_url
        .strip_prefix(DATA_INVITE_PREFIX)
        .ok_or_else(|| Error::UnsupportedInvite(truncate(invite_url)))?;
    let decoded = BASE64
        .decode(payload)
        .map_err(|e| Error::Parse(format!("bad base64 in data: invite: {e}")))?;
    let json = String::from_utf8(decoded)
        .map_err(|e| Error::Parse(format!("data: invite is not UTF-8: {e}")))?;
    Ok(serde_json::from_str(&json)?)
}

/// Append `room` / `coordinator` to an invite so the claiming worker can
/// resolve its coordination targets without extra bus calls.
pub fn append_coordination_params(
    invite_url: &str,
    room_id: &str,
    coordinator_id: &str,
) -> Result<String> {
    if is_data_invite(invite_url) {
        let mut invite = parse_data_invite(invite_url)?;
        invite.room_id = Some(room_id.to_owned());
        invite.coordinator_id = Some(coordinator_id.to_owned());
        return encode_data_invite(&invite);
    }

    // Insert query params before the fragment.
    let (base, fragment) = match invite_url.split_once('#') {
        Some((base, frag)) => (base, Some(frag)),
        None => (invite_url, None),
    };
    let sep = if base.contains('?') { '&' } else { '?' };
    let mut out = format!("{base}{sep}room={room_id}&coordinator={coordinator_id}");
    if let Some(frag) = fragment {
        out.push('#');
        out.push_str(frag);
    }
    Ok(out)
}

/// Extract `(room, coordinator)` query params from a URL-shaped invite.
pub fn query_params(invite_url: &str) -> (Option<String>, Option<String>) {
    let base = invite_url.split('#').next().unwrap_or(invite_url);
    let Some((_, query)) = base.split_once('?') else {
        return (None, None);
    };

    let mut room = None;
    let mut coordinator = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("room", v)) if !v.is_empty() => room = Some(v.to_owned()),
            Some(("coordinator", v)) if !v.is_empty() => coordinator = Some(v.to_owned()),
            _ => {}
        }
    }
    (room, coordinator)
}

/// Extract the join token from a URL-shaped invite
/// (`…/join/<token>[?…][#…]`).
pub fn join_token(invite_url: &str) -> Option<&str> {
    let base = invite_url.split(['?', '#']).next()?;
    let (_, token) = base.rsplit_once("/join/")?;
    (!token.is_empty() && !token.contains('/')).then_some(token)
}

fn truncate(url: &str) -> String {
    url.chars().take(50).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> ClaimedInvite {
        ClaimedInvite {
            identity_id: "id-1".into(),
            identity_secret: "sec-1".into(),
            ns_id: "ns-1".into(),
            ns_secret: "ns-sec".into(),
            room_id: None,
            coordinator_id: None,
            display_name: Some("Worker".into()),
        }
    }

    #[test]
    fn data_invite_roundtrip() {
        let url = encode_data_invite(&invite()).unwrap();
        assert!(url.starts_with("data:application/json;base64,"));
        assert_eq!(parse_data_invite(&url).unwrap(), invite());
    }

    #[test]
    fn data_invite_wrong_media_type_refused() {
        let err = parse_data_invite("data:text/plain;base64,aGk=").unwrap_err();
        assert_eq!(err.kind(), "UnsupportedInvite");
    }

    #[test]
    fn append_params_to_url_invite() {
        let out = append_coordination_params(
            "https://drop.example/join/tok123#key456",
            "room-9",
            "coord-7",
        )
        .unwrap();
        assert_eq!(
            out,
            "https://drop.example/join/tok123?room=room-9&coordinator=coord-7#key456"
        );
        assert_eq!(
            query_params(&out),
            (Some("room-9".into()), Some("coord-7".into()))
        );
    }

    #[test]
    fn append_params_respects_existing_query() {
        let out = append_coordination_params(
            "local:///tmp/drop.json/join/tok?x=1",
            "r",
            "c",
        )
        .unwrap();
        assert_eq!(out, "local:///tmp/drop.json/join/tok?x=1&room=r&coordinator=c");
    }

    #[test]
    fn append_params_to_data_invite_embeds_fields() {
        let url = encode_data_invite(&invite()).unwrap();
        let out = append_coordination_params(&url, "room-9", "coord-7").unwrap();
        let claimed = parse_data_invite(&out).unwrap();
        assert_eq!(claimed.room_id.as_deref(), Some("room-9"));
        assert_eq!(claimed.coordinator_id.as_deref(), Some("coord-7"));
    }

    #[test]
    fn join_token_extraction() {
        assert_eq!(
            join_token("https://drop.example/join/abc123?room=r#key"),
            Some("abc123")
        );
        assert_eq!(join_token("local:///tmp/d/join/tok#k"), Some("tok"));
        assert_eq!(join_token("https://drop.example/nothing"), None);
        assert_eq!(join_token("https://drop.example/join/"), None);
    }

    #[test]
    fn query_params_absent() {
        assert_eq!(query_params("https://drop.example/join/t#k"), (None, None));
    }
}
