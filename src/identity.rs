//! Message identity, conversation scope keys and tab session tokens.
//!
//! Identities are short content fingerprints, not unique ids: two nodes with the same text in
//! the same scope hash to the same identity, and the merge treats the second as a duplicate.
//! The hash must stay bit-compatible with records already persisted by earlier builds, so it
//! reproduces the 31-multiplier rolling hash over UTF-16 code units with 32-bit wrapping on
//! the shift only.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

/// Only this many UTF-16 code units of `content + scope key` feed a message identity.
pub const IDENTITY_WINDOW: usize = 200;

const SESSION_TOKEN_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partition key for persisted conversations: page path tail + query, salted with the tab
/// session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the key for `url` within tab session `token`.
    ///
    /// Unparseable URLs hash their raw text so the engine still gets a stable scope.
    pub fn derive(url: &str, token: &SessionToken) -> Self {
        let unique = match Url::parse(url) {
            Ok(parsed) => {
                let path = parsed.path();
                let tail = path
                    .split('/')
                    .filter(|p| !p.is_empty())
                    .next_back()
                    .unwrap_or(path);
                match parsed.query() {
                    Some(q) if !q.is_empty() => format!("{tail}?{q}"),
                    _ => tail.to_string(),
                }
            }
            Err(_) => url.to_string(),
        };
        let hash = rolling_hash(unique.encode_utf16());
        Self(format!("chat_{}_{}", to_base36(hash.unsigned_abs()), token))
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-page-load tab session identifier, `tab_<unix millis>_<9 base-36 chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Slot name under which the token is kept in page-scoped session storage.
    pub const SLOT: &'static str = "chatTrackerTabId";

    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0).unsigned_abs();
        let mut suffix = to_base36(rand::random::<u64>());
        suffix.truncate(SESSION_TOKEN_SUFFIX_LEN);
        Self(format!("tab_{millis}_{suffix}"))
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a message node: hash of its text followed by the scope key, truncated to
/// [`IDENTITY_WINDOW`] code units.
pub fn message_identity(content: &str, scope: &ScopeKey) -> MessageId {
    let units = content
        .encode_utf16()
        .chain(scope.as_str().encode_utf16())
        .take(IDENTITY_WINDOW);
    MessageId(to_base36(rolling_hash(units).unsigned_abs()))
}

/// Length of `text` in UTF-16 code units, the unit every persisted length limit is stated in.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Longest prefix of `text` spanning at most `units` UTF-16 code units. A surrogate pair that
/// would straddle the limit is dropped whole.
pub fn utf16_prefix(text: &str, units: usize) -> &str {
    let mut used = 0;
    for (at, c) in text.char_indices() {
        used += c.len_utf16();
        if used > units {
            return &text[..at];
        }
    }
    text
}

/// `h = int32(int32(h) << 5) - h + unit`, accumulated without truncation.
fn rolling_hash(units: impl Iterator<Item = u16>) -> i64 {
    units.fold(0i64, |hash, unit| {
        let shifted = i64::from((hash as i32).wrapping_shl(5));
        shifted.wrapping_sub(hash).wrapping_add(i64::from(unit))
    })
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn token() -> SessionToken {
        SessionToken::new("tab_1_abc")
    }

    #[test]
    fn identity_matches_persisted_vectors() {
        let empty = ScopeKey::new("");
        assert_eq!(message_identity("hello", &empty).as_str(), "1n1e4y");
        assert_eq!(
            message_identity("héllo wörld 🎉 emoji", &empty).as_str(),
            "1rfs09y"
        );
        let scope = ScopeKey::new("chat_abc_tab_1_x");
        assert_eq!(
            message_identity("Hello there, how are you?", &scope).as_str(),
            "36p0xha"
        );
    }

    #[test]
    fn utf16_prefix_never_splits_a_surrogate_pair() {
        assert_eq!(utf16_len("👍👍👍"), 6);
        assert_eq!(utf16_prefix("👍👍👍", 4), "👍👍");
        assert_eq!(utf16_prefix("👍👍👍", 3), "👍");
        assert_eq!(utf16_prefix("ab👍", 2), "ab");
        assert_eq!(utf16_prefix("short", 50), "short");
        assert_eq!(utf16_prefix("", 0), "");
    }

    #[test]
    fn identity_ignores_text_past_window() {
        let long = "x".repeat(500);
        let a = message_identity(&long, &ScopeKey::new("chat_a_tab"));
        let b = message_identity(&long, &ScopeKey::new("chat_b_tab"));
        assert_eq!(a.as_str(), "24z2by8");
        assert_eq!(a, b);
    }

    #[test]
    fn identity_depends_on_scope_for_short_text() {
        let a = message_identity("same words", &ScopeKey::new("chat_a_tab"));
        let b = message_identity("same words", &ScopeKey::new("chat_b_tab"));
        assert_ne!(a, b);
    }

    #[test]
    fn scope_key_uses_path_tail_and_query() {
        assert_eq!(
            ScopeKey::derive("https://claude.ai/chat/0f3c-11aa?x=1", &token()).as_str(),
            "chat_1aqztjo_tab_1_abc"
        );
        assert_eq!(
            ScopeKey::derive("https://chatgpt.com/c/abc-123", &token()).as_str(),
            "chat_1f1wthj_tab_1_abc"
        );
        // root path has no segments; the whole path is hashed
        assert_eq!(
            ScopeKey::derive("https://chatgpt.com/", &token()).as_str(),
            "chat_1b_tab_1_abc"
        );
    }

    #[test]
    fn scope_key_ignores_fragment_and_parent_segments() {
        let a = ScopeKey::derive("https://chatgpt.com/c/abc-123#frag", &token());
        let b = ScopeKey::derive("https://chatgpt.com/g/other/c/abc-123", &token());
        assert_eq!(a, b);
    }

    #[test]
    fn scope_key_changes_with_session_token() {
        let url = "https://gemini.google.com/app/42";
        let a = ScopeKey::derive(url, &SessionToken::new("tab_1_a"));
        let b = ScopeKey::derive(url, &SessionToken::new("tab_1_b"));
        assert_ne!(a, b);
    }

    #[test]
    fn generated_token_has_expected_shape() {
        let t = SessionToken::generate();
        let parts: Vec<&str> = t.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "tab");
        assert!(parts[1].parse::<u64>().is_ok());
        assert!(!parts[2].is_empty() && parts[2].len() <= SESSION_TOKEN_SUFFIX_LEN);
    }

    proptest! {
        #[test]
        fn identity_is_stable_and_base36(content in ".{0,300}", scope in "[a-z_0-9]{0,40}") {
            let scope = ScopeKey::new(scope);
            let a = message_identity(&content, &scope);
            let b = message_identity(&content, &scope);
            prop_assert_eq!(&a, &b);
            prop_assert!(!a.as_str().is_empty());
            prop_assert!(a.as_str().bytes().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }
}
