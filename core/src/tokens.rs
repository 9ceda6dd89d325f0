//! Line Access Tokens: capability proofs that the agent has read the exact
//! lines it is about to mutate.
//!
//! A token binds (path hash, line range, range CRC32C, total line count,
//! issue time) under an HMAC-SHA256 keyed by a per-process secret. Tokens are
//! opaque to the agent: `LAT:` followed by a URL-safe base64 payload, at most
//! 512 bytes. Restarting the process rotates the secret, so every
//! pre-restart token fails verification.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::crc::crc32c_range;
use crate::error::NtsError;
use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_PREFIX: &str = "LAT:";
pub const MAX_TOKEN_LEN: usize = 512;

/// Fields carried inside the encoded token. Field names are single letters
/// to keep the payload comfortably under the length cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenPayload {
    /// Hex SHA-256 (truncated) of the absolute path.
    p: String,
    /// 1-based inclusive line range.
    s: usize,
    e: usize,
    /// CRC32C of the range text at issue time.
    c: u32,
    /// Total line count at issue time.
    n: usize,
    /// Issue timestamp, ms since epoch.
    t: i64,
    /// Hex HMAC-SHA256 tag over the fields above.
    m: String,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn hash_path(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    hex(&digest[..16])
}

fn mac_input(payload: &TokenPayload) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}",
        payload.p, payload.s, payload.e, payload.c, payload.n, payload.t
    )
}

fn compute_mac(secret: &[u8], payload: &TokenPayload) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| NtsError::Internal(format!("hmac key setup failed: {e}")))?;
    mac.update(mac_input(payload).as_bytes());
    Ok(hex(&mac.finalize().into_bytes()))
}

/// One token the task still considers live. The MAC doubles as the token's
/// identity for revocation.
#[derive(Debug, Clone)]
struct LiveToken {
    mac: String,
    start: usize,
    end: usize,
}

/// One rename edge with the time the move happened, so undo can distinguish
/// moves that predate a transaction from moves performed after it.
#[derive(Debug, Clone)]
struct AliasEdge {
    target: String,
    created_ms: i64,
}

/// Directed rename edges `old -> new`. Each source has at most one successor,
/// so the graph is a forest of chains; cycles are rejected at registration.
#[derive(Debug, Default)]
pub struct AliasGraph {
    edges: HashMap<String, AliasEdge>,
}

impl AliasGraph {
    pub fn register(&mut self, old: &str, new: &str, now_ms: i64) -> Result<()> {
        if old == new {
            return Err(NtsError::InvalidArgument(
                "alias source and target are the same path".to_string(),
            ));
        }
        // Walking forward from `new` must not reach `old`.
        let mut cursor = new.to_string();
        loop {
            if cursor == old {
                return Err(NtsError::InvalidArgument(format!(
                    "alias {old} -> {new} would create a cycle"
                )));
            }
            match self.edges.get(&cursor) {
                Some(edge) => cursor = edge.target.clone(),
                None => break,
            }
        }
        self.edges.insert(
            old.to_string(),
            AliasEdge {
                target: new.to_string(),
                created_ms: now_ms,
            },
        );
        Ok(())
    }

    /// Drop the edge leaving `old`, e.g. when the move it records is undone.
    pub fn unregister(&mut self, old: &str) {
        self.edges.remove(old);
    }

    /// Follow rename edges forward to the fixed point.
    pub fn resolve(&self, path: &str) -> String {
        let mut cursor = path.to_string();
        while let Some(edge) = self.edges.get(&cursor) {
            cursor = edge.target.clone();
        }
        cursor
    }

    /// Follow only edges recorded strictly after `since_ms`: the current
    /// location of a file that a transaction knew at `since_ms`.
    pub fn resolve_since(&self, path: &str, since_ms: i64) -> String {
        let mut cursor = path.to_string();
        while let Some(edge) = self.edges.get(&cursor) {
            if edge.created_ms <= since_ms {
                break;
            }
            cursor = edge.target.clone();
        }
        cursor
    }

    /// All paths whose chains terminate at `path` (transitively).
    pub fn previous_paths(&self, path: &str) -> Vec<String> {
        let mut found = Vec::new();
        for source in self.edges.keys() {
            if source != path && self.resolve(source) == path {
                found.push(source.clone());
            }
        }
        found.sort();
        found
    }

    pub fn is_alias_of(&self, a: &str, b: &str) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }
}

/// Per-task token state: issued tokens by current path, plus the alias
/// graph that keeps them valid across moves. Not persisted; reactivation
/// starts with an empty set.
#[derive(Debug)]
pub struct TokenSet {
    secret: [u8; 32],
    live: HashMap<String, Vec<LiveToken>>,
    aliases: AliasGraph,
}

/// Outcome of a successful validation, echoing the bound range.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedToken {
    pub start: usize,
    pub end: usize,
}

impl TokenSet {
    pub fn new(secret: [u8; 32]) -> Self {
        Self {
            secret,
            live: HashMap::new(),
            aliases: AliasGraph::default(),
        }
    }

    /// Issue a token for lines `start..=end` whose current text is
    /// `range_text` within a file of `total_lines` lines.
    pub fn register_read(
        &mut self,
        path: &str,
        start: usize,
        end: usize,
        range_text: &str,
        total_lines: usize,
        now_ms: i64,
    ) -> Result<String> {
        let lines: Vec<&str> = range_text.lines().collect();
        let crc = crate::crc::crc32c_lines(&lines);
        let mut payload = TokenPayload {
            p: hash_path(path),
            s: start,
            e: end,
            c: crc,
            n: total_lines,
            t: now_ms,
            m: String::new(),
        };
        payload.m = compute_mac(&self.secret, &payload)?;

        let encoded = format!(
            "{TOKEN_PREFIX}{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
        );
        if encoded.len() > MAX_TOKEN_LEN {
            return Err(NtsError::Internal(format!(
                "token for {path} exceeds {MAX_TOKEN_LEN} bytes"
            )));
        }
        self.live.entry(path.to_string()).or_default().push(LiveToken {
            mac: payload.m.clone(),
            start,
            end,
        });
        Ok(encoded)
    }

    /// Sugar: a token covering the whole file.
    pub fn register_full_access(
        &mut self,
        path: &str,
        content: &str,
        now_ms: i64,
    ) -> Result<String> {
        let total = content.lines().count().max(1);
        self.register_read(path, 1, total, content, total, now_ms)
    }

    /// Validate a presented token for an intended edit of `path` touching
    /// lines `edit_start..=edit_end`, given the file's current text.
    pub fn validate(
        &self,
        token: Option<&str>,
        path: &str,
        edit_start: usize,
        edit_end: usize,
        current_text: &str,
    ) -> Result<ValidatedToken> {
        let token = token.ok_or(NtsError::TokenRequired)?;
        let payload = self.decode(token)?;

        // Path check: direct hash match, or some previous path of `path`
        // (per the alias graph) carries the bound hash.
        let direct = hash_path(path);
        let path_ok = payload.p == direct
            || self
                .aliases
                .previous_paths(path)
                .iter()
                .any(|previous| hash_path(previous) == payload.p);
        if !path_ok {
            return Err(NtsError::TokenPathMismatch);
        }

        if edit_start < payload.s || edit_end > payload.e || edit_start > edit_end {
            return Err(NtsError::TokenRangeMismatch {
                start: edit_start,
                end: edit_end,
                token_start: payload.s,
                token_end: payload.e,
            });
        }

        // Revocation: a verified token that is no longer in the live set was
        // invalidated by a later write.
        let still_live = self
            .live
            .get(path)
            .map(|tokens| tokens.iter().any(|t| t.mac == payload.m))
            .unwrap_or(false);
        if !still_live {
            return Err(NtsError::TokenStale);
        }

        let current = crc32c_range(current_text, payload.s, payload.e);
        if current != payload.c {
            return Err(NtsError::TokenStale);
        }

        Ok(ValidatedToken {
            start: payload.s,
            end: payload.e,
        })
    }

    fn decode(&self, token: &str) -> Result<TokenPayload> {
        let Some(body) = token.strip_prefix(TOKEN_PREFIX) else {
            return Err(NtsError::TokenMalformed);
        };
        if token.len() > MAX_TOKEN_LEN {
            return Err(NtsError::TokenMalformed);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| NtsError::TokenMalformed)?;
        let payload: TokenPayload =
            serde_json::from_slice(&bytes).map_err(|_| NtsError::TokenMalformed)?;
        let expected = compute_mac(&self.secret, &payload)?;
        // Hex strings are case-normalised; compare directly.
        if expected != payload.m {
            return Err(NtsError::TokenMalformed);
        }
        Ok(payload)
    }

    /// Drop every live token whose range intersects `start..=end`.
    pub fn invalidate_intersecting(&mut self, path: &str, start: usize, end: usize) {
        if let Some(tokens) = self.live.get_mut(path) {
            tokens.retain(|t| t.end < start || t.start > end);
            if tokens.is_empty() {
                self.live.remove(path);
            }
        }
    }

    /// Transfer live tokens across a rename and record the alias edge.
    pub fn move_tokens(&mut self, old_path: &str, new_path: &str, now_ms: i64) -> Result<()> {
        self.aliases.register(old_path, new_path, now_ms)?;
        if let Some(tokens) = self.live.remove(old_path) {
            self.live
                .entry(new_path.to_string())
                .or_default()
                .extend(tokens);
        }
        Ok(())
    }

    pub fn delete_tokens(&mut self, path: &str) {
        self.live.remove(path);
    }

    pub fn reset(&mut self) {
        self.live.clear();
        self.aliases.clear();
    }

    pub fn aliases(&self) -> &AliasGraph {
        &self.aliases
    }

    pub fn aliases_mut(&mut self) -> &mut AliasGraph {
        &mut self.aliases
    }

    pub fn live_count(&self, path: &str) -> usize {
        self.live.get(path).map(|t| t.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    const SECRET: [u8; 32] = [7u8; 32];

    fn set() -> TokenSet {
        TokenSet::new(SECRET)
    }

    #[test]
    fn issued_token_validates_for_subrange() {
        let mut tokens = set();
        let content = "one\ntwo\nthree\n";
        let token = tokens
            .register_full_access("/w/a.txt", content, 1_000)
            .unwrap();
        assert!(token.starts_with("LAT:"));
        assert!(token.len() <= MAX_TOKEN_LEN);

        let validated = tokens
            .validate(Some(&token), "/w/a.txt", 2, 2, content)
            .unwrap();
        assert_eq!((validated.start, validated.end), (1, 3));
    }

    #[test]
    fn missing_token_is_required_error() {
        let tokens = set();
        let err = tokens.validate(None, "/w/a.txt", 1, 1, "x").unwrap_err();
        assert!(matches!(err, NtsError::TokenRequired));
    }

    #[test]
    fn tampered_token_is_malformed() {
        let mut tokens = set();
        let token = tokens.register_full_access("/w/a.txt", "x\n", 0).unwrap();
        let mut forged = token.clone();
        forged.truncate(token.len() - 2);
        forged.push_str("AA");
        let err = tokens
            .validate(Some(&forged), "/w/a.txt", 1, 1, "x\n")
            .unwrap_err();
        assert!(matches!(err, NtsError::TokenMalformed));
    }

    #[test]
    fn different_secret_rejects_token() {
        let mut issuer = TokenSet::new([1u8; 32]);
        let token = issuer.register_full_access("/w/a.txt", "x\n", 0).unwrap();
        let verifier = TokenSet::new([2u8; 32]);
        let err = verifier
            .validate(Some(&token), "/w/a.txt", 1, 1, "x\n")
            .unwrap_err();
        assert!(matches!(err, NtsError::TokenMalformed));
    }

    #[test]
    fn wrong_path_is_a_path_mismatch() {
        let mut tokens = set();
        let token = tokens.register_full_access("/w/a.txt", "x\n", 0).unwrap();
        let err = tokens
            .validate(Some(&token), "/w/b.txt", 1, 1, "x\n")
            .unwrap_err();
        assert!(matches!(err, NtsError::TokenPathMismatch));
    }

    #[test]
    fn out_of_range_edit_is_a_range_mismatch() {
        let mut tokens = set();
        let content = "one\ntwo\nthree\nfour\n";
        let token = tokens
            .register_read("/w/a.txt", 2, 3, "two\nthree", 4, 0)
            .unwrap();
        let err = tokens
            .validate(Some(&token), "/w/a.txt", 3, 4, content)
            .unwrap_err();
        assert!(matches!(err, NtsError::TokenRangeMismatch { .. }));
    }

    #[test]
    fn changed_content_is_stale() {
        let mut tokens = set();
        let token = tokens
            .register_full_access("/w/a.txt", "original\n", 0)
            .unwrap();
        let err = tokens
            .validate(Some(&token), "/w/a.txt", 1, 1, "modified\n")
            .unwrap_err();
        assert!(matches!(err, NtsError::TokenStale));
    }

    #[test]
    fn invalidation_revokes_intersecting_only() {
        let mut tokens = set();
        let content = "a\nb\nc\nd\ne\nf\n";
        let head = tokens
            .register_read("/w/a.txt", 1, 2, "a\nb", 6, 0)
            .unwrap();
        let tail = tokens
            .register_read("/w/a.txt", 5, 6, "e\nf", 6, 0)
            .unwrap();

        tokens.invalidate_intersecting("/w/a.txt", 5, 6);
        assert!(tokens.validate(Some(&head), "/w/a.txt", 1, 2, content).is_ok());
        let err = tokens
            .validate(Some(&tail), "/w/a.txt", 5, 6, content)
            .unwrap_err();
        assert!(matches!(err, NtsError::TokenStale));
    }

    #[test]
    fn tokens_survive_moves_through_the_alias_graph() {
        let mut tokens = set();
        let content = "move me\n";
        let token = tokens
            .register_full_access("/w/source.txt", content, 0)
            .unwrap();
        tokens
            .move_tokens("/w/source.txt", "/w/sub/target.txt", 1)
            .unwrap();

        let validated = tokens.validate(Some(&token), "/w/sub/target.txt", 1, 1, content);
        assert!(validated.is_ok(), "alias chain should keep the token valid");
    }

    #[test]
    fn alias_cycles_are_rejected() {
        let mut graph = AliasGraph::default();
        graph.register("a", "b", 10).unwrap();
        graph.register("b", "c", 20).unwrap();
        let err = graph.register("c", "a", 30).unwrap_err();
        assert!(matches!(err, NtsError::InvalidArgument(_)));
        assert_eq!(graph.resolve("a"), "c");
        assert_eq!(graph.previous_paths("c"), vec!["a", "b"]);
        assert!(graph.is_alias_of("a", "b"));
    }

    #[test]
    fn resolve_since_ignores_older_edges() {
        let mut graph = AliasGraph::default();
        graph.register("a", "b", 10).unwrap();
        graph.register("b", "c", 20).unwrap();
        // A transaction committed at t=15 knew the file as "b".
        assert_eq!(graph.resolve_since("b", 15), "c");
        // The move a->b happened before the transaction; not followed.
        assert_eq!(graph.resolve_since("a", 15), "a");
        assert_eq!(graph.resolve_since("a", 5), "c");
    }
}
