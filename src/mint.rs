//! Deterministic identifier mint
//!
//! Every id is `hex(SHA-256(namespace 0x1F part 0x1F part ...))` truncated to
//! a fixed width. Given the same inputs the same id comes out, which is what
//! lets a re-run over the same source land on the same entity ids.
//! `mint_run_id` is the single exception.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub const RUN_ID_WIDTH: usize = 24;
pub const SESSION_ID_WIDTH: usize = 32;
pub const ENTITY_ID_WIDTH: usize = 32;
pub const RELATIONSHIP_ID_WIDTH: usize = 32;
pub const TOKEN_ID_WIDTH: usize = 28;

const SEPARATOR: u8 = 0x1F;

/// Namespaces keying the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Session,
    Message,
    Conversation,
    Turn,
    Sentence,
    Token,
    Relationship,
    Fingerprint,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Session => "session",
            Namespace::Message => "message",
            Namespace::Conversation => "conversation",
            Namespace::Turn => "turn",
            Namespace::Sentence => "sentence",
            Namespace::Token => "token",
            Namespace::Relationship => "relationship",
            Namespace::Fingerprint => "fingerprint",
        }
    }
}

/// Child levels minted from `(parent_id, index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Turn,
    Sentence,
    Token,
}

impl ChildKind {
    fn namespace(&self) -> Namespace {
        match self {
            ChildKind::Turn => Namespace::Turn,
            ChildKind::Sentence => Namespace::Sentence,
            ChildKind::Token => Namespace::Token,
        }
    }

    fn width(&self) -> usize {
        match self {
            ChildKind::Token => TOKEN_ID_WIDTH,
            _ => ENTITY_ID_WIDTH,
        }
    }
}

/// Keyed digest of `parts` under `namespace`, truncated to `width` hex chars.
pub fn digest(namespace: Namespace, parts: &[&str], width: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_str().as_bytes());
    for part in parts {
        hasher.update([SEPARATOR]);
        hasher.update(part.as_bytes());
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(width);
    hex
}

/// Full SHA-256 hex of a byte slice; used as the file digest for session ids.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn mint_session_id(source_path: &Path, file_digest: &str) -> String {
    let path = source_path.to_string_lossy();
    digest(Namespace::Session, &[&path, file_digest], SESSION_ID_WIDTH)
}

pub fn mint_message_id(session_id: &str, message_index: i64, fingerprint: &str) -> String {
    let index = message_index.to_string();
    digest(
        Namespace::Message,
        &[session_id, &index, fingerprint],
        ENTITY_ID_WIDTH,
    )
}

/// L8 id. Recomputed by every stage that needs it instead of being read back.
pub fn mint_conversation_id(session_id: &str) -> String {
    digest(Namespace::Conversation, &[session_id], ENTITY_ID_WIDTH)
}

pub fn mint_child_id(kind: ChildKind, parent_id: &str, index: i64) -> String {
    let index = index.to_string();
    digest(kind.namespace(), &[parent_id, &index], kind.width())
}

pub fn mint_relationship_id(source_id: &str, target_id: &str, kind: &str) -> String {
    digest(
        Namespace::Relationship,
        &[source_id, target_id, kind],
        RELATIONSHIP_ID_WIDTH,
    )
}

/// Dedup fingerprint over the semantically significant message fields.
pub fn fingerprint(session_id: &str, role: &str, content_cleaned: &str) -> String {
    digest(
        Namespace::Fingerprint,
        &[session_id, role, content_cleaned],
        ENTITY_ID_WIDTH,
    )
}

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// 12 hex of a process-monotonic millisecond clock, then 12 hex of a v4 UUID.
pub fn mint_run_id() -> String {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_MILLIS.load(Ordering::Relaxed);
    let millis = loop {
        let next = now.max(last + 1);
        match LAST_MILLIS.compare_exchange(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break next,
            Err(observed) => last = observed,
        }
    };
    let random = Uuid::new_v4().simple().to_string();
    format!("{:012x}{}", millis & 0xffff_ffff_ffff, &random[..12])
}

/// Lowercase hex of exactly `width` chars.
pub fn is_well_formed(id: &str, width: usize) -> bool {
    id.len() == width && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
