use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::backend::{BackendInfo, CacheBackend};
use super::error::{CacheError, CacheResult};

/// Every this many writes, expired entries are swept out of the map.
const SWEEP_EVERY_WRITES: u64 = 256;

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process stand-in for Redis.
///
/// Used for single-node deployments (`CACHE_BACKEND=memory`) and as the stub
/// backend in tests. `offline()` simulates an unreachable server: every call
/// fails, which is how degraded startup is exercised.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, MemoryEntry>>,
    offline: Arc<AtomicBool>,
    calls: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        let backend = Self::default();
        backend.offline.store(true, Ordering::SeqCst);
        backend
    }

    /// Flips reachability after construction, to simulate an outage mid-flight.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of backend calls made so far, successful or not.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Live (non-expired) keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Entries held in memory, expired or not.
    pub fn stored_entries(&self) -> usize {
        self.entries.len()
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Swept expired in-memory cache entries");
        }
        removed
    }

    /// Writes a raw payload, bypassing serialization. Lets tests plant corrupt data.
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn check(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::backend_unavailable("in-memory backend is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: String, ttl_seconds: u64) -> CacheResult<()> {
        self.check()?;
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY_WRITES == 0 {
            self.sweep_expired();
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.check()?;
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, entry)) if entry.expires_at > now => Ok(1),
            _ => Ok(0),
        }
    }

    async fn del_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.check()?;
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if glob_match(pattern, key) {
                if entry.expires_at > now {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn info(&self) -> CacheResult<BackendInfo> {
        self.check()?;
        Ok(BackendInfo {
            connected_clients: 1,
            used_memory: format!("{} entries", self.entries.len()),
            total_keys: self.keys().len() as u64,
        })
    }
}

/// Redis `MATCH` glob: `*`, `?`, `[...]` classes (`^` negates, `a-z`
/// ranges) and `\` escapes.
///
/// Hand-written rather than `globset` because Redis negates classes with `^`
/// where `globset` uses `!`, and the in-memory backend has to agree with the
/// server on every pattern the store sends.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(GlobToken::Star) => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some(token) if token.matches(text[t]) => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    while matches!(tokens.get(p), Some(GlobToken::Star)) {
        p += 1;
    }
    p == tokens.len()
}

enum GlobToken {
    Literal(char),
    Any,
    Star,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl GlobToken {
    fn matches(&self, c: char) -> bool {
        match self {
            GlobToken::Literal(l) => *l == c,
            GlobToken::Any => true,
            GlobToken::Star => false,
            GlobToken::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi) != *negated
            }
        }
    }
}

fn tokenize(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        let token = match c {
            '*' => GlobToken::Star,
            '?' => GlobToken::Any,
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let mut ranges = Vec::new();
                // An unterminated class runs to the end of the pattern, as in Redis.
                while let Some(c) = chars.next() {
                    let lo = match c {
                        ']' => break,
                        '\\' => chars.next().unwrap_or('\\'),
                        c => c,
                    };
                    let hi = match chars.peek() {
                        Some('-') => {
                            chars.next();
                            match chars.next() {
                                Some(']') | None => {
                                    ranges.push((lo, lo));
                                    ranges.push(('-', '-'));
                                    break;
                                }
                                Some('\\') => chars.next().unwrap_or('\\'),
                                Some(hi) => hi,
                            }
                        }
                        _ => lo,
                    };
                    ranges.push(if lo <= hi { (lo, hi) } else { (hi, lo) });
                }
                GlobToken::Class { negated, ranges }
            }
            c => GlobToken::Literal(c),
        };
        tokens.push(token);
    }
    tokens
}
