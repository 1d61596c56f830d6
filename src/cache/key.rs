//! Cache key model.
//!
//! Every distributed-tier key is `{scope}:{namespace}:{fingerprint}`, or
//! `{scope}:{namespace}:@{entity_id}:{fingerprint}` when the call reads a
//! single entity. `scope` is either a tenant id or the literal `global`.
//! Namespaces follow `family` or `family:operation` (`rooms`, `rooms:list`)
//! so that a family pattern `{scope}:{family}:*` covers every operation
//! cached for that family.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::error::CacheError;

/// Scope segment used for cross-tenant reference data.
pub const GLOBAL_SCOPE: &str = "global";

/// Hex characters kept from the SHA-256 digest (64 bits).
const FINGERPRINT_LEN: usize = 16;

const ENTITY_TAG: u8 = 0x01;
const ARG_TAG: u8 = 0x02;

/// Identifier of one isolated customer account.
///
/// Restricted to `[A-Za-z0-9_.-]` so it can never smuggle glob characters or
/// separators into a key, and never equal to `global`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, CacheError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CacheError::InvalidTenant("tenant id is empty".to_string()));
        }
        if id.eq_ignore_ascii_case(GLOBAL_SCOPE) {
            return Err(CacheError::InvalidTenant(format!(
                "'{}' is reserved for cross-tenant data",
                id
            )));
        }
        if !id.chars().all(is_safe_char) {
            return Err(CacheError::InvalidTenant(format!(
                "'{}' contains characters outside [A-Za-z0-9_.-]",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Which partition of the cache a key lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantScope {
    Global,
    Tenant(TenantId),
}

impl TenantScope {
    /// Missing tenant context falls back to the shared scope.
    pub fn from_optional(tenant: Option<TenantId>) -> Self {
        match tenant {
            Some(tenant) => TenantScope::Tenant(tenant),
            None => TenantScope::Global,
        }
    }

    pub fn as_segment(&self) -> &str {
        match self {
            TenantScope::Global => GLOBAL_SCOPE,
            TenantScope::Tenant(tenant) => tenant.as_str(),
        }
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            TenantScope::Global => None,
            TenantScope::Tenant(tenant) => Some(tenant),
        }
    }
}

impl From<TenantId> for TenantScope {
    fn from(tenant: TenantId) -> Self {
        TenantScope::Tenant(tenant)
    }
}

impl From<&TenantId> for TenantScope {
    fn from(tenant: &TenantId) -> Self {
        TenantScope::Tenant(tenant.clone())
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_segment())
    }
}

/// The effective arguments of one read call.
///
/// Each cached operation builds its own signature, naming exactly the fields
/// that change its result. Arguments are kept sorted by name, so the order in
/// which they are added never changes the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignature {
    scope: TenantScope,
    entity_id: Option<String>,
    args: BTreeMap<String, String>,
}

impl CallSignature {
    pub fn global() -> Self {
        Self::scoped(TenantScope::Global)
    }

    pub fn tenant(tenant: &TenantId) -> Self {
        Self::scoped(TenantScope::from(tenant))
    }

    pub fn scoped(scope: TenantScope) -> Self {
        Self {
            scope,
            entity_id: None,
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.args.insert(name.to_string(), value.to_string());
        self
    }

    /// Adds the argument only when present; `None` is not an effective argument.
    pub fn opt_arg<V: fmt::Display>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.arg(name, value),
            None => self,
        }
    }

    /// Marks the call as a read of one entity so it can be invalidated on its own.
    ///
    /// The raw id takes part in the fingerprint; only the key segment is
    /// sanitized, so ids that sanitize alike still get distinct keys.
    pub fn entity(mut self, entity_id: impl fmt::Display) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Stable digest of the entity id and the arguments.
    ///
    /// Every field is tagged and length-prefixed before hashing so that
    /// `("a", "bc")` and `("ab", "c")` can never produce the same input.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(entity_id) = &self.entity_id {
            hasher.update([ENTITY_TAG]);
            hasher.update((entity_id.len() as u64).to_be_bytes());
            hasher.update(entity_id.as_bytes());
        }
        for (name, value) in &self.args {
            hasher.update([ARG_TAG]);
            hasher.update((name.len() as u64).to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..FINGERPRINT_LEN].to_string()
    }
}

/// Fully resolved key of one distributed-tier entry, without the store prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: TenantScope,
    namespace: String,
    fingerprint: String,
    entity_id: Option<String>,
}

impl CacheKey {
    pub fn for_call(namespace: &str, signature: &CallSignature) -> Self {
        Self {
            scope: signature.scope.clone(),
            namespace: normalize_namespace(namespace),
            fingerprint: signature.fingerprint(),
            entity_id: signature.entity_id.as_deref().map(sanitize_segment),
        }
    }

    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn render(&self) -> String {
        match &self.entity_id {
            Some(entity_id) => format!(
                "{}:{}:@{}:{}",
                self.scope, self.namespace, entity_id, self.fingerprint
            ),
            None => format!("{}:{}:{}", self.scope, self.namespace, self.fingerprint),
        }
    }

    /// Every key of a scope.
    pub fn scope_pattern(scope: &TenantScope) -> String {
        format!("{}:*", scope)
    }

    /// Every key of a family within a scope, whatever the operation.
    pub fn family_pattern(scope: &TenantScope, family: &str) -> String {
        format!("{}:{}:*", scope, normalize_namespace(family))
    }

    /// The direct keys of one entity within a family.
    pub fn entity_pattern(scope: &TenantScope, family: &str, entity_id: &str) -> String {
        format!(
            "{}:{}:*@{}:*",
            scope,
            normalize_namespace(family),
            sanitize_segment(entity_id)
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Replaces anything that could act as a separator or glob metacharacter.
pub(crate) fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect()
}

/// Namespaces keep `:` as the family/operation separator, everything else is sanitized.
fn normalize_namespace(raw: &str) -> String {
    raw.split(':')
        .filter(|part| !part.is_empty())
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    use std::collections::HashSet;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    #[test]
    fn tenant_id_rejects_reserved_and_unsafe_values() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("global").is_err());
        assert!(TenantId::new("GLOBAL").is_err());
        assert!(TenantId::new("hotel:1").is_err());
        assert!(TenantId::new("hotel*").is_err());
        assert!(TenantId::new("64f1c2a9e4b0a1d2c3e4f567").is_ok());
        assert!(TenantId::new("hotel-del_mar.2").is_ok());
    }

    #[test]
    fn tenant_id_serde_validates() {
        let ok: TenantId = serde_json::from_str("\"t-1\"").unwrap();
        assert_eq!(ok.as_str(), "t-1");
        assert!(serde_json::from_str::<TenantId>("\"global\"").is_err());
    }

    #[test]
    fn missing_tenant_maps_to_global_scope() {
        assert_eq!(TenantScope::from_optional(None), TenantScope::Global);
        assert_eq!(TenantScope::Global.as_segment(), "global");
        let scope = TenantScope::from_optional(Some(tenant("t1")));
        assert_eq!(scope.as_segment(), "t1");
    }

    #[test]
    fn fingerprint_ignores_argument_order() {
        let t = tenant("t1");
        let a = CallSignature::tenant(&t)
            .arg("status", "clean")
            .arg("page", 2)
            .arg("from", "2026-01-01");
        let b = CallSignature::tenant(&t)
            .arg("from", "2026-01-01")
            .arg("page", 2)
            .arg("status", "clean");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn fingerprint_distinguishes_values_and_boundaries() {
        let t = tenant("t1");
        let page1 = CallSignature::tenant(&t).arg("page", 1);
        let page2 = CallSignature::tenant(&t).arg("page", 2);
        assert_ne!(page1.fingerprint(), page2.fingerprint());

        let split_a = CallSignature::tenant(&t).arg("a", "bc");
        let split_b = CallSignature::tenant(&t).arg("ab", "c");
        assert_ne!(split_a.fingerprint(), split_b.fingerprint());
    }

    #[test]
    fn none_arguments_do_not_participate() {
        let t = tenant("t1");
        let with_none = CallSignature::tenant(&t)
            .arg("page", 1)
            .opt_arg::<&str>("status", None);
        let without = CallSignature::tenant(&t).arg("page", 1);
        assert_eq!(with_none.fingerprint(), without.fingerprint());
    }

    #[test]
    fn random_distinct_argument_sets_do_not_collide() {
        let mut rng = rand::thread_rng();
        let t = tenant("t1");
        let mut seen_args = HashSet::new();
        let mut seen_fingerprints = HashSet::new();

        while seen_args.len() < 5_000 {
            let arg_count = rng.gen_range(1..5);
            let mut pairs: Vec<(String, String)> = (0..arg_count)
                .map(|_| {
                    let name_len = rng.gen_range(1..6);
                    let value_len = rng.gen_range(0..10);
                    let name: String = (&mut rng)
                        .sample_iter(&Alphanumeric)
                        .take(name_len)
                        .map(char::from)
                        .collect();
                    let value: String = (&mut rng)
                        .sample_iter(&Alphanumeric)
                        .take(value_len)
                        .map(char::from)
                        .collect();
                    (name, value)
                })
                .collect();
            pairs.sort();
            pairs.dedup_by(|a, b| a.0 == b.0);
            if !seen_args.insert(pairs.clone()) {
                continue;
            }

            let signature = pairs
                .iter()
                .fold(CallSignature::tenant(&t), |sig, (name, value)| sig.arg(name, value));
            assert!(
                seen_fingerprints.insert(signature.fingerprint()),
                "fingerprint collision for {:?}",
                pairs
            );
        }
    }

    #[test]
    fn keys_render_with_scope_namespace_and_fingerprint() {
        let t = tenant("t1");
        let signature = CallSignature::tenant(&t).arg("floor", 3);
        let key = CacheKey::for_call("rooms:list", &signature);
        assert_eq!(
            key.render(),
            format!("t1:rooms:list:{}", signature.fingerprint())
        );

        let global = CacheKey::for_call("settings", &CallSignature::global());
        assert!(global.render().starts_with("global:settings:"));
    }

    #[test]
    fn entity_keys_are_sanitized() {
        let t = tenant("t1");
        let signature = CallSignature::tenant(&t).entity("room:42*");
        let key = CacheKey::for_call("rooms:detail", &signature);
        assert_eq!(key.entity_id(), Some("room_42_"));
        assert!(key.render().starts_with("t1:rooms:detail:@room_42_:"));
    }

    #[test]
    fn entities_that_sanitize_alike_keep_distinct_keys() {
        let t = tenant("t1");
        let ana = CacheKey::for_call("guests:detail", &CallSignature::tenant(&t).entity("ana@hotel.com"));
        let lookalike =
            CacheKey::for_call("guests:detail", &CallSignature::tenant(&t).entity("ana_hotel.com"));

        assert_eq!(ana.entity_id(), lookalike.entity_id());
        assert_ne!(ana.fingerprint(), lookalike.fingerprint());
        assert_ne!(ana.render(), lookalike.render());

        // One entity pattern still reaches both.
        let pattern = CacheKey::entity_pattern(&TenantScope::from(&t), "guests", "ana@hotel.com");
        assert!(crate::cache::memory::glob_match(&pattern, &ana.render()));
        assert!(crate::cache::memory::glob_match(&pattern, &lookalike.render()));
    }

    #[test]
    fn entity_participates_in_the_fingerprint() {
        let t = tenant("t1");
        let plain = CallSignature::tenant(&t).arg("lang", "en");
        let r1 = CallSignature::tenant(&t).entity("r1").arg("lang", "en");
        let r2 = CallSignature::tenant(&t).entity("r2").arg("lang", "en");
        assert_ne!(plain.fingerprint(), r1.fingerprint());
        assert_ne!(r1.fingerprint(), r2.fingerprint());
        assert_eq!(r1.entity_id(), Some("r1"));
    }

    #[test]
    fn same_shaped_calls_for_different_tenants_get_different_keys() {
        let a = CacheKey::for_call("rooms", &CallSignature::tenant(&tenant("a")).arg("p", 1));
        let b = CacheKey::for_call("rooms", &CallSignature::tenant(&tenant("b")).arg("p", 1));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.render(), b.render());
    }

    #[test]
    fn patterns() {
        let scope = TenantScope::from(tenant("t1"));
        assert_eq!(CacheKey::scope_pattern(&scope), "t1:*");
        assert_eq!(CacheKey::family_pattern(&scope, "bookings"), "t1:bookings:*");
        assert_eq!(
            CacheKey::entity_pattern(&scope, "rooms", "r-42"),
            "t1:rooms:*@r-42:*"
        );
    }
}
