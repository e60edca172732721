//! Deterministic verification cache keys using blake3.
//!
//! A cache key identifies the inputs of one verification: the contract's
//! identity and acceptance criteria on one side, the validator versions and
//! environment of the result on the other. Identical inputs always produce the
//! same key, so a verdict computed once can be reused.
//!
//! # Determinism
//!
//! - Every field is length-prefixed before hashing so adjacent fields cannot
//!   run together.
//! - Criteria are sorted by `criterion_id` and serialized with `serde_json`,
//!   whose maps are ordered.
//! - Validator versions and environment are `BTreeMap`s, iterated in key order.
//! - No clock, random salt or `HashMap` iteration feeds a key.

use std::fmt;

use accord_core::{AcceptanceCriterion, Contract, VerificationResult};

const CONTRACT_DOMAIN: &[u8] = b"accord.contract.v1";
const RESULT_DOMAIN: &[u8] = b"accord.result.v1";
const VERIFICATION_DOMAIN: &[u8] = b"accord.verification.v1";

/// A 32-byte blake3 digest, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(pub [u8; 32]);

impl CacheKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Parses the 64-character hex form produced by [`CacheKey::to_hex`].
    pub fn from_hex(hex: &str) -> Option<CacheKey> {
        blake3::Hash::from_hex(hex)
            .ok()
            .map(|hash| CacheKey(*hash.as_bytes()))
    }
}

impl From<blake3::Hash> for CacheKey {
    fn from(hash: blake3::Hash) -> Self {
        CacheKey(*hash.as_bytes())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Writes `bytes` prefixed by its length.
fn update_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Key over the contract's identity and criteria.
///
/// Changes when the ID, version, schema version or any criterion changes.
/// Independent of criterion declaration order and of descriptive fields
/// (name, tags, consumers).
pub fn contract_cache_key(contract: &Contract) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, CONTRACT_DOMAIN);
    update_field(&mut hasher, contract.contract_id.as_str().as_bytes());
    update_field(&mut hasher, &contract.contract_version.to_le_bytes());
    update_field(&mut hasher, contract.schema_version.as_bytes());

    let mut criteria: Vec<&AcceptanceCriterion> = contract.criteria.iter().collect();
    criteria.sort_by(|a, b| a.criterion_id.cmp(&b.criterion_id));
    update_field(&mut hasher, &(criteria.len() as u64).to_le_bytes());
    for criterion in criteria {
        // Struct fields serialize in declaration order and Value maps are
        // BTreeMaps, so this is canonical.
        let bytes = serde_json::to_vec(criterion)
            .expect("AcceptanceCriterion serialization should never fail");
        update_field(&mut hasher, &bytes);
    }
    hasher.finalize().into()
}

/// Key over the verification context of a result: contract ID, validator
/// versions and environment. Criterion outcomes are not part of it.
pub fn result_cache_key(result: &VerificationResult) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, RESULT_DOMAIN);
    update_field(&mut hasher, result.contract_id.as_str().as_bytes());

    update_field(
        &mut hasher,
        &(result.validator_versions.len() as u64).to_le_bytes(),
    );
    for (validator, version) in &result.validator_versions {
        update_field(&mut hasher, validator.as_bytes());
        update_field(&mut hasher, version.as_bytes());
    }

    update_field(&mut hasher, &(result.environment.len() as u64).to_le_bytes());
    for (key, value) in &result.environment {
        update_field(&mut hasher, key.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }
    hasher.finalize().into()
}

/// Combined key a verification verdict is memoized under.
pub fn verification_cache_key(contract: &Contract, result: &VerificationResult) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, VERIFICATION_DOMAIN);
    update_field(&mut hasher, contract_cache_key(contract).as_bytes());
    update_field(&mut hasher, result_cache_key(result).as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::CriterionResult;
    use proptest::prelude::*;

    fn contract() -> Contract {
        Contract::builder("C1", "API_SPECIFICATION", "team-api")
            .criterion(AcceptanceCriterion::new("schema", "json-schema"))
            .criterion(
                AcceptanceCriterion::new("latency", "load")
                    .with_config(serde_json::json!({"p99_ms": 200, "endpoint": "/orders"})),
            )
            .build()
    }

    #[test]
    fn test_contract_key_deterministic() {
        assert_eq!(contract_cache_key(&contract()), contract_cache_key(&contract()));
    }

    #[test]
    fn test_contract_key_ignores_criterion_order() {
        let mut reordered = contract();
        reordered.criteria.reverse();
        assert_eq!(contract_cache_key(&contract()), contract_cache_key(&reordered));
    }

    #[test]
    fn test_contract_key_changes_on_criterion_change() {
        let mut changed = contract();
        changed.criteria[1].config = serde_json::json!({"p99_ms": 250, "endpoint": "/orders"});
        assert_ne!(contract_cache_key(&contract()), contract_cache_key(&changed));

        let mut optional = contract();
        optional.criteria[0].required = false;
        assert_ne!(contract_cache_key(&contract()), contract_cache_key(&optional));
    }

    #[test]
    fn test_contract_key_changes_on_version_bump() {
        let mut bumped = contract();
        bumped.contract_version = 2;
        assert_ne!(contract_cache_key(&contract()), contract_cache_key(&bumped));
    }

    #[test]
    fn test_contract_key_ignores_descriptive_fields() {
        let mut renamed = contract();
        renamed.name = "Renamed".to_string();
        renamed.tags.insert("new".to_string());
        assert_eq!(contract_cache_key(&contract()), contract_cache_key(&renamed));
    }

    #[test]
    fn test_result_key_covers_validators_and_environment() {
        let base = VerificationResult::new("C1", 1, "ci")
            .with_validator_version("load", "2.1.0")
            .with_environment("region", "eu-west-1");
        let same_context = VerificationResult::new("C1", 1, "someone-else")
            .with_validator_version("load", "2.1.0")
            .with_environment("region", "eu-west-1")
            .with_result(CriterionResult::pass("latency"));
        assert_eq!(result_cache_key(&base), result_cache_key(&same_context));

        let upgraded = base.clone().with_validator_version("load", "2.2.0");
        assert_ne!(result_cache_key(&base), result_cache_key(&upgraded));
    }

    #[test]
    fn test_field_boundaries_do_not_collide() {
        let a = VerificationResult::new("C1", 1, "ci").with_environment("ab", "c");
        let b = VerificationResult::new("C1", 1, "ci").with_environment("a", "bc");
        assert_ne!(result_cache_key(&a), result_cache_key(&b));
    }

    #[test]
    fn test_hex_round_trip() {
        let key = contract_cache_key(&contract());
        let hex = key.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(CacheKey::from_hex(&hex), Some(key));
        assert_eq!(CacheKey::from_hex("not-hex"), None);
    }

    proptest! {
        #[test]
        fn test_verification_key_deterministic(
            env in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..5),
            timeout in 1u64..120,
        ) {
            let mut c = contract();
            c.criteria[0].timeout_seconds = timeout;
            let mut result = VerificationResult::new("C1", 1, "ci");
            result.environment = env.clone();

            let mut again = VerificationResult::new("C1", 1, "ci");
            again.environment = env;

            prop_assert_eq!(
                verification_cache_key(&c, &result),
                verification_cache_key(&c.clone(), &again)
            );

            let mut other = c.clone();
            other.criteria[0].timeout_seconds = timeout + 1;
            prop_assert_ne!(
                verification_cache_key(&c, &result),
                verification_cache_key(&other, &result)
            );
        }
    }
}
