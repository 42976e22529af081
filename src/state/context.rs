//! Shared context: the cross-turn fact store of a session.
//!
//! The only way to change it is [`SharedContext::merge`], which applies a
//! shallow overwrite of the keys named in a [`ContextPatch`]. Keys absent
//! from the patch survive untouched, and nothing is ever removed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Well-known context keys written by the orchestrator and handlers.
pub mod keys {
    pub const INTENT_RATIONALE: &str = "intent_rationale";
    pub const ENTRY_ERROR: &str = "entry_error";
    pub const CLARIFICATION_REQUESTED: &str = "clarification_requested";
    pub const CALCULATION_TYPE: &str = "calculation_type";

    // Extracted entities
    pub const ANNUAL_INCOME: &str = "annual_income";
    pub const PROPERTY_VALUE: &str = "property_value";
    pub const OWNERSHIP_YEARS: &str = "ownership_years";
    pub const MONTHLY_RENT: &str = "monthly_rent";
    pub const INVOICE_TYPE: &str = "invoice_type";
    pub const CERTIFICATE_TYPE: &str = "certificate_type";
    pub const CNP_CUI: &str = "cnp_cui";
    pub const SELLER_CUI: &str = "seller_cui";
    pub const UPLOAD_INDEX: &str = "upload_index";
    pub const FISCAL_YEAR: &str = "fiscal_year";

    // Document intake
    pub const DOCUMENT_TYPE: &str = "document_type";
    pub const DOCUMENT_CONFIDENCE: &str = "document_confidence";
    pub const DOCUMENT_ERROR: &str = "document_error";
    pub const PROPERTY_ADDRESS: &str = "property_address";
    pub const CONTRACT_START_DATE: &str = "contract_start_date";
    pub const CONTRACT_END_DATE: &str = "contract_end_date";
    pub const LANDLORD_CNP: &str = "landlord_cnp";
    pub const TENANT_CNP: &str = "tenant_cnp";
    pub const EXPENSES: &str = "expenses";
    pub const INVOICE_XML: &str = "invoice_xml";

    // PFA
    pub const CAS_AMOUNT: &str = "cas_amount";
    pub const CASS_AMOUNT: &str = "cass_amount";
    pub const TOTAL_CONTRIBUTIONS: &str = "total_contributions";
    pub const D212_SUBMISSION_ID: &str = "d212_submission_id";
    pub const AWAITING_INCOME_DATA: &str = "awaiting_income_data";

    // Property sale
    pub const TAX_RATE: &str = "tax_rate";
    pub const CALCULATED_TAX: &str = "calculated_tax";
    pub const PAYMENT_TRANSACTION_ID: &str = "payment_transaction_id";
    pub const AWAITING_PROPERTY_DATA: &str = "awaiting_property_data";

    // Rental income
    pub const ANNUAL_RENT: &str = "annual_rent";
    pub const RENTAL_TAX: &str = "rental_tax";
    pub const CONTRACT_REGISTRATION_NUMBER: &str = "contract_registration_number";
    pub const AWAITING_RENTAL_DATA: &str = "awaiting_rental_data";

    // Certificate
    pub const CERTIFICATE_REQUEST_ID: &str = "certificate_request_id";
    pub const AWAITING_CERTIFICATE_DATA: &str = "awaiting_certificate_data";

    // e-Factura
    pub const EFACTURA_UPLOAD_INDEX: &str = "efactura_upload_index";
    pub const EFACTURA_CHECK_STATUS: &str = "efactura_check_status";
    pub const AWAITING_INVOICE_DATA: &str = "awaiting_invoice_data";

    // Tax knowledge
    pub const TAX_GUIDANCE_PROVIDED: &str = "tax_guidance_provided";
    pub const LAST_TAX_QUESTION: &str = "last_tax_question";

    // Continuations
    pub const AWAITING_SUBMISSION_CONFIRMATION: &str = "awaiting_submission_confirmation";
    pub const AWAITING_PAYMENT_CONFIRMATION: &str = "awaiting_payment_confirmation";

    /// Flags that are only meaningful while `next_handler` is set
    pub const CONTINUATION_FLAGS: [&str; 2] = [AWAITING_SUBMISSION_CONFIRMATION, AWAITING_PAYMENT_CONFIRMATION];

    /// Prefix shared by all "still missing input" flags
    pub const AWAITING_PREFIX: &str = "awaiting_";
}

/// Partial mapping a handler (or the orchestrator) wants merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    entries: BTreeMap<String, Value>,
}

impl ContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Insert only when a value is present
    pub fn set_opt<V: Into<Value>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.insert(key, v);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Versioned key-value store with a shallow-overwrite merge law.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    entries: BTreeMap<String, Value>,
    /// Bumped once per merge that actually changed a value
    version: u64,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow-merge `patch` into the context.
    ///
    /// Returns the number of keys whose value changed. Merging the same
    /// patch twice leaves the context (version included) as after the first.
    pub fn merge(&mut self, patch: ContextPatch) -> usize {
        let mut changed = 0;
        for (key, value) in patch.entries {
            if self.entries.get(&key) != Some(&value) {
                self.entries.insert(key, value);
                changed += 1;
            }
        }
        if changed > 0 {
            self.version += 1;
        }
        changed
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.get(key).map_or(false, |v| !v.is_null())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(Value::as_f64)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.entries
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Missing or non-boolean values read as `false`
    pub fn flag(&self, key: &str) -> bool {
        self.entries.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Names of `awaiting_*` flags currently raised
    pub fn awaiting_flags(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, v)| k.starts_with(keys::AWAITING_PREFIX) && v.as_bool() == Some(true))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> SharedContext {
        let mut ctx = SharedContext::new();
        ctx.merge(
            ContextPatch::new()
                .set(keys::ANNUAL_INCOME, 150000.0)
                .set(keys::CERTIFICATE_TYPE, "atestare")
                .set(keys::AWAITING_INCOME_DATA, true),
        );
        ctx
    }

    #[test]
    fn test_merge_overwrites_only_named_keys() {
        let mut ctx = seeded();
        let before = ctx.clone();

        ctx.merge(ContextPatch::new().set(keys::ANNUAL_INCOME, 90000.0).set("new_key", json!([1, 2])));

        assert_eq!(ctx.get_f64(keys::ANNUAL_INCOME), Some(90000.0));
        assert_eq!(ctx.get("new_key"), Some(&json!([1, 2])));
        for (key, value) in before.iter() {
            if key != keys::ANNUAL_INCOME {
                assert_eq!(ctx.get(key), Some(value), "key {} must survive", key);
            }
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let patch = ContextPatch::new()
            .set(keys::MONTHLY_RENT, 2500.0)
            .set(keys::AWAITING_INCOME_DATA, false);

        let mut once = seeded();
        once.merge(patch.clone());

        let mut twice = seeded();
        twice.merge(patch.clone());
        let changed = twice.merge(patch);

        assert_eq!(changed, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_patch_does_not_bump_version() {
        let mut ctx = seeded();
        let version = ctx.version();
        ctx.merge(ContextPatch::new());
        assert_eq!(ctx.version(), version);
    }

    #[test]
    fn test_awaiting_flags_lists_raised_flags_only() {
        let mut ctx = seeded();
        ctx.merge(ContextPatch::new().set(keys::AWAITING_RENTAL_DATA, false));
        assert_eq!(ctx.awaiting_flags(), vec![keys::AWAITING_INCOME_DATA]);
    }

    #[test]
    fn test_typed_getters() {
        let mut ctx = SharedContext::new();
        ctx.merge(
            ContextPatch::new()
                .set(keys::OWNERSHIP_YEARS, 3)
                .set(keys::SELLER_CUI, "  ")
                .set_opt(keys::PROPERTY_VALUE, None::<f64>),
        );
        assert_eq!(ctx.get_u32(keys::OWNERSHIP_YEARS), Some(3));
        assert_eq!(ctx.get_str(keys::SELLER_CUI), None);
        assert!(!ctx.contains(keys::PROPERTY_VALUE));
        assert!(!ctx.flag("missing"));
    }
}
