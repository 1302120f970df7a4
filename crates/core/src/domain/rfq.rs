use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::stage::StageStatus;
use crate::domain::work_order::WorkOrderId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RfqId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rfq {
    pub id: RfqId,
    pub work_order_id: WorkOrderId,
    pub code: String,
    pub assigned_to: Option<String>,
    pub stage_status: StageStatus,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Line item of an RFQ, keyed within the RFQ by the external catalog
/// `item_id`. `unit_price`/`lead_time` hold the item's own stored values;
/// read paths overlay the selected vendor quote on top of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RfqItem {
    pub id: String,
    pub rfq_id: RfqId,
    pub item_id: String,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub lead_time: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RfqItem {
    pub fn line_amount(quantity: u32, unit_price: Decimal) -> Decimal {
        Decimal::from(quantity) * unit_price
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfqVendor {
    pub id: String,
    pub rfq_id: RfqId,
    pub vendor_id: String,
    pub name: Option<String>,
    pub contact_person: Option<String>,
    pub payment_terms: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One vendor's offer for one item, keyed by (vendor_id, item_id) within the
/// RFQ. At most one quote per item is expected to carry `is_selected`; this
/// is a soft convention, not a schema constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RfqItemVendorQuote {
    pub id: String,
    pub rfq_id: RfqId,
    pub item_id: String,
    pub vendor_id: String,
    pub unit_price: Decimal,
    pub lead_time: Option<String>,
    pub is_selected: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fully resolved RFQ as returned to callers: items already carry their
/// effective price/lead-time after selected-quote projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RfqDetail {
    pub rfq: Rfq,
    pub items: Vec<RfqItem>,
    pub vendors: Vec<RfqVendor>,
    pub quotes: Vec<RfqItemVendorQuote>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRfq {
    pub work_order_id: WorkOrderId,
    pub assigned_to: Option<String>,
    pub remarks: Option<String>,
}

// ---------------------------------------------------------------------------
// Desired-state payloads
//
// Clients reference items and vendors by several alternate spellings, or by a
// nested catalog object, and may omit surrogate ids entirely. Each payload
// type exposes a canonical_* accessor that resolves the aliases; the
// reconciler refuses to diff anything that cannot be resolved.
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogItemRef {
    #[serde(alias = "itemId", alias = "item_id")]
    pub id: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VendorRef {
    #[serde(alias = "vendorId", alias = "vendor_id")]
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RfqItemPayload {
    pub id: Option<String>,
    #[serde(alias = "item_id", alias = "itemCode")]
    pub item_id: Option<String>,
    pub item: Option<CatalogItemRef>,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Option<Decimal>,
    pub lead_time: Option<String>,
}

impl RfqItemPayload {
    pub fn canonical_item_id(&self) -> Result<String, DomainError> {
        self.item_id
            .clone()
            .or_else(|| self.item.as_ref().and_then(|item| item.id.clone()))
            .ok_or_else(|| DomainError::missing(["itemId"]))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RfqVendorPayload {
    pub id: Option<String>,
    #[serde(alias = "vendor_id", alias = "vendorCode")]
    pub vendor_id: Option<String>,
    pub vendor: Option<VendorRef>,
    pub name: Option<String>,
    pub contact_person: Option<String>,
    pub payment_terms: Option<String>,
    pub quotes: Vec<RfqQuotePayload>,
}

impl RfqVendorPayload {
    pub fn canonical_vendor_id(&self) -> Result<String, DomainError> {
        self.vendor_id
            .clone()
            .or_else(|| self.vendor.as_ref().and_then(|vendor| vendor.id.clone()))
            .ok_or_else(|| DomainError::missing(["vendorId"]))
    }

    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.vendor.as_ref().and_then(|vendor| vendor.name.clone()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RfqQuotePayload {
    pub id: Option<String>,
    #[serde(alias = "item_id", alias = "itemCode")]
    pub item_id: Option<String>,
    pub item: Option<CatalogItemRef>,
    #[serde(alias = "vendor_id", alias = "vendorCode")]
    pub vendor_id: Option<String>,
    pub vendor: Option<VendorRef>,
    pub unit_price: Option<Decimal>,
    pub lead_time: Option<String>,
    pub is_selected: bool,
    pub notes: Option<String>,
}

impl RfqQuotePayload {
    pub fn canonical_item_id(&self) -> Result<String, DomainError> {
        self.item_id
            .clone()
            .or_else(|| self.item.as_ref().and_then(|item| item.id.clone()))
            .ok_or_else(|| DomainError::missing(["itemId"]))
    }

    /// Vendor id, falling back to the enclosing vendor when the quote was
    /// nested inside a vendor payload.
    pub fn canonical_vendor_id(&self, enclosing: Option<&str>) -> Result<String, DomainError> {
        self.vendor_id
            .clone()
            .or_else(|| self.vendor.as_ref().and_then(|vendor| vendor.id.clone()))
            .or_else(|| enclosing.map(str::to_string))
            .ok_or_else(|| DomainError::missing(["vendorId"]))
    }
}

/// Full desired state of an RFQ submitted by the update flow. Quotes can be
/// nested per vendor, flattened at the top level, or both.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RfqDesiredState {
    pub status: Option<StageStatus>,
    pub assigned_to: Option<String>,
    pub remarks: Option<String>,
    pub items: Vec<RfqItemPayload>,
    pub vendors: Vec<RfqVendorPayload>,
    pub quotes: Vec<RfqQuotePayload>,
}

#[cfg(test)]
mod tests {
    use super::{RfqItemPayload, RfqQuotePayload, RfqVendorPayload};
    use crate::errors::DomainError;

    #[test]
    fn item_aliases_resolve_to_one_canonical_id() {
        let by_field: RfqItemPayload =
            serde_json::from_str(r#"{"itemId":"CAT-9","quantity":2}"#).expect("parse");
        let by_nested: RfqItemPayload =
            serde_json::from_str(r#"{"item":{"id":"CAT-9"},"quantity":2}"#).expect("parse");
        let by_snake: RfqItemPayload =
            serde_json::from_str(r#"{"item_id":"CAT-9","quantity":2}"#).expect("parse");

        for payload in [by_field, by_nested, by_snake] {
            assert_eq!(payload.canonical_item_id().expect("canonical id"), "CAT-9");
        }
    }

    #[test]
    fn unresolvable_item_reference_is_a_validation_failure() {
        let payload: RfqItemPayload =
            serde_json::from_str(r#"{"quantity":1}"#).expect("parse");
        assert_eq!(
            payload.canonical_item_id(),
            Err(DomainError::missing(["itemId"]))
        );
    }

    #[test]
    fn nested_quote_inherits_the_enclosing_vendor() {
        let vendor: RfqVendorPayload = serde_json::from_str(
            r#"{"vendor":{"id":"V-1","name":"Acme"},"quotes":[{"itemId":"CAT-9","unitPrice":"12.50"}]}"#,
        )
        .expect("parse");

        let vendor_id = vendor.canonical_vendor_id().expect("vendor id");
        assert_eq!(vendor_id, "V-1");
        assert_eq!(vendor.display_name().as_deref(), Some("Acme"));

        let quote = &vendor.quotes[0];
        assert_eq!(quote.canonical_vendor_id(Some(&vendor_id)).expect("inherited"), "V-1");
        assert_eq!(quote.canonical_item_id().expect("item id"), "CAT-9");
    }

    #[test]
    fn explicit_quote_vendor_beats_the_enclosing_one() {
        let quote: RfqQuotePayload =
            serde_json::from_str(r#"{"itemId":"CAT-9","vendorId":"V-2"}"#).expect("parse");
        assert_eq!(quote.canonical_vendor_id(Some("V-1")).expect("explicit"), "V-2");
    }
}
