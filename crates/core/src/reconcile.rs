//! Diff-based reconciliation of RFQ child collections.
//!
//! An RFQ update submits the full desired state of three collections (items,
//! vendors, per-item-per-vendor quotes). Each collection is reconciled
//! against persisted state by natural key: persisted keys absent from the
//! payload are deleted, matched keys are updated in place, unmatched payload
//! keys are inserted. The natural keys differ per collection (`item_id`,
//! `vendor_id`, and the composite `(vendor_id, item_id)`), which is why the
//! planner is generic over the key instead of duplicated per collection.
//!
//! Alias normalization runs before any diffing: payloads reference items and
//! vendors by alternate field spellings or nested catalog objects, and a key
//! computed from an unresolved alias would make an existing row look new.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::rfq::{RfqDesiredState, RfqItem, RfqItemVendorQuote};
use crate::errors::DomainError;

/// Composite natural key of a quote within one RFQ.
pub type QuoteKey = (String, String); // (vendor_id, item_id)

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilePlan<K, T> {
    pub to_delete: Vec<K>,
    pub to_update: Vec<(K, T)>,
    pub to_insert: Vec<(K, T)>,
}

impl<K, T> ReconcilePlan<K, T> {
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty() && self.to_update.is_empty() && self.to_insert.is_empty()
    }
}

/// Compute the delete/update/insert plan for one collection.
///
/// Duplicate incoming keys collapse to the last occurrence, so any payload
/// reduces to a set keyed by natural key. Deletes are emitted in sorted key
/// order; updates and inserts keep payload order.
pub fn plan_reconcile<K, T>(
    persisted: &HashSet<K>,
    incoming: Vec<(K, T)>,
) -> ReconcilePlan<K, T>
where
    K: Eq + std::hash::Hash + Ord + Clone,
{
    let mut deduped: Vec<(K, T)> = Vec::with_capacity(incoming.len());
    let mut position: HashMap<K, usize> = HashMap::new();
    for (key, value) in incoming {
        match position.get(&key) {
            Some(&index) => deduped[index] = (key, value),
            None => {
                position.insert(key.clone(), deduped.len());
                deduped.push((key, value));
            }
        }
    }

    let incoming_keys: HashSet<K> = position.into_keys().collect();
    let mut to_delete: Vec<K> =
        persisted.iter().filter(|key| !incoming_keys.contains(key)).cloned().collect();
    to_delete.sort();

    let (to_update, to_insert): (Vec<_>, Vec<_>) =
        deduped.into_iter().partition(|(key, _)| persisted.contains(key));

    debug!(
        deletes = to_delete.len(),
        updates = to_update.len(),
        inserts = to_insert.len(),
        "reconcile plan computed"
    );

    ReconcilePlan { to_delete, to_update, to_insert }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub item_id: String,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub lead_time: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedVendor {
    pub vendor_id: String,
    pub name: Option<String>,
    pub contact_person: Option<String>,
    pub payment_terms: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuote {
    pub item_id: String,
    pub vendor_id: String,
    pub unit_price: Decimal,
    pub lead_time: Option<String>,
    pub is_selected: bool,
    pub notes: Option<String>,
}

impl NormalizedQuote {
    pub fn key(&self) -> QuoteKey {
        (self.vendor_id.clone(), self.item_id.clone())
    }
}

/// Desired state with every reference resolved to canonical ids, ready for
/// key diffing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedRfqState {
    pub items: Vec<NormalizedItem>,
    pub vendors: Vec<NormalizedVendor>,
    pub quotes: Vec<NormalizedQuote>,
}

/// Resolve every alias in the payload. Quotes nested inside vendors inherit
/// the vendor's canonical id and are flattened ahead of the top-level quote
/// list, so a top-level entry for the same (vendor, item) wins.
pub fn normalize_desired_state(payload: &RfqDesiredState) -> Result<NormalizedRfqState, DomainError> {
    let mut state = NormalizedRfqState::default();

    for item in &payload.items {
        state.items.push(NormalizedItem {
            item_id: item.canonical_item_id()?,
            description: item
                .description
                .clone()
                .or_else(|| item.item.as_ref().and_then(|r| r.description.clone())),
            quantity: item.quantity,
            unit_price: item.unit_price.unwrap_or(Decimal::ZERO),
            lead_time: item.lead_time.clone(),
        });
    }

    for vendor in &payload.vendors {
        let vendor_id = vendor.canonical_vendor_id()?;
        for quote in &vendor.quotes {
            state.quotes.push(normalize_quote(quote, Some(&vendor_id))?);
        }
        state.vendors.push(NormalizedVendor {
            vendor_id,
            name: vendor.display_name(),
            contact_person: vendor.contact_person.clone(),
            payment_terms: vendor.payment_terms.clone(),
        });
    }

    for quote in &payload.quotes {
        state.quotes.push(normalize_quote(quote, None)?);
    }

    Ok(state)
}

fn normalize_quote(
    quote: &crate::domain::rfq::RfqQuotePayload,
    enclosing_vendor: Option<&str>,
) -> Result<NormalizedQuote, DomainError> {
    Ok(NormalizedQuote {
        item_id: quote.canonical_item_id()?,
        vendor_id: quote.canonical_vendor_id(enclosing_vendor)?,
        unit_price: quote.unit_price.unwrap_or(Decimal::ZERO),
        lead_time: quote.lead_time.clone(),
        is_selected: quote.is_selected,
        notes: quote.notes.clone(),
    })
}

// ---------------------------------------------------------------------------
// Selected-quote projection
// ---------------------------------------------------------------------------

/// Overlay the selected quote's price and lead time onto each item. Items
/// without a selected quote keep their own stored values. When several
/// quotes claim selection for one item the (vendor_id)-least one is taken,
/// deterministically. Recomputed on every read path; never persisted back.
pub fn apply_selected_quotes(items: &mut [RfqItem], quotes: &[RfqItemVendorQuote]) {
    for item in items {
        let selected = quotes
            .iter()
            .filter(|quote| quote.is_selected && quote.item_id == item.item_id)
            .min_by(|a, b| a.vendor_id.cmp(&b.vendor_id));
        if let Some(quote) = selected {
            item.unit_price = quote.unit_price;
            item.lead_time = quote.lead_time.clone();
            item.amount = RfqItem::line_amount(item.quantity, quote.unit_price);
        }
    }
}
