//! Bolt11 decoding.
//!
//! The bolt11 format itself is handled by `lightning-invoice`; this module
//! only extracts what the authorization flow needs.

use lightning_invoice::Bolt11Invoice;
use std::str::FromStr;

use crate::error::InvoiceError;
use crate::types::PaymentHash;

/// Fields of a bolt11 invoice the gate relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInvoice {
    pub payment_hash: PaymentHash,
    /// `None` for amountless invoices.
    pub amount_msat: Option<u64>,
    /// Unix time after which the invoice can no longer be paid.
    pub expires_at: u64,
}

/// Decode a bolt11 invoice string.
///
/// Pure and deterministic: the same string always yields the same hash.
pub fn decode(invoice: &str) -> Result<DecodedInvoice, InvoiceError> {
    let parsed = Bolt11Invoice::from_str(invoice.trim())
        .map_err(|e| InvoiceError::InvalidInvoiceFormat(e.to_string()))?;

    let payment_hash = parsed
        .payment_hash()
        .to_string()
        .parse::<PaymentHash>()
        .map_err(|e| InvoiceError::InvalidInvoiceFormat(format!("payment hash: {e}")))?;

    let expires_at = parsed
        .duration_since_epoch()
        .saturating_add(parsed.expiry_time())
        .as_secs();

    Ok(DecodedInvoice {
        payment_hash,
        amount_msat: parsed.amount_milli_satoshis(),
        expires_at,
    })
}
