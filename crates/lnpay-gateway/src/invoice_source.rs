//! Where challenge invoices come from.

use l402::{Invoice, LnurlClient, LnurlError, VerifyStatus};
use std::future::Future;
use std::pin::Pin;
use url::Url;

pub type InvoiceFuture<'a> = Pin<Box<dyn Future<Output = Result<Invoice, LnurlError>> + Send + 'a>>;

pub type VerifyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<VerifyStatus, LnurlError>> + Send + 'a>>;

/// Issues invoices for the gate and answers settlement polls.
pub trait InvoiceSource: Send + Sync {
    /// A fresh invoice for exactly `amount_msat`.
    fn create_invoice(&self, amount_msat: u64) -> InvoiceFuture<'_>;

    /// Poll the settlement endpoint the invoice came with.
    fn check_settlement<'a>(&'a self, verify_url: &'a Url) -> VerifyFuture<'a>;
}

/// Invoices from the payee's Lightning Address via LNURL-pay.
///
/// Pay request metadata is resolved per invoice, never cached.
pub struct LnurlInvoiceSource {
    client: LnurlClient,
    address: String,
}

impl LnurlInvoiceSource {
    pub fn new(client: LnurlClient, address: impl Into<String>) -> Self {
        Self {
            client,
            address: address.into(),
        }
    }
}

impl InvoiceSource for LnurlInvoiceSource {
    fn create_invoice(&self, amount_msat: u64) -> InvoiceFuture<'_> {
        Box::pin(async move {
            let metadata = self.client.resolve_address(&self.address).await?;
            self.client.request_invoice(&metadata, amount_msat).await
        })
    }

    fn check_settlement<'a>(&'a self, verify_url: &'a Url) -> VerifyFuture<'a> {
        Box::pin(self.client.check_verify(verify_url))
    }
}
