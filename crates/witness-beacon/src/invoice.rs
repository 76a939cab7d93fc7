//! Invoice store seam and per-invoice preimage resolution.
//!
//! A [`ContractTerm`] knows whether its preimage is held locally or must be
//! fetched from the external preimage service. Resolution prefers a local
//! preimage, then the service, and otherwise fails permanently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use extpreimage::{
    PaymentHash, PermanentError, Preimage, PreimageRequest, PreimageRetriever, TemporaryError,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{InvoiceStoreError, PaymentHashError};

/// Payment terms of an invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerm {
    /// The preimage is held by the external preimage service.
    pub external_preimage: bool,
    /// Locally stored hash; required when `external_preimage` is set.
    pub payment_hash: PaymentHash,
    /// Locally stored preimage; zero when unknown.
    pub payment_preimage: Preimage,
    pub value_msat: u64,
    pub settled: bool,
}

impl ContractTerm {
    pub fn local(preimage: Preimage, value_msat: u64) -> Self {
        Self {
            external_preimage: false,
            payment_hash: preimage.payment_hash(),
            payment_preimage: preimage,
            value_msat,
            settled: false,
        }
    }

    pub fn external(payment_hash: PaymentHash, value_msat: u64) -> Self {
        Self {
            external_preimage: true,
            payment_hash,
            payment_preimage: Preimage::zero(),
            value_msat,
            settled: false,
        }
    }

    /// Whole satoshis sent to the preimage service.
    pub fn amount_sats(&self) -> i64 {
        i64::try_from(self.value_msat / 1_000).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub memo: String,
    pub creation_date: DateTime<Utc>,
    pub terms: ContractTerm,
}

impl Invoice {
    pub fn new(memo: impl Into<String>, terms: ContractTerm) -> Self {
        Self {
            memo: memo.into(),
            creation_date: Utc::now(),
            terms,
        }
    }
}

/// Write side of the invoice store used during resolution.
#[async_trait]
pub trait InvoiceRegistry: Send + Sync {
    async fn add_invoice_preimage(
        &self,
        payment_hash: PaymentHash,
        preimage: Preimage,
    ) -> Result<(), InvoiceStoreError>;
}

#[async_trait]
pub trait InvoiceDatabase: InvoiceRegistry {
    /// Returns the invoice and the height it was added at.
    async fn lookup_invoice(
        &self,
        payment_hash: &PaymentHash,
    ) -> Result<(Invoice, u32), InvoiceStoreError>;
}

/// Something whose preimage can be resolved, possibly through the external
/// preimage service.
#[async_trait]
pub trait PreimageResolver: Send + Sync {
    fn payment_hash(&self) -> Result<PaymentHash, PaymentHashError>;

    async fn payment_preimage(
        &self,
        time_lock: u32,
        current_height: u32,
        client: Option<&dyn PreimageRetriever>,
        registry: &dyn InvoiceRegistry,
    ) -> extpreimage::Result<Preimage>;
}

#[async_trait]
impl PreimageResolver for ContractTerm {
    fn payment_hash(&self) -> Result<PaymentHash, PaymentHashError> {
        if self.external_preimage {
            if self.payment_hash.is_zero() {
                return Err(PaymentHashError::MissingExternalHash);
            }
            return Ok(self.payment_hash);
        }

        if self.payment_preimage.is_zero() {
            return Err(PaymentHashError::MissingPreimage);
        }
        Ok(self.payment_preimage.payment_hash())
    }

    async fn payment_preimage(
        &self,
        time_lock: u32,
        current_height: u32,
        client: Option<&dyn PreimageRetriever>,
        registry: &dyn InvoiceRegistry,
    ) -> extpreimage::Result<Preimage> {
        if !self.payment_preimage.is_zero() {
            return Ok(self.payment_preimage);
        }

        if !self.external_preimage {
            return Err(PermanentError::NoPreimageAvailable.into());
        }

        let client = client.ok_or(TemporaryError::NoClientConfigured)?;
        let request = PreimageRequest::new(self.payment_hash, self.amount_sats())
            .with_contract(time_lock, current_height);
        let preimage = client.retrieve(&request).await?;

        // Persist before settling so duplicate payments resolve locally
        // without another round trip to the service.
        registry
            .add_invoice_preimage(self.payment_hash, preimage)
            .await
            .map_err(|error| TemporaryError::RegistryWrite(error.to_string()))?;
        debug!(payment_hash = %self.payment_hash, "persisted external preimage to invoice");

        Ok(preimage)
    }
}

pub fn memory() -> Arc<MemoryInvoiceStore> {
    Arc::new(MemoryInvoiceStore::default())
}

#[derive(Default)]
pub struct MemoryInvoiceStore {
    inner: Mutex<MemoryInvoiceInner>,
}

#[derive(Default)]
struct MemoryInvoiceInner {
    invoices: HashMap<PaymentHash, (Invoice, u32)>,
    height: u32,
}

impl MemoryInvoiceStore {
    /// Adds an invoice keyed by its contract term's payment hash.
    pub async fn add_invoice(&self, invoice: Invoice) -> Result<PaymentHash, InvoiceStoreError> {
        let payment_hash = invoice
            .terms
            .payment_hash()
            .map_err(|error| InvoiceStoreError::Db(error.to_string()))?;
        let mut inner = self.inner.lock().await;
        if inner.invoices.contains_key(&payment_hash) {
            return Err(InvoiceStoreError::Db(format!(
                "invoice with payment hash {payment_hash} already exists"
            )));
        }
        let height = inner.height;
        inner.invoices.insert(payment_hash, (invoice, height));
        Ok(payment_hash)
    }

    pub async fn set_height(&self, height: u32) {
        self.inner.lock().await.height = height;
    }
}

#[async_trait]
impl InvoiceRegistry for MemoryInvoiceStore {
    async fn add_invoice_preimage(
        &self,
        payment_hash: PaymentHash,
        preimage: Preimage,
    ) -> Result<(), InvoiceStoreError> {
        if !preimage.matches(&payment_hash) {
            return Err(InvoiceStoreError::Db(
                "preimage does not match invoice payment hash".to_string(),
            ));
        }
        let mut inner = self.inner.lock().await;
        let (invoice, _) = inner
            .invoices
            .get_mut(&payment_hash)
            .ok_or(InvoiceStoreError::NotFound)?;
        invoice.terms.payment_preimage = preimage;
        Ok(())
    }
}

#[async_trait]
impl InvoiceDatabase for MemoryInvoiceStore {
    async fn lookup_invoice(
        &self,
        payment_hash: &PaymentHash,
    ) -> Result<(Invoice, u32), InvoiceStoreError> {
        self.inner
            .lock()
            .await
            .invoices
            .get(payment_hash)
            .cloned()
            .ok_or(InvoiceStoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingRegistry, ScriptedRetriever};
    use extpreimage::RetrievalError;

    fn random_preimage() -> Preimage {
        Preimage::from_bytes(rand::random())
    }

    #[test]
    fn payment_hash_follows_preimage_policy() {
        let preimage = random_preimage();
        let hash = preimage.payment_hash();

        struct Case {
            name: &'static str,
            term: ContractTerm,
            expected: Result<PaymentHash, PaymentHashError>,
        }

        let cases = vec![
            Case {
                name: "external preimage with local hash",
                term: ContractTerm::external(hash, 1_000),
                expected: Ok(hash),
            },
            Case {
                name: "external preimage without local hash",
                term: ContractTerm::external(PaymentHash::zero(), 1_000),
                expected: Err(PaymentHashError::MissingExternalHash),
            },
            Case {
                name: "local preimage without preimage",
                term: ContractTerm {
                    value_msat: 1_000,
                    ..ContractTerm::default()
                },
                expected: Err(PaymentHashError::MissingPreimage),
            },
            Case {
                name: "local preimage with preimage",
                term: ContractTerm {
                    payment_hash: PaymentHash::zero(),
                    ..ContractTerm::local(preimage, 1_000)
                },
                expected: Ok(hash),
            },
        ];

        for case in cases {
            assert_eq!(case.term.payment_hash(), case.expected, "{}", case.name);
        }
    }

    #[test]
    fn invoice_serializes_secrets_as_hex() -> anyhow::Result<()> {
        let preimage = Preimage::from_bytes([0xab; 32]);
        let invoice = Invoice::new("coffee", ContractTerm::local(preimage, 42_000));

        let value = serde_json::to_value(&invoice)?;
        assert_eq!(value["terms"]["payment_preimage"], "ab".repeat(32));
        assert_eq!(value["terms"]["external_preimage"], false);

        let decoded: Invoice = serde_json::from_value(value)?;
        assert_eq!(decoded, invoice);
        Ok(())
    }

    #[tokio::test]
    async fn local_preimage_wins_even_when_external() -> anyhow::Result<()> {
        let preimage = random_preimage();
        let client = ScriptedRetriever::default();
        let registry = MemoryInvoiceStore::default();
        let term = ContractTerm {
            external_preimage: true,
            ..ContractTerm::local(preimage, 1_000)
        };

        let resolved = term
            .payment_preimage(288, 123_456, Some(&client), &registry)
            .await?;
        assert_eq!(resolved, preimage);
        assert_eq!(client.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn external_preimage_is_retrieved_and_persisted() -> anyhow::Result<()> {
        let preimage = random_preimage();
        let hash = preimage.payment_hash();
        let client = ScriptedRetriever::default();
        client.push(Ok(preimage));
        let registry = MemoryInvoiceStore::default();
        let term = ContractTerm::external(hash, 1_500_000);
        registry.add_invoice(Invoice::new("external", term.clone())).await?;

        let resolved = term
            .payment_preimage(288, 123_456, Some(&client), &registry)
            .await?;
        assert_eq!(resolved, preimage);

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payment_hash, hash);
        assert_eq!(requests[0].amount_sats, 1_500);
        assert_eq!(requests[0].time_lock, 288);
        assert_eq!(requests[0].best_height, 123_456);

        let (stored, _) = registry.lookup_invoice(&hash).await?;
        assert_eq!(stored.terms.payment_preimage, preimage);
        Ok(())
    }

    #[tokio::test]
    async fn missing_client_is_temporary() {
        let term = ContractTerm::external(random_preimage().payment_hash(), 1_000);
        let registry = MemoryInvoiceStore::default();

        let result = term.payment_preimage(0, 0, None, &registry).await;
        assert!(matches!(
            result,
            Err(RetrievalError::Temporary(TemporaryError::NoClientConfigured))
        ));
    }

    #[tokio::test]
    async fn client_failures_propagate_unchanged() {
        let term = ContractTerm::external(random_preimage().payment_hash(), 1_000);
        let registry = MemoryInvoiceStore::default();
        let client = ScriptedRetriever::default();
        client.push(Err(TemporaryError::StreamClosedEarly.into()));
        client.push(Err(PermanentError::Service("fake perm error".to_string()).into()));

        let first = term.payment_preimage(0, 0, Some(&client), &registry).await;
        assert!(matches!(
            first,
            Err(RetrievalError::Temporary(TemporaryError::StreamClosedEarly))
        ));

        let second = term.payment_preimage(0, 0, Some(&client), &registry).await;
        assert!(matches!(
            second,
            Err(RetrievalError::Permanent(PermanentError::Service(ref message))) if message == "fake perm error"
        ));
    }

    #[tokio::test]
    async fn registry_write_failure_is_temporary() {
        let preimage = random_preimage();
        let term = ContractTerm::external(preimage.payment_hash(), 1_000);
        let client = ScriptedRetriever::default();
        client.push(Ok(preimage));

        let result = term
            .payment_preimage(0, 0, Some(&client), &FailingRegistry)
            .await;
        assert!(matches!(
            result,
            Err(RetrievalError::Temporary(TemporaryError::RegistryWrite(_)))
        ));
    }

    #[tokio::test]
    async fn no_preimage_and_not_external_is_permanent() -> anyhow::Result<()> {
        let term = ContractTerm::default();
        let client = ScriptedRetriever::default();
        let registry = MemoryInvoiceStore::default();

        let error = term
            .payment_preimage(0, 0, Some(&client), &registry)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected a permanent error"))?;
        assert_eq!(error.as_permanent(), Some(&PermanentError::NoPreimageAvailable));
        assert!(error.to_string().contains("no preimage available on invoice"));
        assert_eq!(client.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicates_and_mismatched_preimages() -> anyhow::Result<()> {
        let store = MemoryInvoiceStore::default();
        let preimage = random_preimage();
        let hash = store
            .add_invoice(Invoice::new("local", ContractTerm::local(preimage, 1)))
            .await?;
        assert_eq!(hash, preimage.payment_hash());
        assert!(
            store
                .add_invoice(Invoice::new("again", ContractTerm::local(preimage, 1)))
                .await
                .is_err()
        );

        assert!(
            store
                .add_invoice_preimage(hash, random_preimage())
                .await
                .is_err()
        );
        assert_eq!(
            store
                .lookup_invoice(&random_preimage().payment_hash())
                .await,
            Err(InvoiceStoreError::NotFound)
        );
        Ok(())
    }
}
