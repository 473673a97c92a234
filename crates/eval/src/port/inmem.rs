//! In-memory billing ports.
//!
//! Seeded customer, invoice, and payment-processor adapters used by the demo
//! executor and by tests. They answer the facts of the bundled billing
//! contract and perform `ProcessPayment` against in-process state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{Port, PortError, PortRegistry};
use crate::numeric::{from_decimal, to_decimal};
use crate::types::{AppliedTransition, Input};

fn input_str<'a>(input: &'a Input, key: &str) -> Result<&'a str, PortError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PortError::InvalidInput(format!("'{}' must be a string", key)))
}

// ──────────────────────────────────────────────
// CustomerRepo
// ──────────────────────────────────────────────

/// Customer account statuses keyed by `customer.id`.
pub struct CustomerRepo {
    customers: RwLock<HashMap<String, String>>,
}

impl CustomerRepo {
    pub fn new() -> Self {
        CustomerRepo {
            customers: RwLock::new(HashMap::new()),
        }
    }

    /// `cust_123` active, `cust_456` closed, `cust_789` suspended.
    pub fn seeded() -> Self {
        let customers = [
            ("cust_123", "active"),
            ("cust_456", "closed"),
            ("cust_789", "suspended"),
        ]
        .into_iter()
        .map(|(id, status)| (id.to_string(), status.to_string()))
        .collect();
        CustomerRepo {
            customers: RwLock::new(customers),
        }
    }

    pub async fn set_status(&self, customer_id: &str, status: &str) {
        self.customers
            .write()
            .await
            .insert(customer_id.to_string(), status.to_string());
    }
}

impl Default for CustomerRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Port for CustomerRepo {
    async fn get(&self, fact: &str, input: &Input) -> Result<Value, PortError> {
        match fact {
            "customer.status" => {
                let id = input_str(input, "customer.id")?;
                let customers = self.customers.read().await;
                customers
                    .get(id)
                    .map(|status| Value::String(status.clone()))
                    .ok_or_else(|| PortError::NotFound(format!("customer '{}'", id)))
            }
            other => Err(PortError::Unsupported {
                what: format!("fact '{}'", other),
            }),
        }
    }

    async fn execute(&self, operation: &str, _input: &Input) -> Result<Value, PortError> {
        Err(PortError::Unsupported {
            what: format!("operation '{}'", operation),
        })
    }
}

// ──────────────────────────────────────────────
// InvoiceRepo
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub balance: Decimal,
    pub currency: String,
}

impl Invoice {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "customer_id": self.customer_id,
            "status": self.status,
            "balance": from_decimal(self.balance),
            "currency": self.currency,
        })
    }
}

/// Invoices keyed by `invoice.id`. Executes `ProcessPayment` and
/// `GetInvoice`, and owns the `Invoice` entity state.
pub struct InvoiceRepo {
    invoices: RwLock<HashMap<String, Invoice>>,
}

impl InvoiceRepo {
    pub fn new() -> Self {
        InvoiceRepo {
            invoices: RwLock::new(HashMap::new()),
        }
    }

    /// `inv_001` approved 1500 USD, `inv_002` draft 250 USD, `inv_003`
    /// approved 25000 USD.
    pub fn seeded() -> Self {
        let repo = InvoiceRepo::new();
        let seed = [
            ("inv_001", "cust_123", "approved", 1500),
            ("inv_002", "cust_123", "draft", 250),
            ("inv_003", "cust_456", "approved", 25000),
        ];
        let invoices = seed
            .into_iter()
            .map(|(id, customer, status, balance)| {
                (
                    id.to_string(),
                    Invoice {
                        id: id.to_string(),
                        customer_id: customer.to_string(),
                        status: status.to_string(),
                        balance: Decimal::from(balance),
                        currency: "USD".to_string(),
                    },
                )
            })
            .collect();
        InvoiceRepo {
            invoices: RwLock::new(invoices),
        }
    }

    pub async fn invoice(&self, id: &str) -> Option<Invoice> {
        self.invoices.read().await.get(id).cloned()
    }

    pub async fn insert(&self, invoice: Invoice) {
        self.invoices
            .write()
            .await
            .insert(invoice.id.clone(), invoice);
    }

    async fn process_payment(&self, input: &Input) -> Result<Value, PortError> {
        let id = input_str(input, "invoice.id")?;
        let amount = input
            .get("payment.amount")
            .and_then(|amount| match amount {
                Value::Object(map) => map.get("value").and_then(to_decimal),
                other => to_decimal(other),
            })
            .ok_or_else(|| {
                PortError::InvalidInput("'payment.amount' must carry a numeric value".to_string())
            })?;

        let mut invoices = self.invoices.write().await;
        let invoice = invoices
            .get_mut(id)
            .ok_or_else(|| PortError::NotFound(format!("invoice '{}'", id)))?;
        invoice.balance = invoice
            .balance
            .checked_sub(amount)
            .ok_or_else(|| PortError::Failed("balance arithmetic overflow".to_string()))?;

        let payment_id = format!("pay_{}", Uuid::new_v4().simple());
        debug!(invoice = %id, %payment_id, amount = %amount, "payment processed");
        Ok(json!({
            "payment_id": payment_id,
            "status": "completed",
            "new_balance": from_decimal(invoice.balance),
        }))
    }
}

impl Default for InvoiceRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Port for InvoiceRepo {
    async fn get(&self, fact: &str, input: &Input) -> Result<Value, PortError> {
        let id = input_str(input, "invoice.id")?;
        let invoices = self.invoices.read().await;
        let invoice = invoices
            .get(id)
            .ok_or_else(|| PortError::NotFound(format!("invoice '{}'", id)))?;
        match fact {
            "invoice.balance" => Ok(json!({
                "value": from_decimal(invoice.balance),
                "currency": invoice.currency,
            })),
            "invoice.status" => Ok(Value::String(invoice.status.clone())),
            "invoice.customer_id" => Ok(Value::String(invoice.customer_id.clone())),
            other => Err(PortError::Unsupported {
                what: format!("fact '{}'", other),
            }),
        }
    }

    async fn execute(&self, operation: &str, input: &Input) -> Result<Value, PortError> {
        match operation {
            "ProcessPayment" => self.process_payment(input).await,
            "GetInvoice" => {
                let id = input_str(input, "invoice.id")?;
                self.invoices
                    .read()
                    .await
                    .get(id)
                    .map(Invoice::to_json)
                    .ok_or_else(|| PortError::NotFound(format!("invoice '{}'", id)))
            }
            other => Err(PortError::Unsupported {
                what: format!("operation '{}'", other),
            }),
        }
    }

    async fn transition(
        &self,
        _operation: &str,
        transition: &AppliedTransition,
        input: &Input,
    ) -> Result<(), PortError> {
        if transition.entity != "Invoice" {
            return Err(PortError::Unsupported {
                what: format!("entity '{}'", transition.entity),
            });
        }
        let id = input_str(input, "invoice.id")?;
        let mut invoices = self.invoices.write().await;
        let invoice = invoices
            .get_mut(id)
            .ok_or_else(|| PortError::NotFound(format!("invoice '{}'", id)))?;
        invoice.status = transition.to.clone();
        Ok(())
    }
}

// ──────────────────────────────────────────────
// PaymentProcessor
// ──────────────────────────────────────────────

/// Reports the health of the payment processor. Status is settable so that
/// tests and operators can simulate an outage.
pub struct PaymentProcessor {
    status: RwLock<String>,
}

impl PaymentProcessor {
    pub fn new(status: &str) -> Self {
        PaymentProcessor {
            status: RwLock::new(status.to_string()),
        }
    }

    pub async fn set_status(&self, status: &str) {
        *self.status.write().await = status.to_string();
    }

    pub async fn status(&self) -> String {
        self.status.read().await.clone()
    }
}

#[async_trait]
impl Port for PaymentProcessor {
    async fn get(&self, fact: &str, _input: &Input) -> Result<Value, PortError> {
        match fact {
            "payment.processor.status" => Ok(Value::String(self.status().await)),
            other => Err(PortError::Unsupported {
                what: format!("fact '{}'", other),
            }),
        }
    }

    async fn execute(&self, operation: &str, _input: &Input) -> Result<Value, PortError> {
        Err(PortError::Unsupported {
            what: format!("operation '{}'", operation),
        })
    }
}

// ──────────────────────────────────────────────
// Billing bundle
// ──────────────────────────────────────────────

/// The three seeded billing ports, kept by handle so callers can mutate
/// their state after building a registry.
#[derive(Clone)]
pub struct BillingPorts {
    pub customers: Arc<CustomerRepo>,
    pub invoices: Arc<InvoiceRepo>,
    pub processor: Arc<PaymentProcessor>,
}

impl BillingPorts {
    pub fn seeded() -> Self {
        BillingPorts {
            customers: Arc::new(CustomerRepo::seeded()),
            invoices: Arc::new(InvoiceRepo::seeded()),
            processor: Arc::new(PaymentProcessor::new("up")),
        }
    }

    /// Registry with `customerRepo`, `invoiceRepo` (default executor), and
    /// `paymentProcessor`.
    pub fn registry(&self) -> PortRegistry {
        PortRegistry::new()
            .with("customerRepo", self.customers.clone())
            .with("invoiceRepo", self.invoices.clone())
            .with("paymentProcessor", self.processor.clone())
            .with_default_executor("invoiceRepo")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(pairs: &[(&str, Value)]) -> Input {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn customer_status_lookup() {
        let repo = CustomerRepo::seeded();
        let value = repo
            .get("customer.status", &input(&[("customer.id", json!("cust_456"))]))
            .await
            .unwrap();
        assert_eq!(value, json!("closed"));

        let err = repo
            .get("customer.status", &input(&[("customer.id", json!("nobody"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));

        let err = repo.get("customer.status", &Input::new()).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn invoice_facts_and_payment() {
        let repo = InvoiceRepo::seeded();
        let req = input(&[
            ("invoice.id", json!("inv_001")),
            ("payment.amount", json!({"value": 500, "currency": "USD"})),
        ]);
        assert_eq!(
            repo.get("invoice.balance", &req).await.unwrap(),
            json!({"value": 1500, "currency": "USD"})
        );
        assert_eq!(repo.get("invoice.status", &req).await.unwrap(), json!("approved"));

        let output = repo.execute("ProcessPayment", &req).await.unwrap();
        assert_eq!(output["status"], json!("completed"));
        assert_eq!(output["new_balance"], json!(1000));
        assert!(output["payment_id"].as_str().unwrap().starts_with("pay_"));

        let t = AppliedTransition {
            entity: "Invoice".into(),
            from: Some("approved".into()),
            to: "paid".into(),
        };
        repo.transition("ProcessPayment", &t, &req).await.unwrap();
        assert_eq!(repo.invoice("inv_001").await.unwrap().status, "paid");
    }

    #[tokio::test]
    async fn processor_status_is_settable() {
        let processor = PaymentProcessor::new("up");
        processor.set_status("down").await;
        assert_eq!(
            processor
                .get("payment.processor.status", &Input::new())
                .await
                .unwrap(),
            json!("down")
        );
        assert!(processor.execute("Anything", &Input::new()).await.is_err());
    }

    #[test]
    fn billing_registry_names() {
        let ports = BillingPorts::seeded();
        let registry = ports.registry();
        assert_eq!(
            registry.names(),
            vec!["customerRepo", "invoiceRepo", "paymentProcessor"]
        );
    }
}
