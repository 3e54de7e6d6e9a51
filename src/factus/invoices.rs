//! Invoice creation, lookup and listing against the provider.

use super::filter::{normalize, InvoiceFilter};
use super::{check_status, read_json, unwrap_data, FactusClient};
use crate::error::{InvoicingError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Invoice document as returned by the provider, unwrapped from its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderInvoice(pub Value);

/// Status projection of a provider invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceStatus {
    pub number: String,
    pub status: String,
    pub cufe: Option<String>,
    pub validated: bool,
    pub validated_at: Option<String>,
}

/// Local projection of one invoice in a list page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub id: String,
    pub number: String,
    pub document_name: String,
    pub customer_name: String,
    pub identification: String,
    pub total: String,
    pub status: String,
    pub created_at: String,
    pub payment_form_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceListPage {
    pub items: Vec<InvoiceSummary>,
    pub pagination: Pagination,
}

/// Invoice operations. Holds no invoice state; every call goes upstream.
#[derive(Clone)]
pub struct InvoiceGateway {
    client: Arc<FactusClient>,
}

impl InvoiceGateway {
    pub fn new(client: Arc<FactusClient>) -> Self {
        Self { client }
    }

    /// Submit an invoice payload verbatim.
    ///
    /// Never retried: a repeated submission could emit a duplicate document
    /// to the tax authority. A 401 invalidates the token and fails with
    /// `Auth` so the caller decides whether to resubmit.
    pub async fn create_invoice(&self, payload: &Value) -> Result<ProviderInvoice> {
        let url = self.client.url("/v1/bills/validate");
        let response = self
            .client
            .send_authorized(
                |http, token| {
                    http.post(&url)
                        .bearer_auth(token)
                        .header("Accept", "application/json")
                        .json(payload)
                },
                false,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Invoice creation rejected by provider");
            return Err(InvoicingError::upstream(status.as_u16(), body));
        }

        let invoice = ProviderInvoice(unwrap_data(read_json(response).await?));
        info!(number = %invoice.number().unwrap_or_default(), "Invoice created");
        Ok(invoice)
    }

    /// Fetch one invoice by its number (prefix + consecutive).
    pub async fn get_invoice_by_number(&self, number: &str) -> Result<ProviderInvoice> {
        let url = self
            .client
            .url(&format!("/v1/bills/show/{}", urlencoding::encode(number)));
        let response = self
            .client
            .send_authorized(
                |http, token| {
                    http.get(&url)
                        .bearer_auth(token)
                        .header("Accept", "application/json")
                },
                true,
            )
            .await?;

        let response = check_status(response, &format!("invoice {}", number)).await?;
        debug!(number = %number, "Invoice fetched");
        Ok(ProviderInvoice(unwrap_data(read_json(response).await?)))
    }

    /// Fetch the validation status of one invoice.
    pub async fn get_invoice_status(&self, number: &str) -> Result<InvoiceStatus> {
        let invoice = self.get_invoice_by_number(number).await?;
        Ok(invoice.status_projection(number))
    }

    /// List invoices matching a loosely-typed filter.
    pub async fn list_invoices(&self, raw_filter: &Value) -> Result<InvoiceListPage> {
        self.list_with_filter(&normalize(raw_filter)).await
    }

    /// List invoices for an already-normalized filter.
    pub async fn list_with_filter(&self, filter: &InvoiceFilter) -> Result<InvoiceListPage> {
        let pairs = filter.to_query_pairs();
        let url = self.client.url("/v1/bills");
        debug!(query = %filter.to_query_string(), "Listing invoices");

        let response = self
            .client
            .send_authorized(
                |http, token| {
                    http.get(&url)
                        .query(&pairs)
                        .bearer_auth(token)
                        .header("Accept", "application/json")
                },
                true,
            )
            .await?;

        let response = check_status(response, "invoice list").await?;
        let body = read_json(response).await?;
        Ok(map_list_page(&body))
    }
}

impl ProviderInvoice {
    /// The invoice record itself; show responses nest it under `bill`.
    fn bill(&self) -> &Value {
        match self.0.get("bill") {
            Some(bill) if bill.is_object() => bill,
            _ => &self.0,
        }
    }

    pub fn number(&self) -> Option<String> {
        non_empty(text_at(self.bill(), &["number"]))
    }

    pub fn cufe(&self) -> Option<String> {
        non_empty(text_at(self.bill(), &["cufe"]))
    }

    fn status_projection(&self, requested: &str) -> InvoiceStatus {
        let bill = self.bill();
        let validated_at = match bill.get("validated") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        let validated = match bill.get("validated") {
            Some(Value::Bool(b)) => *b,
            _ => validated_at.is_some(),
        };
        InvoiceStatus {
            number: self.number().unwrap_or_else(|| requested.to_string()),
            status: text_at(bill, &["status"]),
            cufe: self.cufe(),
            validated,
            validated_at,
        }
    }
}

/// Map the provider list envelope `{ data: { data: [...], pagination } }`.
fn map_list_page(body: &Value) -> InvoiceListPage {
    let data = body.get("data").unwrap_or(&Value::Null);
    let items = data
        .get("data")
        .and_then(Value::as_array)
        .map(|records| records.iter().map(map_summary).collect())
        .unwrap_or_default();
    let pagination = data
        .get("pagination")
        .map(map_pagination)
        .unwrap_or_default();
    InvoiceListPage { items, pagination }
}

fn map_summary(record: &Value) -> InvoiceSummary {
    let customer_name = ["names", "graphic_representation_name", "company", "trade_name"]
        .iter()
        .map(|key| text_at(record, &[key]))
        .find(|name| !name.is_empty())
        .unwrap_or_default();

    InvoiceSummary {
        id: text_at(record, &["id"]),
        number: text_at(record, &["number"]),
        document_name: text_at(record, &["document", "name"]),
        customer_name,
        identification: text_at(record, &["identification"]),
        total: text_at(record, &["total"]),
        status: text_at(record, &["status"]),
        created_at: text_at(record, &["created_at"]),
        payment_form_name: text_at(record, &["payment_form", "name"]),
    }
}

fn map_pagination(raw: &Value) -> Pagination {
    Pagination {
        total: count_at(raw, "total"),
        per_page: count_at(raw, "per_page"),
        current_page: count_at(raw, "current_page"),
        last_page: count_at(raw, "last_page"),
        from: count_at(raw, "from"),
        to: count_at(raw, "to"),
    }
}

/// Scalar at `path` rendered as text; anything absent or non-scalar is "".
fn text_at(value: &Value, path: &[&str]) -> String {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn count_at(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
