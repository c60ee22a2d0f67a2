//! Customer support capabilities: knowledge base search, ticket creation
//! and order status lookup.

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use domchat_core::capability::{Capability, CapabilityRegistry, decode_arguments};
use domchat_core::partition::{Row, ScopedStore};
use domchat_types::capability::CapabilitySpec;
use domchat_types::error::CapabilityError;

use super::{execution_error, spec};

pub const CUSTOMER_SUPPORT: &str = "customer_support";

/// Attempts at finding a free ticket id before giving up.
const TICKET_ID_ATTEMPTS: usize = 5;

pub(super) fn register(registry: &mut CapabilityRegistry) {
    registry
        .register(CUSTOMER_SUPPORT, SearchKnowledgeBase::new())
        .register(CUSTOMER_SUPPORT, CreateTicket::new())
        .register(CUSTOMER_SUPPORT, CheckOrderStatus::new());
}

/// Parse a column holding JSON text, falling back to the raw value.
fn json_column(row: &Row, column: &str) -> Value {
    match row.get(column) {
        Some(Value::String(text)) => serde_json::from_str(text).unwrap_or_else(|_| json!(text)),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// search_knowledge_base
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

pub struct SearchKnowledgeBase {
    spec: CapabilitySpec,
}

impl SearchKnowledgeBase {
    pub const NAME: &'static str = "search_knowledge_base";

    pub fn new() -> Self {
        Self {
            spec: spec(
                Self::NAME,
                "Search the internal knowledge base for articles relevant to the customer's question.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search query, e.g. 'shipping delay', 'return policy', 'login problem'"
                        }
                    },
                    "required": ["query"]
                }),
            ),
        }
    }
}

impl Default for SearchKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl Capability for SearchKnowledgeBase {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        let args: SearchArgs = decode_arguments(Self::NAME, arguments)?;

        // First article whose keyword appears in the query.
        let rows = store
            .fetch_all(
                "SELECT keyword, title, content, related_articles \
                 FROM {knowledge_articles} \
                 WHERE instr(lower(?1), lower(keyword)) > 0 \
                 ORDER BY rowid \
                 LIMIT 1",
                &[json!(args.query)],
            )
            .await?;

        tracing::info!(capability = Self::NAME, hits = rows.len(), "knowledge base searched");
        Ok(match rows.first() {
            Some(row) => json!({
                "found": true,
                "article": {
                    "title": row.get("title").cloned().unwrap_or(Value::Null),
                    "content": row.get("content").cloned().unwrap_or(Value::Null),
                    "related_articles": json_column(row, "related_articles"),
                },
                "confidence": 0.9,
            }),
            None => json!({
                "found": false,
                "message": "No matching article was found. Could you tell me more about the issue?",
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// create_ticket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TicketCategory {
    #[default]
    General,
    Technical,
    Billing,
    Shipping,
}

impl TicketCategory {
    fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Technical => "technical",
            Self::Billing => "billing",
            Self::Shipping => "shipping",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTicketArgs {
    subject: String,
    description: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    category: TicketCategory,
}

pub struct CreateTicket {
    spec: CapabilitySpec,
}

impl CreateTicket {
    pub const NAME: &'static str = "create_ticket";

    pub fn new() -> Self {
        Self {
            spec: spec(
                Self::NAME,
                "Create a support ticket. Use this when the issue needs a human specialist.",
                json!({
                    "type": "object",
                    "properties": {
                        "subject": { "type": "string", "description": "Ticket subject" },
                        "description": { "type": "string", "description": "Detailed description of the problem" },
                        "priority": {
                            "type": "string",
                            "enum": ["low", "normal", "high", "urgent"],
                            "description": "Priority"
                        },
                        "category": {
                            "type": "string",
                            "enum": ["general", "technical", "billing", "shipping"],
                            "description": "Category"
                        }
                    },
                    "required": ["subject", "description"]
                }),
            ),
        }
    }
}

impl Default for CreateTicket {
    fn default() -> Self {
        Self::new()
    }
}

/// `TKT-` followed by five digits in 10000..=99999.
fn ticket_id() -> String {
    let n = Uuid::new_v4().as_u128() % 90_000 + 10_000;
    format!("TKT-{n}")
}

impl Capability for CreateTicket {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        let args: CreateTicketArgs = decode_arguments(Self::NAME, arguments)?;
        if args.subject.trim().is_empty() {
            return Err(execution_error(Self::NAME, "subject must not be empty"));
        }

        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        for _ in 0..TICKET_ID_ATTEMPTS {
            let id = ticket_id();
            // OR IGNORE: a taken id inserts nothing and we draw again.
            let inserted = store
                .execute(
                    "INSERT OR IGNORE INTO {support_tickets} \
                     (ticket_id, subject, description, priority, category, status, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6)",
                    &[
                        json!(id),
                        json!(args.subject),
                        json!(args.description),
                        json!(args.priority.as_str()),
                        json!(args.category.as_str()),
                        json!(created_at),
                    ],
                )
                .await?;
            if inserted == 1 {
                tracing::info!(
                    capability = Self::NAME,
                    ticket_id = %id,
                    priority = args.priority.as_str(),
                    "support ticket created"
                );
                return Ok(json!({
                    "success": true,
                    "ticket_id": id,
                    "subject": args.subject,
                    "priority": args.priority.as_str(),
                    "category": args.category.as_str(),
                    "status": "open",
                    "estimated_response_time": "within 24 hours",
                    "message": format!("Ticket {id} has been created. A specialist will contact you once it has been reviewed."),
                }));
            }
        }
        Err(execution_error(Self::NAME, "could not allocate a ticket id"))
    }
}

// ---------------------------------------------------------------------------
// check_order_status
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OrderArgs {
    order_id: String,
}

pub struct CheckOrderStatus {
    spec: CapabilitySpec,
}

impl CheckOrderStatus {
    pub const NAME: &'static str = "check_order_status";

    pub fn new() -> Self {
        Self {
            spec: spec(
                Self::NAME,
                "Look up the delivery status of an order by its order number.",
                json!({
                    "type": "object",
                    "properties": {
                        "order_id": { "type": "string", "description": "Order number, e.g. '12345'" }
                    },
                    "required": ["order_id"]
                }),
            ),
        }
    }
}

impl Default for CheckOrderStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl Capability for CheckOrderStatus {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        let args: OrderArgs = decode_arguments(Self::NAME, arguments)?;
        let order_id = args.order_id.trim();

        let rows = store
            .fetch_all(
                "SELECT order_id, status, tracking_number, estimated_delivery, items, shipping_address \
                 FROM {orders} WHERE order_id = ?1",
                &[json!(order_id)],
            )
            .await?;

        let Some(row) = rows.into_iter().next() else {
            tracing::info!(capability = Self::NAME, order_id, "order not found");
            return Ok(json!({
                "found": false,
                "message": format!("Order {order_id} was not found. Please check the number and try again."),
            }));
        };

        let items = json_column(&row, "items");
        let mut order = row;
        order.insert("items".to_string(), items);
        Ok(json!({ "found": true, "order": order }))
    }
}

#[cfg(test)]
mod tests {
    use domchat_core::partition::PartitionAccess;

    use super::*;
    use crate::capability::test_support::partition_access;

    #[tokio::test]
    async fn test_search_matches_keyword_case_insensitively() {
        let (access, _dir) = partition_access().await;
        let mut store = access.open(CUSTOMER_SUPPORT).await.unwrap();

        let result = SearchKnowledgeBase::new()
            .invoke(json!({"query": "My Shipping is late"}), store.as_mut())
            .await
            .unwrap();
        assert_eq!(result["found"], json!(true));
        assert_eq!(result["article"]["title"], json!("Shipping FAQ"));
        assert_eq!(
            result["article"]["related_articles"],
            json!(["Shipping fees", "Changing the delivery address"])
        );
        assert_eq!(result["confidence"], json!(0.9));
    }

    #[tokio::test]
    async fn test_search_without_match() {
        let (access, _dir) = partition_access().await;
        let mut store = access.open(CUSTOMER_SUPPORT).await.unwrap();

        let result = SearchKnowledgeBase::new()
            .invoke(json!({"query": "gift wrapping"}), store.as_mut())
            .await
            .unwrap();
        assert_eq!(result["found"], json!(false));
        assert!(result["message"].as_str().unwrap().contains("No matching article"));
    }

    #[tokio::test]
    async fn test_create_ticket_persists_with_defaults() {
        let (access, _dir) = partition_access().await;
        let mut store = access.open(CUSTOMER_SUPPORT).await.unwrap();

        let result = CreateTicket::new()
            .invoke(
                json!({"subject": "Broken zip", "description": "The zip broke on day one"}),
                store.as_mut(),
            )
            .await
            .unwrap();

        let id = result["ticket_id"].as_str().unwrap().to_string();
        assert!(id.starts_with("TKT-"));
        let digits: u32 = id["TKT-".len()..].parse().unwrap();
        assert!((10_000..=99_999).contains(&digits));
        assert_eq!(result["priority"], json!("normal"));
        assert_eq!(result["category"], json!("general"));
        assert_eq!(result["status"], json!("open"));

        let rows = store
            .fetch_all(
                "SELECT subject, priority, category, status FROM {support_tickets} WHERE ticket_id = ?1",
                &[json!(id)],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["subject"], json!("Broken zip"));
        assert_eq!(rows[0]["status"], json!("open"));
    }

    #[tokio::test]
    async fn test_create_ticket_rejects_unknown_priority() {
        let (access, _dir) = partition_access().await;
        let mut store = access.open(CUSTOMER_SUPPORT).await.unwrap();

        let err = CreateTicket::new()
            .invoke(
                json!({"subject": "s", "description": "d", "priority": "critical"}),
                store.as_mut(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_order_status_found_parses_items() {
        let (access, _dir) = partition_access().await;
        let mut store = access.open(CUSTOMER_SUPPORT).await.unwrap();

        let result = CheckOrderStatus::new()
            .invoke(json!({"order_id": "12345"}), store.as_mut())
            .await
            .unwrap();
        assert_eq!(result["found"], json!(true));
        assert_eq!(result["order"]["status"], json!("in transit"));
        assert_eq!(result["order"]["items"][0]["quantity"], json!(2));

        let result = CheckOrderStatus::new()
            .invoke(json!({"order_id": "67890"}), store.as_mut())
            .await
            .unwrap();
        assert_eq!(result["order"]["tracking_number"], Value::Null);
    }

    #[tokio::test]
    async fn test_order_status_missing() {
        let (access, _dir) = partition_access().await;
        let mut store = access.open(CUSTOMER_SUPPORT).await.unwrap();

        let result = CheckOrderStatus::new()
            .invoke(json!({"order_id": "00000"}), store.as_mut())
            .await
            .unwrap();
        assert_eq!(result["found"], json!(false));
        assert!(result["message"].as_str().unwrap().contains("00000"));
    }
}
