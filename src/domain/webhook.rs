use {
    super::error::PipelineError,
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEntity {
    Order,
    Product,
    Customer,
}

impl WebhookEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Product => "product",
            Self::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Create,
    Update,
    Delete,
}

/// Parsed `X-Shopify-Topic`, e.g. `orders/create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTopic {
    pub entity: WebhookEntity,
    pub action: WebhookAction,
    raw: String,
}

impl WebhookTopic {
    pub fn parse(topic: &str) -> Result<Self, PipelineError> {
        let unsupported = || PipelineError::Validation(format!("unsupported webhook topic: {topic}"));
        let (resource, verb) = topic.trim().split_once('/').ok_or_else(unsupported)?;

        let entity = match resource {
            "orders" => WebhookEntity::Order,
            "products" => WebhookEntity::Product,
            "customers" => WebhookEntity::Customer,
            _ => return Err(unsupported()),
        };
        let action = match verb {
            "create" => WebhookAction::Create,
            "update" | "updated" | "paid" | "fulfilled" | "partially_fulfilled" | "edited" => {
                WebhookAction::Update
            }
            "delete" | "cancelled" => WebhookAction::Delete,
            _ => return Err(unsupported()),
        };

        Ok(Self {
            entity,
            action,
            raw: topic.trim().to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for WebhookTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Write-ahead audit row, inserted before any processing happens.
#[derive(Debug, Clone)]
pub struct NewWebhookRecord {
    pub id: Uuid,
    pub topic: String,
    pub shop_domain: String,
    pub webhook_id: Option<String>,
    /// Raw request body, verbatim.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl NewWebhookRecord {
    pub fn new(
        topic: impl Into<String>,
        shop_domain: impl Into<String>,
        webhook_id: Option<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic: topic.into(),
            shop_domain: shop_domain.into(),
            webhook_id,
            payload: payload.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookRecord {
    pub id: Uuid,
    pub topic: String,
    pub shop_domain: String,
    pub webhook_id: Option<String>,
    pub payload: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<NewWebhookRecord> for WebhookRecord {
    fn from(new: NewWebhookRecord) -> Self {
        Self {
            id: new.id,
            topic: new.topic,
            shop_domain: new.shop_domain,
            webhook_id: new.webhook_id,
            payload: new.payload,
            processed: false,
            processed_at: None,
            error_message: None,
            created_at: new.created_at,
        }
    }
}
