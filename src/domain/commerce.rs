use {
    super::error::PipelineError,
    super::id::{RemoteId, string_or_number},
    super::money::MoneyAmount,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

// ── Remote payloads (Shopify webhook bodies) ───────────────────────────────
// Delete webhooks only carry `id`, so everything else is optional.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCustomer {
    pub id: RemoteId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub accepts_marketing: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVariant {
    #[serde(default)]
    pub id: Option<RemoteId>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub price: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub inventory_quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub id: RemoteId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub variants: Vec<RemoteVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteLineItem {
    pub id: RemoteId,
    #[serde(default)]
    pub product_id: Option<RemoteId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub price: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub id: RemoteId,
    #[serde(default, deserialize_with = "string_or_number")]
    pub order_number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub total_price: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub financial_status: Option<String>,
    #[serde(default)]
    pub fulfillment_status: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<String>,
    #[serde(default)]
    pub customer: Option<RemoteCustomer>,
    #[serde(default)]
    pub line_items: Vec<RemoteLineItem>,
}

fn parse_money(raw: Option<&str>) -> Result<MoneyAmount, PipelineError> {
    match raw {
        Some(s) => MoneyAmount::parse_decimal(s),
        None => Ok(MoneyAmount::ZERO),
    }
}

/// Shopify-style handle: lowercase ASCII alphanumerics, runs of anything else
/// collapsed to one dash.
pub fn handleize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_ascii_lowercase();
    (!email.is_empty()).then_some(email)
}

// ── Customer ───────────────────────────────────────────────────────────────

/// Columns owned by Shopify. Used to detect duplicate deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerFields {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub accepts_marketing: bool,
}

impl TryFrom<&RemoteCustomer> for CustomerFields {
    type Error = PipelineError;

    fn try_from(remote: &RemoteCustomer) -> Result<Self, Self::Error> {
        let email = remote
            .email
            .as_deref()
            .and_then(normalize_email)
            .ok_or_else(|| {
                PipelineError::Validation(format!("customer {} has no email", remote.id))
            })?;
        Ok(Self {
            email,
            first_name: remote.first_name.clone(),
            last_name: remote.last_name.clone(),
            phone: remote.phone.clone(),
            accepts_marketing: remote.accepts_marketing.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub id: Uuid,
    pub shopify_customer_id: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub accepts_marketing: bool,
    /// Local-only, never overwritten by reconciliation.
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(shopify_customer_id: Option<String>, fields: CustomerFields) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            shopify_customer_id,
            email: fields.email,
            first_name: fields.first_name,
            last_name: fields.last_name,
            phone: fields.phone,
            accepts_marketing: fields.accepts_marketing,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn fields(&self) -> CustomerFields {
        CustomerFields {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            accepts_marketing: self.accepts_marketing,
        }
    }

    pub fn apply(&mut self, fields: CustomerFields) {
        self.email = fields.email;
        self.first_name = fields.first_name;
        self.last_name = fields.last_name;
        self.phone = fields.phone;
        self.accepts_marketing = fields.accepts_marketing;
        self.updated_at = Utc::now();
    }
}

// ── Product ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductFields {
    pub title: String,
    pub body_html: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub handle: Option<String>,
    pub status: String,
    pub tags: Option<String>,
    pub price: MoneyAmount,
    pub sku: Option<String>,
    pub inventory_quantity: i64,
}

impl TryFrom<&RemoteProduct> for ProductFields {
    type Error = PipelineError;

    fn try_from(remote: &RemoteProduct) -> Result<Self, Self::Error> {
        let title = remote
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PipelineError::Validation(format!("product {} has no title", remote.id))
            })?;
        // The first variant carries price/sku for single-variant products.
        let variant = remote.variants.first();
        Ok(Self {
            title: title.to_string(),
            body_html: remote.body_html.clone(),
            vendor: remote.vendor.clone(),
            product_type: remote.product_type.clone(),
            handle: remote.handle.clone(),
            status: remote.status.clone().unwrap_or_else(|| "active".to_string()),
            tags: remote.tags.clone(),
            price: parse_money(variant.and_then(|v| v.price.as_deref()))?,
            sku: variant.and_then(|v| v.sku.clone()),
            inventory_quantity: variant.and_then(|v| v.inventory_quantity).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub shopify_product_id: Option<String>,
    pub title: String,
    pub body_html: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub handle: Option<String>,
    pub status: String,
    pub tags: Option<String>,
    pub price: MoneyAmount,
    pub sku: Option<String>,
    pub inventory_quantity: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(shopify_product_id: Option<String>, fields: ProductFields) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            shopify_product_id,
            title: fields.title,
            body_html: fields.body_html,
            vendor: fields.vendor,
            product_type: fields.product_type,
            handle: fields.handle,
            status: fields.status,
            tags: fields.tags,
            price: fields.price,
            sku: fields.sku,
            inventory_quantity: fields.inventory_quantity,
            last_synced_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn fields(&self) -> ProductFields {
        ProductFields {
            title: self.title.clone(),
            body_html: self.body_html.clone(),
            vendor: self.vendor.clone(),
            product_type: self.product_type.clone(),
            handle: self.handle.clone(),
            status: self.status.clone(),
            tags: self.tags.clone(),
            price: self.price,
            sku: self.sku.clone(),
            inventory_quantity: self.inventory_quantity,
        }
    }

    pub fn apply(&mut self, fields: ProductFields) {
        self.title = fields.title;
        self.body_html = fields.body_html;
        self.vendor = fields.vendor;
        self.product_type = fields.product_type;
        self.handle = fields.handle;
        self.status = fields.status;
        self.tags = fields.tags;
        self.price = fields.price;
        self.sku = fields.sku;
        self.inventory_quantity = fields.inventory_quantity;
        self.updated_at = Utc::now();
    }

    /// Handle this product is pushed under: the stored one, else one derived
    /// from the title. `None` when neither yields any alphanumerics.
    pub fn sync_handle(&self) -> Option<String> {
        let handle = handleize(self.handle.as_deref().unwrap_or(&self.title));
        (!handle.is_empty()).then_some(handle)
    }

    /// Body for the Shopify Admin `products` endpoints.
    pub fn to_remote_body(&self) -> serde_json::Value {
        serde_json::json!({
            "product": {
                "title": self.title,
                "body_html": self.body_html,
                "vendor": self.vendor,
                "product_type": self.product_type,
                "handle": self.handle,
                "status": self.status,
                "tags": self.tags,
                "variants": [{
                    "price": self.price.to_string(),
                    "sku": self.sku,
                    "inventory_quantity": self.inventory_quantity,
                }],
            }
        })
    }
}

// ── Order ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "open" => Ok(Self::Open),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PipelineError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFields {
    pub order_number: String,
    pub email: Option<String>,
    pub total_price: MoneyAmount,
    pub currency: String,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub cancelled: bool,
}

impl TryFrom<&RemoteOrder> for OrderFields {
    type Error = PipelineError;

    fn try_from(remote: &RemoteOrder) -> Result<Self, Self::Error> {
        let order_number = remote
            .order_number
            .clone()
            .or_else(|| remote.name.as_ref().map(|n| n.trim_start_matches('#').to_string()))
            .ok_or_else(|| {
                PipelineError::Validation(format!("order {} has no order_number", remote.id))
            })?;
        Ok(Self {
            order_number,
            email: remote.email.as_deref().and_then(normalize_email),
            total_price: parse_money(remote.total_price.as_deref())?,
            currency: remote
                .currency
                .as_deref()
                .unwrap_or("USD")
                .to_ascii_uppercase(),
            financial_status: remote.financial_status.clone(),
            fulfillment_status: remote.fulfillment_status.clone(),
            cancelled: remote.cancelled_at.is_some(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub shopify_order_id: String,
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    pub email: Option<String>,
    pub total_price: MoneyAmount,
    pub currency: String,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub status: OrderStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Local-only: set by the order-processing job.
    pub processed: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(shopify_order_id: String, fields: OrderFields) -> Self {
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::now_v7(),
            shopify_order_id,
            order_number: String::new(),
            customer_id: None,
            email: None,
            total_price: MoneyAmount::ZERO,
            currency: String::new(),
            financial_status: None,
            fulfillment_status: None,
            status: OrderStatus::Open,
            cancelled_at: None,
            processed: false,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        order.apply(fields);
        order
    }

    pub fn fields(&self) -> OrderFields {
        OrderFields {
            order_number: self.order_number.clone(),
            email: self.email.clone(),
            total_price: self.total_price,
            currency: self.currency.clone(),
            financial_status: self.financial_status.clone(),
            fulfillment_status: self.fulfillment_status.clone(),
            cancelled: self.status == OrderStatus::Cancelled,
        }
    }

    /// Merge remote fields. Cancellation is one-way: a remote update never
    /// reopens a cancelled order.
    pub fn apply(&mut self, fields: OrderFields) {
        self.order_number = fields.order_number;
        self.email = fields.email;
        self.total_price = fields.total_price;
        self.currency = fields.currency;
        self.financial_status = fields.financial_status;
        self.fulfillment_status = fields.fulfillment_status;
        if fields.cancelled {
            self.cancel();
        }
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) {
        if self.status != OrderStatus::Cancelled {
            self.status = OrderStatus::Cancelled;
            self.cancelled_at = Some(Utc::now());
            self.updated_at = Utc::now();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub shopify_line_item_id: String,
    pub product_id: Option<Uuid>,
    pub title: String,
    pub quantity: i64,
    pub price: MoneyAmount,
    pub sku: Option<String>,
}

impl OrderItem {
    pub fn from_remote(
        order_id: Uuid,
        product_id: Option<Uuid>,
        remote: &RemoteLineItem,
    ) -> Result<Self, PipelineError> {
        let quantity = remote.quantity.unwrap_or(1);
        if quantity < 0 {
            return Err(PipelineError::Validation(format!(
                "line item {} has negative quantity",
                remote.id
            )));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            order_id,
            shopify_line_item_id: remote.id.as_str().to_string(),
            product_id,
            title: remote.title.clone().unwrap_or_default(),
            quantity,
            price: parse_money(remote.price.as_deref())?,
            sku: remote.sku.clone(),
        })
    }

    pub fn line_total(&self) -> Option<MoneyAmount> {
        self.price.checked_mul(self.quantity)
    }
}
