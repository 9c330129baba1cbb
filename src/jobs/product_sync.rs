use {
    super::{JobContext, Processor},
    crate::domain::{
        commerce::Product,
        error::{ErrorKind, JobError},
        id::RemoteId,
        job::JobResult,
        provider::{Method, ShopifyApi},
    },
    crate::store::CommerceStore,
    async_trait::async_trait,
    chrono::Utc,
    serde::Deserialize,
    std::sync::Arc,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProductPayload {
    pub product_id: Uuid,
    pub action: SyncAction,
    /// Needed for deletes once the local row is gone.
    #[serde(default)]
    pub shopify_product_id: Option<String>,
}

/// Pushes local product changes to the Shopify Admin API.
pub struct SyncProduct {
    store: Arc<dyn CommerceStore>,
    shopify: Arc<dyn ShopifyApi>,
}

impl SyncProduct {
    pub fn new(store: Arc<dyn CommerceStore>, shopify: Arc<dyn ShopifyApi>) -> Self {
        Self { store, shopify }
    }

    async fn delete(
        &self,
        payload: &SyncProductPayload,
        ctx: &JobContext,
    ) -> Result<JobResult, JobError> {
        let local = self.store.find_product(payload.product_id).await?;
        let remote_id = local
            .as_ref()
            .and_then(|p| p.shopify_product_id.clone())
            .or_else(|| payload.shopify_product_id.clone())
            .ok_or_else(|| {
                JobError::validation(format!(
                    "product {} has no shopify id to delete",
                    payload.product_id
                ))
            })?;
        ctx.progress(25).await;

        let path = format!("/products/{remote_id}.json");
        match self.shopify.request(Method::Delete, &path, None).await {
            Ok(_) => {}
            // Already gone remotely.
            Err(e) if e.kind == ErrorKind::NotFound => {
                tracing::info!(remote_id = %remote_id, "product already deleted in shopify");
            }
            Err(e) => return Err(e.into()),
        }
        ctx.progress(75).await;

        if let Some(mut product) = local {
            product.shopify_product_id = None;
            product.last_synced_at = Some(Utc::now());
            product.updated_at = Utc::now();
            self.store.update_product(&product).await?;
        }
        ctx.progress(100).await;

        Ok(JobResult::ok(
            format!("product {remote_id} deleted in shopify"),
            serde_json::json!({ "productId": payload.product_id, "shopifyProductId": remote_id }),
        ))
    }

    /// Remote product already carrying `handle`, if any.
    async fn find_remote_by_handle(&self, handle: &str) -> Result<Option<String>, JobError> {
        let path = format!("/products.json?handle={handle}&fields=id,handle");
        let response = self.shopify.request(Method::Get, &path, None).await?;
        response["products"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|p| p["handle"].as_str() == Some(handle))
            .map(remote_product_id)
            .transpose()
    }

    /// POST the product, unless an earlier attempt already created it.
    /// The remote id is written back before anything else can fail.
    async fn create(&self, product: &mut Product, ctx: &JobContext) -> Result<String, JobError> {
        let handle = product.sync_handle();
        if handle.is_some() {
            product.handle = handle.clone();
        }

        let adopted = match handle.as_deref() {
            Some(handle) if ctx.attempt > 1 => self.find_remote_by_handle(handle).await?,
            _ => None,
        };
        let remote_id = match adopted {
            Some(remote_id) => {
                tracing::info!(
                    product_id = %product.id,
                    remote_id = %remote_id,
                    attempt = ctx.attempt,
                    "adopted product created by an earlier attempt"
                );
                remote_id
            }
            None => {
                let response = self
                    .shopify
                    .request(Method::Post, "/products.json", Some(product.to_remote_body()))
                    .await?;
                remote_product_id(&response["product"])?
            }
        };

        product.shopify_product_id = Some(remote_id.clone());
        product.updated_at = Utc::now();
        self.store.update_product(product).await?;
        Ok(remote_id)
    }
}

fn remote_product_id(product: &serde_json::Value) -> Result<String, JobError> {
    serde_json::from_value::<RemoteId>(product["id"].clone())
        .map(RemoteId::into_inner)
        .map_err(|e| JobError::unknown(format!("shopify response without product id: {e}")))
}

#[async_trait]
impl Processor for SyncProduct {
    type Payload = SyncProductPayload;

    async fn process(
        &self,
        payload: SyncProductPayload,
        ctx: &JobContext,
    ) -> Result<JobResult, JobError> {
        if payload.action == SyncAction::Delete {
            return self.delete(&payload, ctx).await;
        }

        let mut product = self
            .store
            .find_product(payload.product_id)
            .await?
            .ok_or_else(|| {
                JobError::not_found(format!("product {} not found", payload.product_id))
            })?;
        ctx.progress(25).await;

        let remote_id = match (payload.action, product.shopify_product_id.clone()) {
            (SyncAction::Create, Some(existing)) => {
                return Err(JobError::duplicate(format!(
                    "product {} already exists in shopify as {existing}",
                    product.id
                )));
            }
            (SyncAction::Create, None) => self.create(&mut product, ctx).await?,
            (_, Some(remote_id)) => {
                let path = format!("/products/{remote_id}.json");
                self.shopify
                    .request(Method::Put, &path, Some(product.to_remote_body()))
                    .await?;
                remote_id
            }
            (_, None) => {
                return Err(JobError::validation(format!(
                    "product {} has not been created in shopify yet",
                    product.id
                )));
            }
        };
        ctx.progress(75).await;

        let now = Utc::now();
        product.shopify_product_id = Some(remote_id.clone());
        product.last_synced_at = Some(now);
        product.updated_at = now;
        self.store.update_product(&product).await?;
        ctx.progress(100).await;

        Ok(JobResult::ok(
            format!("product {} synced to shopify", product.title),
            serde_json::json!({ "productId": product.id, "shopifyProductId": remote_id }),
        ))
    }
}
