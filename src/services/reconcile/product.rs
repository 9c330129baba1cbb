use {
    super::ReconcileOutcome,
    crate::domain::{
        commerce::{Product, ProductFields, RemoteProduct},
        error::JobError,
        webhook::WebhookAction,
    },
    crate::store::CommerceStore,
};

pub(super) async fn reconcile(
    store: &dyn CommerceStore,
    action: WebhookAction,
    remote: RemoteProduct,
) -> Result<ReconcileOutcome, JobError> {
    let remote_id = remote.id.as_str();
    let existing = store.find_product_by_remote_id(remote_id).await?;

    match (action, existing) {
        (WebhookAction::Delete, Some(existing)) => {
            store.delete_product(existing.id).await?;
            Ok(ReconcileOutcome::Deleted(existing.id))
        }
        (WebhookAction::Delete, None) => {
            tracing::info!(remote_id, "delete for unknown product");
            Ok(ReconcileOutcome::Ignored)
        }
        (_, Some(mut existing)) => {
            let fields = ProductFields::try_from(&remote)?;
            if existing.fields() == fields {
                return Ok(ReconcileOutcome::Unchanged(existing.id));
            }
            existing.apply(fields);
            store.update_product(&existing).await?;
            Ok(ReconcileOutcome::Updated(existing.id))
        }
        (_, None) => {
            let fields = ProductFields::try_from(&remote)?;
            // Echo of a product pushed from here whose id was never recorded.
            if let Some(mut local) = store
                .find_unlinked_product(fields.handle.as_deref(), fields.sku.as_deref())
                .await?
            {
                tracing::info!(remote_id, product_id = %local.id, "linked unsynced local product");
                local.shopify_product_id = Some(remote_id.to_string());
                local.last_synced_at = Some(chrono::Utc::now());
                local.apply(fields);
                store.update_product(&local).await?;
                return Ok(ReconcileOutcome::Updated(local.id));
            }
            let created = store
                .insert_product(&Product::new(Some(remote_id.to_string()), fields))
                .await?;
            Ok(ReconcileOutcome::Created(created.id))
        }
    }
}
