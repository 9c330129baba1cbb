use {
    super::ReconcileOutcome,
    crate::domain::{
        commerce::{Customer, CustomerFields, RemoteCustomer},
        error::JobError,
        webhook::WebhookAction,
    },
    crate::store::CommerceStore,
};

pub(super) async fn reconcile(
    store: &dyn CommerceStore,
    action: WebhookAction,
    remote: RemoteCustomer,
) -> Result<ReconcileOutcome, JobError> {
    let remote_id = remote.id.as_str();

    if action == WebhookAction::Delete {
        return match store.find_customer_by_remote_id(remote_id).await? {
            Some(existing) => {
                store.delete_customer(existing.id).await?;
                Ok(ReconcileOutcome::Deleted(existing.id))
            }
            None => {
                tracing::info!(remote_id, "delete for unknown customer");
                Ok(ReconcileOutcome::Ignored)
            }
        };
    }

    let fields = CustomerFields::try_from(&remote)?;

    if let Some(mut existing) = store.find_customer_by_remote_id(remote_id).await? {
        if existing.fields() == fields {
            return Ok(ReconcileOutcome::Unchanged(existing.id));
        }
        existing.apply(fields);
        store.update_customer(&existing).await?;
        return Ok(ReconcileOutcome::Updated(existing.id));
    }

    // A customer created locally (or through an order) before Shopify sent
    // its own webhook is adopted by email.
    if let Some(mut existing) = store.find_customer_by_email(&fields.email).await? {
        if let Some(other) = existing.shopify_customer_id.as_deref() {
            return Err(JobError::validation(format!(
                "email {} already linked to shopify customer {other}",
                fields.email
            )));
        }
        existing.shopify_customer_id = Some(remote_id.to_string());
        existing.apply(fields);
        store.update_customer(&existing).await?;
        return Ok(ReconcileOutcome::Updated(existing.id));
    }

    let created = store
        .insert_customer(&Customer::new(Some(remote_id.to_string()), fields))
        .await?;
    Ok(ReconcileOutcome::Created(created.id))
}
