use {
    super::ReconcileOutcome,
    crate::domain::{
        commerce::{
            Customer, CustomerFields, Order, OrderFields, OrderItem, OrderStatus, RemoteCustomer,
            RemoteOrder,
        },
        error::JobError,
        webhook::WebhookAction,
    },
    crate::store::CommerceStore,
    uuid::Uuid,
};

pub(super) async fn reconcile(
    store: &dyn CommerceStore,
    action: WebhookAction,
    remote: RemoteOrder,
) -> Result<ReconcileOutcome, JobError> {
    let remote_id = remote.id.as_str();

    // Shopify orders are cancelled, never removed.
    if action == WebhookAction::Delete {
        return match store.find_order_by_remote_id(remote_id).await? {
            Some(existing) if existing.status == OrderStatus::Cancelled => {
                Ok(ReconcileOutcome::Unchanged(existing.id))
            }
            Some(mut existing) => {
                existing.cancel();
                store.update_order(&existing).await?;
                Ok(ReconcileOutcome::Cancelled(existing.id))
            }
            None => {
                tracing::info!(remote_id, "cancel for unknown order");
                Ok(ReconcileOutcome::Ignored)
            }
        };
    }

    let mut fields = OrderFields::try_from(&remote)?;

    let outcome = match store.find_order_by_remote_id(remote_id).await? {
        Some(mut existing) => {
            fields.cancelled |= existing.status == OrderStatus::Cancelled;
            let link = match existing.customer_id {
                Some(_) => None,
                None => link_customer(store, &remote).await,
            };

            if existing.fields() == fields && link.is_none() {
                ReconcileOutcome::Unchanged(existing.id)
            } else {
                existing.apply(fields);
                if link.is_some() {
                    existing.customer_id = link;
                }
                store.update_order(&existing).await?;
                ReconcileOutcome::Updated(existing.id)
            }
        }
        None => {
            let mut order = Order::new(remote_id.to_string(), fields);
            order.customer_id = link_customer(store, &remote).await;
            let stored = store.insert_order(&order).await?;
            ReconcileOutcome::Created(stored.id)
        }
    };

    // Synced on every delivery so a partially applied order completes on retry.
    if let Some(order_id) = outcome.entity_id() {
        sync_line_items(store, order_id, &remote).await?;
    }

    Ok(outcome)
}

async fn sync_line_items(
    store: &dyn CommerceStore,
    order_id: Uuid,
    remote: &RemoteOrder,
) -> Result<(), JobError> {
    for line in &remote.line_items {
        let product_id = match &line.product_id {
            Some(pid) => store
                .find_product_by_remote_id(pid.as_str())
                .await?
                .map(|p| p.id),
            None => None,
        };
        let item = OrderItem::from_remote(order_id, product_id, line)?;
        store.upsert_order_item(&item).await?;
    }

    // Lines removed by an order edit.
    let keep: Vec<String> = remote
        .line_items
        .iter()
        .map(|line| line.id.as_str().to_string())
        .collect();
    let pruned = store.delete_order_items_except(order_id, &keep).await?;
    if pruned > 0 {
        tracing::info!(order_id = %order_id, pruned, "stale line items removed");
    }
    Ok(())
}

/// Resolve the order's customer by Shopify id, then email, then by creating
/// one. Every step is tried in turn; failures leave the order unlinked.
async fn link_customer(store: &dyn CommerceStore, remote: &RemoteOrder) -> Option<Uuid> {
    let order_id = remote.id.as_str();
    let remote_customer = remote.customer.as_ref();

    if let Some(customer) = remote_customer {
        match store.find_customer_by_remote_id(customer.id.as_str()).await {
            Ok(Some(found)) => return Some(found.id),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(order_id, error = %e, "customer lookup by remote id failed")
            }
        }
    }

    let email = remote_customer
        .and_then(|c| c.email.as_deref())
        .or(remote.email.as_deref())
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty());

    if let Some(email) = email.as_deref() {
        match store.find_customer_by_email(email).await {
            Ok(Some(found)) => return Some(found.id),
            Ok(None) => {}
            Err(e) => tracing::warn!(order_id, error = %e, "customer lookup by email failed"),
        }
    }

    let Some(fields) = customer_fields(remote_customer, email) else {
        tracing::info!(order_id, "order has no customer details, left unlinked");
        return None;
    };
    let remote_customer_id = remote_customer.map(|c| c.id.as_str().to_string());
    match store
        .insert_customer(&Customer::new(remote_customer_id, fields))
        .await
    {
        Ok(created) => Some(created.id),
        Err(e) => {
            tracing::warn!(order_id, error = %e, "customer create failed, order left unlinked");
            None
        }
    }
}

fn customer_fields(remote: Option<&RemoteCustomer>, email: Option<String>) -> Option<CustomerFields> {
    let email = email?;
    Some(match remote {
        Some(c) => CustomerFields {
            email,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            phone: c.phone.clone(),
            accepts_marketing: c.accepts_marketing.unwrap_or(false),
        },
        None => CustomerFields {
            email,
            first_name: None,
            last_name: None,
            phone: None,
            accepts_marketing: false,
        },
    })
}
