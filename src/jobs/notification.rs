use {
    super::{
        JobContext, Processor,
        email::{EmailMessage, Mailer, is_valid_email},
    },
    crate::domain::{error::JobError, job::JobResult},
    async_trait::async_trait,
    serde::Deserialize,
    std::sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPayload {
    pub channel: String,
    pub recipient: String,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub struct SendNotification {
    mailer: Arc<dyn Mailer>,
}

impl SendNotification {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl Processor for SendNotification {
    type Payload = NotificationPayload;

    async fn process(
        &self,
        payload: NotificationPayload,
        ctx: &JobContext,
    ) -> Result<JobResult, JobError> {
        let channel = match payload.channel.as_str() {
            "email" => Channel::Email,
            "log" => Channel::Log,
            other => {
                return Err(JobError::validation(format!(
                    "unsupported notification channel: {other}"
                )));
            }
        };
        let recipient = payload.recipient.trim();
        if recipient.is_empty() {
            return Err(JobError::validation("notification recipient is empty"));
        }
        ctx.progress(25).await;

        let delivery_id = match channel {
            Channel::Email => {
                if !is_valid_email(recipient) {
                    return Err(JobError::validation(format!(
                        "invalid recipient address: {recipient}"
                    )));
                }
                let subject = payload
                    .data
                    .get("subject")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("Notification")
                    .to_string();
                let message = EmailMessage {
                    to: recipient.to_string(),
                    subject,
                    body: payload.message.clone(),
                };
                Some(self.mailer.send(&message).await?)
            }
            Channel::Log => {
                tracing::info!(recipient, message = %payload.message, "notification");
                None
            }
        };
        ctx.progress(100).await;

        Ok(JobResult::ok(
            format!("notification sent via {}", payload.channel),
            serde_json::json!({ "recipient": recipient, "deliveryId": delivery_id }),
        ))
    }
}
