use {
    super::{JobContext, Processor},
    crate::domain::{error::JobError, job::JobResult},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    std::sync::Arc,
    uuid::Uuid,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail transport. Implementations classify their own failures
/// (e.g. connection refused is `network`).
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns the transport's message id.
    async fn send(&self, message: &EmailMessage) -> Result<String, JobError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String, JobError> {
        let message_id = Uuid::now_v7().to_string();
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            message_id = %message_id,
            body_len = message.body.len(),
            "email sent"
        );
        Ok(message_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub template: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Welcome,
    OrderConfirmation,
    PasswordReset,
    Generic,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::OrderConfirmation => "order-confirmation",
            Self::PasswordReset => "password-reset",
            Self::Generic => "generic",
        }
    }
}

impl TryFrom<&str> for Template {
    type Error = JobError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "welcome" => Ok(Self::Welcome),
            "order-confirmation" => Ok(Self::OrderConfirmation),
            "password-reset" => Ok(Self::PasswordReset),
            "generic" => Ok(Self::Generic),
            other => Err(JobError::not_found(format!("unknown email template: {other}"))),
        }
    }
}

pub(crate) fn is_valid_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !address.chars().any(char::is_whitespace)
}

fn text<'a>(data: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(serde_json::Value::as_str)
}

fn required<'a>(data: &'a serde_json::Value, key: &str, template: Template) -> Result<&'a str, JobError> {
    text(data, key).ok_or_else(|| {
        JobError::validation(format!("template {} requires data.{key}", template.as_str()))
    })
}

/// Render subject and body. An explicit `subject` overrides the template's.
pub fn render(payload: &EmailPayload) -> Result<EmailMessage, JobError> {
    let template = Template::try_from(payload.template.as_str())?;
    let data = &payload.data;
    let name = text(data, "name").unwrap_or("there");

    let (subject, body) = match template {
        Template::Welcome => (
            "Welcome!".to_string(),
            format!("Hi {name},\n\nThanks for signing up."),
        ),
        Template::OrderConfirmation => {
            let number = data
                .get("orderNumber")
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .ok_or_else(|| {
                    JobError::validation("template order-confirmation requires data.orderNumber")
                })?;
            let total = text(data, "total").unwrap_or("");
            (
                format!("Order #{number} confirmed"),
                format!("Hi {name},\n\nWe received your order #{number}. {total}")
                    .trim_end()
                    .to_string(),
            )
        }
        Template::PasswordReset => {
            let url = required(data, "resetUrl", template)?;
            (
                "Reset your password".to_string(),
                format!("Hi {name},\n\nUse this link to reset your password: {url}"),
            )
        }
        Template::Generic => {
            let body = text(data, "body")
                .or_else(|| text(data, "message"))
                .unwrap_or_default()
                .to_string();
            let subject = payload
                .subject
                .clone()
                .ok_or_else(|| JobError::validation("generic email requires a subject"))?;
            (subject, body)
        }
    };

    Ok(EmailMessage {
        to: payload.to.trim().to_string(),
        subject: payload.subject.clone().unwrap_or(subject),
        body,
    })
}

pub struct SendEmail {
    mailer: Arc<dyn Mailer>,
}

impl SendEmail {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl Processor for SendEmail {
    type Payload = EmailPayload;

    async fn process(&self, payload: EmailPayload, ctx: &JobContext) -> Result<JobResult, JobError> {
        if !is_valid_email(payload.to.trim()) {
            return Err(JobError::validation(format!(
                "invalid recipient address: {}",
                payload.to
            )));
        }
        ctx.progress(25).await;

        let message = render(&payload)?;
        ctx.progress(50).await;

        let message_id = self.mailer.send(&message).await?;
        ctx.progress(100).await;

        Ok(JobResult::ok(
            format!("email sent to {}", message.to),
            serde_json::json!({
                "messageId": message_id,
                "template": payload.template,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::domain::error::ErrorKind};

    fn payload(template: &str, data: serde_json::Value) -> EmailPayload {
        EmailPayload {
            to: "ada@example.com".into(),
            subject: None,
            template: template.into(),
            data,
        }
    }

    #[test]
    fn address_validation() {
        assert!(is_valid_email("ada@example.com"));
        assert!(!is_valid_email("ada@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ada example@x.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn renders_order_confirmation() {
        let msg = render(&payload(
            "order-confirmation",
            serde_json::json!({"orderNumber": 1001, "name": "Ada"}),
        ))
        .unwrap();
        assert_eq!(msg.subject, "Order #1001 confirmed");
        assert!(msg.body.contains("Hi Ada"));
    }

    #[test]
    fn unknown_template_is_not_found() {
        let err = render(&payload("nope", serde_json::Value::Null)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn password_reset_requires_url() {
        let err = render(&payload("password-reset", serde_json::json!({}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn explicit_subject_wins() {
        let mut p = payload("welcome", serde_json::json!({}));
        p.subject = Some("Hello".into());
        assert_eq!(render(&p).unwrap().subject, "Hello");
    }
}
