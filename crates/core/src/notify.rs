//! Outbound notifications.
//!
//! Delivery is best-effort: a failed send is logged and reported, but never undoes an outcome
//! that has already been accepted.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct DeliveryReceipt {
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

pub trait Notifier: Send + Sync {
    fn send(&self, to_email: &str, subject: &str, body: &str) -> Result<DeliveryReceipt, NotifyError>;
}

/// Notifier that writes messages to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct TracingNotifier {
    sent: AtomicU64,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for TracingNotifier {
    fn send(&self, to_email: &str, subject: &str, body: &str) -> Result<DeliveryReceipt, NotifyError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(to = to_email, subject, body_len = body.len(), "notification logged");
        Ok(DeliveryReceipt {
            id: format!("log-{n}"),
        })
    }
}

/// Builds `<base>/?k1=v1&k2=v2` links with percent-encoded keys and values, preserving the order
/// parameters were added in.
#[derive(Clone, Debug)]
pub struct LinkBuilder {
    base_url: String,
    parameters: Vec<(String, String)>,
}

impl LinkBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.parameters.push((name.to_string(), value.to_string()));
        self
    }

    pub fn param_opt(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    pub fn build(&self) -> String {
        let mut url = self.base_url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        if self.parameters.is_empty() {
            return url;
        }

        let query = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{url}?{query}")
    }
}
