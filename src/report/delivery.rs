use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::report::schema::ValidReport;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub image: Option<String>,
    #[serde(flatten)]
    pub report: ValidReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub reference: Uuid,
    pub recipients: Vec<&'static str>,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("Report delivery failed: {0}")]
pub struct DeliveryError(pub String);

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, submission: &Submission) -> Result<DeliveryReceipt, DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct SimulatedDelivery {
    delay: Duration,
}

impl SimulatedDelivery {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ReportSink for SimulatedDelivery {
    async fn deliver(&self, submission: &Submission) -> Result<DeliveryReceipt, DeliveryError> {
        let payload = serde_json::to_string(submission)
            .map_err(|err| DeliveryError(format!("could not encode report: {err}")))?;
        info!(target: "citylens.submission", payload = %payload, "Submitting report");

        tokio::time::sleep(self.delay).await;

        Ok(DeliveryReceipt {
            reference: Uuid::new_v4(),
            recipients: submission.report.recipients(),
            delivered_at: Utc::now(),
        })
    }
}
