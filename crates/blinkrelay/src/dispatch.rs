//! Intent dispatch.
//!
//! Selections and emergencies resolved by the interpreter are turned into
//! JSON payloads and POSTed to a downstream automation webhook. Every intent,
//! dispatchable or not, is also surfaced to dashboards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{Config, ProfileConfig};
use crate::error::{Error, Result};
use crate::gateway::{DispatchFailure, PresenceGateway};
use crate::interpreter::{Intent, InterpretedIntent, OptionKind};

/// Message sent for an emergency.
pub const EMERGENCY_MESSAGE: &str = "EMERGENCY";

/// Patient identity attached to every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientContext {
    /// Display name.
    pub name: String,
}

/// Medical contact data attached to emergencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalContext {
    /// Hospital patient identifier.
    pub patient_id: String,
    /// Name of the patient's hospital.
    pub hospital_name: String,
    /// Address of the patient's hospital.
    pub hospital_address: String,
    /// Phone number of the patient's hospital.
    pub hospital_phone: String,
}

/// An everyday need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedRequest {
    /// Human-readable request.
    pub message: String,
    /// Selected menu label.
    pub item: String,
    /// Same as `item`, kept for workflows keyed on it.
    pub request: String,
    /// Device that made the selection.
    pub device_id: String,
    /// When the intent was resolved.
    pub timestamp: DateTime<Utc>,
    /// Local, human-readable rendering of `timestamp`.
    pub date: String,
    /// Who is asking.
    pub patient: PatientContext,
}

/// An emergency or help request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    /// `EMERGENCY`, or the label of the selected alert option.
    pub message: String,
    /// Device that raised the alert.
    pub device_id: String,
    /// When the intent was resolved.
    pub timestamp: DateTime<Utc>,
    /// Local, human-readable rendering of `timestamp`.
    pub date: String,
    /// Who is asking.
    pub patient: PatientContext,
    /// Where to send help.
    pub medical: MedicalContext,
}

/// Body POSTed to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DispatchPayload {
    /// Select of a need option.
    Need(NeedRequest),
    /// Emergency, or select of an alert option.
    Emergency(EmergencyAlert),
}

impl DispatchPayload {
    /// Build the payload for an intent, or `None` if the intent is not
    /// forwarded downstream.
    #[must_use]
    pub fn for_intent(intent: &InterpretedIntent, profile: &ProfileConfig) -> Option<Self> {
        let patient = PatientContext {
            name: profile.name.clone(),
        };
        let date = local_date(intent.at);

        let alert = |message: String| {
            Self::Emergency(EmergencyAlert {
                message,
                device_id: intent.device_id.clone(),
                timestamp: intent.at,
                date: date.clone(),
                patient: patient.clone(),
                medical: MedicalContext {
                    patient_id: profile.patient_id.clone(),
                    hospital_name: profile.hospital_name.clone(),
                    hospital_address: profile.hospital_address.clone(),
                    hospital_phone: profile.hospital_phone.clone(),
                },
            })
        };

        match (intent.intent, &intent.option) {
            (Intent::Navigate { .. }, _) | (Intent::Select { .. }, None) => None,
            (Intent::Emergency, _) => Some(alert(EMERGENCY_MESSAGE.to_string())),
            (Intent::Select { .. }, Some(option)) => match option.kind {
                OptionKind::Alert => Some(alert(option.label.clone())),
                OptionKind::Need => Some(Self::Need(NeedRequest {
                    message: format!("I need {}", option.label),
                    item: option.label.clone(),
                    request: option.label.clone(),
                    device_id: intent.device_id.clone(),
                    timestamp: intent.at,
                    date: date.clone(),
                    patient: patient.clone(),
                })),
            },
        }
    }

    /// Payload kind as it appears in the `type` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Need(_) => "need",
            Self::Emergency(_) => "emergency",
        }
    }
}

fn local_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%-m/%-d/%Y, %-I:%M:%S %p")
        .to_string()
}

/// Downstream delivery.
#[async_trait]
pub trait IntentDispatcher: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// POST an arbitrary JSON body downstream and return the response body.
    async fn forward(&self, body: &Value) -> Result<Value>;

    /// Deliver an intent payload.
    async fn dispatch(&self, payload: &DispatchPayload) -> Result<Value> {
        let body = serde_json::to_value(payload)?;
        self.forward(&body).await
    }
}

/// Build the dispatcher described by the configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn from_config(config: &Config) -> Result<Arc<dyn IntentDispatcher>> {
    match config.dispatch.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Arc::new(WebhookDispatcher::new(
            url,
            config.dispatch_timeout(),
        )?)),
        _ => {
            warn!("No webhook configured, intents will not be delivered downstream");
            Ok(Arc::new(DisabledDispatcher))
        }
    }
}

/// POSTs JSON to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    /// Create a dispatcher for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IntentDispatcher for WebhookDispatcher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn forward(&self, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::downstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::downstream(format!("webhook returned {status}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::downstream(e.to_string()))?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Stand-in used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledDispatcher;

#[async_trait]
impl IntentDispatcher for DisabledDispatcher {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn forward(&self, _body: &Value) -> Result<Value> {
        Err(Error::DispatchNotConfigured)
    }
}

/// Consumes interpreted intents, publishes them, and delivers the
/// dispatchable ones.
#[derive(Debug, Clone)]
pub struct DispatchLoop {
    gateway: Arc<PresenceGateway>,
    dispatcher: Arc<dyn IntentDispatcher>,
    profile: ProfileConfig,
}

impl DispatchLoop {
    /// Create a dispatch loop.
    #[must_use]
    pub fn new(
        gateway: Arc<PresenceGateway>,
        dispatcher: Arc<dyn IntentDispatcher>,
        profile: ProfileConfig,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            profile,
        }
    }

    /// Run until the intent queue closes.
    ///
    /// Deliveries run in their own tasks so a slow webhook never holds up
    /// the queue.
    pub async fn run(self, mut intents: mpsc::Receiver<InterpretedIntent>) {
        info!(dispatcher = self.dispatcher.name(), "Dispatch loop started");
        while let Some(intent) = intents.recv().await {
            self.gateway.publish_intent(&intent);
            if !intent.intent.is_dispatchable() {
                continue;
            }
            let this = self.clone();
            tokio::spawn(async move {
                // failures are already logged and published
                let _ = this.deliver(&intent).await;
            });
        }
        info!("Dispatch loop stopped");
    }

    /// Deliver one intent downstream.
    ///
    /// Returns `Ok(None)` for intents that are not forwarded. On failure a
    /// `dispatchFailed` notification is published before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the downstream error.
    pub async fn deliver(&self, intent: &InterpretedIntent) -> Result<Option<Value>> {
        let Some(payload) = DispatchPayload::for_intent(intent, &self.profile) else {
            debug!(device_id = %intent.device_id, intent = %intent.intent, "Not dispatched");
            return Ok(None);
        };

        match self.dispatcher.dispatch(&payload).await {
            Ok(response) => {
                info!(
                    device_id = %intent.device_id,
                    kind = payload.kind(),
                    "Intent delivered"
                );
                Ok(Some(response))
            }
            Err(err) => {
                warn!(device_id = %intent.device_id, intent = %intent.intent, "Dispatch failed: {err}");
                self.gateway.publish_dispatch_failure(DispatchFailure {
                    device_id: intent.device_id.clone(),
                    intent: intent.intent,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
