//! Test doubles shared by the notifier tests.

use super::{BoundaryGenerator, Clock, ImageData, ImageProvider, NotifierBase, NotifierDeps};
use crate::alert::{Alert, AlertGroup, AlertStatus, LabelSet};
use crate::config::ReceiverKind;
use crate::error::TransportError;
use crate::template::TemplateEngine;
use crate::transport::{
    EmailMessage, EmailTransport, HttpRequest, HttpResponse, HttpTransport, MqttConnectOptions,
    MqttConnector, MqttSession, QoS,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// HTTP
// =============================================================================

/// Records every request and answers from a scripted queue, falling back to
/// `200 {}` once the queue is empty.
pub(crate) struct RecordingHttp {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    delay: Option<Duration>,
}

impl RecordingHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(Vec::new(), None))
    }

    pub fn with_responses(
        responses: Vec<Result<HttpResponse, TransportError>>,
    ) -> Arc<Self> {
        Arc::new(Self::build(responses, None))
    }

    pub fn delayed(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(Vec::new(), Some(delay)))
    }

    fn build(responses: Vec<Result<HttpResponse, TransportError>>, delay: Option<Duration>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into()),
            delay,
        }
    }

    pub fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The only request sent. Panics unless exactly one was recorded.
    pub fn single(&self) -> HttpRequest {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one request");
        requests.into_iter().next().unwrap()
    }
}

#[async_trait]
impl HttpTransport for RecordingHttp {
    async fn send_http(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
    }
}

pub(crate) fn ok(body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(200, body.to_string()))
}

pub(crate) fn status(code: u16, body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(code, body.to_string()))
}

// =============================================================================
// Email
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingEmail {
    messages: Mutex<Vec<EmailMessage>>,
    fail_with: Mutex<Option<TransportError>>,
}

impl RecordingEmail {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, error: TransportError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn messages(&self) -> Vec<EmailMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send_email(
        &self,
        _cancel: &CancellationToken,
        message: EmailMessage,
    ) -> Result<(), TransportError> {
        self.messages.lock().unwrap().push(message);
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// =============================================================================
// MQTT
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MqttEvent {
    Connect(MqttConnectOptions),
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    },
    Disconnect,
}

#[derive(Default)]
pub(crate) struct FakeMqtt {
    events: Arc<Mutex<Vec<MqttEvent>>>,
    connect_error: Option<TransportError>,
    publish_error: Option<TransportError>,
}

impl FakeMqtt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_connect(error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            connect_error: Some(error),
            ..Default::default()
        })
    }

    pub fn failing_publish(error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            publish_error: Some(error),
            ..Default::default()
        })
    }

    pub fn events(&self) -> Vec<MqttEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl MqttConnector for FakeMqtt {
    async fn connect(
        &self,
        _cancel: &CancellationToken,
        options: &MqttConnectOptions,
    ) -> Result<Box<dyn MqttSession>, TransportError> {
        self.events
            .lock()
            .unwrap()
            .push(MqttEvent::Connect(options.clone()));
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        Ok(Box::new(FakeSession {
            events: self.events.clone(),
            publish_error: self.publish_error.clone(),
        }))
    }
}

struct FakeSession {
    events: Arc<Mutex<Vec<MqttEvent>>>,
    publish_error: Option<TransportError>,
}

#[async_trait]
impl MqttSession for FakeSession {
    async fn publish(
        &mut self,
        _cancel: &CancellationToken,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.events.lock().unwrap().push(MqttEvent::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        match &self.publish_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.events.lock().unwrap().push(MqttEvent::Disconnect);
        Ok(())
    }
}

// =============================================================================
// Clock, boundary, images
// =============================================================================

pub(crate) struct FixedClock(pub Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn at(time: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(time)))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub(crate) struct FixedBoundary(pub &'static str);

impl BoundaryGenerator for FixedBoundary {
    fn boundary(&self) -> String {
        self.0.to_string()
    }
}

/// Image provider with canned answers.
#[derive(Default)]
pub(crate) struct StaticImages {
    pub url: Option<String>,
    pub data: Option<ImageData>,
    pub error: Option<String>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl ImageProvider for StaticImages {
    async fn url(
        &self,
        _cancel: &CancellationToken,
        _image_ref: &str,
    ) -> Result<Option<String>, String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.url.clone()),
        }
    }

    async fn data(
        &self,
        _cancel: &CancellationToken,
        _image_ref: &str,
    ) -> Result<Option<ImageData>, String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.data.clone()),
        }
    }
}

pub(crate) fn png() -> ImageData {
    ImageData {
        file_name: "panel.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: Bytes::from_static(b"\x89PNG fake"),
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

pub(crate) fn deps(http: Arc<RecordingHttp>) -> NotifierDeps {
    let mut deps = NotifierDeps::new(http, Arc::new(TemplateEngine::new().unwrap()));
    deps.external_url = "https://grafana.example.com".to_string();
    deps.clock = FixedClock::at(t0());
    deps.boundary = Arc::new(FixedBoundary("herald-boundary"));
    deps.images = Arc::new(StaticImages::default());
    deps.mqtt = FakeMqtt::new();
    deps.email_from = "Herald <herald@example.com>".to_string();
    deps
}

pub(crate) fn base(kind: ReceiverKind) -> NotifierBase {
    NotifierBase::new(format!("test-{}", kind), kind)
}

pub(crate) fn labels(pairs: &[(&str, &str)]) -> LabelSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub(crate) fn alert(instance: &str, status: AlertStatus) -> Alert {
    let mut alert = Alert::firing(labels(&[
        ("alertname", "HighCPU"),
        ("cluster", "eu-1"),
        ("instance", instance),
    ]));
    alert.status = status;
    alert.starts_at = t0();
    alert
        .annotations
        .insert("summary".to_string(), format!("CPU above 90% on {}", instance));
    alert.generator_url = Some("https://grafana.example.com/alerting/1/view".to_string());
    alert
}

pub(crate) fn group(statuses: &[AlertStatus]) -> AlertGroup {
    let alerts = statuses
        .iter()
        .enumerate()
        .map(|(i, s)| alert(&format!("web-{}", i + 1), *s))
        .collect();
    AlertGroup::new(
        labels(&[("alertname", "HighCPU"), ("cluster", "eu-1")]),
        alerts,
    )
    .unwrap()
}

pub(crate) fn firing_group() -> AlertGroup {
    group(&[AlertStatus::Firing])
}

pub(crate) fn resolved_group() -> AlertGroup {
    group(&[AlertStatus::Resolved])
}
