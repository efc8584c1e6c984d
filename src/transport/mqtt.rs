//! MQTT transport using `rumqttc`.
//!
//! A session is opened per notification: connect, publish, disconnect. The
//! rumqttc event loop is driven inline until the packet each step waits for
//! shows up, so no background task outlives the notification.

use super::{MqttConnectOptions, MqttConnector, MqttSession, MqttTlsConfig, QoS};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, TlsConfiguration, Transport,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Host, port and TLS flag parsed from a broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    pub(crate) fn parse(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid broker URL: {}", e)))?;
        let tls = match parsed.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            other => {
                return Err(TransportError::InvalidRequest(format!(
                    "unsupported broker URL scheme '{}', expected tcp or ssl",
                    other
                )));
            }
        };
        let host = parsed
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidRequest("broker URL has no host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(if tls { 8883 } else { 1883 });
        Ok(Self { host, port, tls })
    }
}

/// Opens rumqttc sessions.
#[derive(Debug, Clone)]
pub struct RumqttConnector {
    timeout: Duration,
}

impl RumqttConnector {
    /// `timeout` bounds each step (connect, publish, disconnect).
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MqttConnector for RumqttConnector {
    async fn connect(
        &self,
        cancel: &CancellationToken,
        options: &MqttConnectOptions,
    ) -> Result<Box<dyn MqttSession>, TransportError> {
        let endpoint = BrokerEndpoint::parse(&options.broker_url)?;

        let mut mqtt = MqttOptions::new(options.client_id.clone(), endpoint.host.clone(), endpoint.port);
        mqtt.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &options.username {
            let password = options
                .password
                .as_ref()
                .map(|p| p.expose().to_string())
                .unwrap_or_default();
            mqtt.set_credentials(username.clone(), password);
        }
        if endpoint.tls || options.tls.is_some() {
            let tls = options.tls.clone().unwrap_or_default();
            // Server name for SNI and verification is the broker host.
            let config = client_tls_config(&tls)?;
            mqtt.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(
                config,
            ))));
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CHANNEL_CAPACITY);
        let ack = bounded(cancel, self.timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(e) => return Err(connection_error(e)),
                }
            }
        })
        .await?;

        if ack.code != ConnectReturnCode::Success {
            return Err(TransportError::Rejected(format!(
                "broker refused connection: {:?}",
                ack.code
            )));
        }

        tracing::debug!(
            host = %endpoint.host,
            port = endpoint.port,
            tls = endpoint.tls,
            "Connected to MQTT broker"
        );

        Ok(Box::new(RumqttSession {
            client,
            eventloop,
            timeout: self.timeout,
        }))
    }
}

struct RumqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    timeout: Duration,
}

#[async_trait]
impl MqttSession for RumqttSession {
    async fn publish(
        &mut self,
        cancel: &CancellationToken,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let qos = match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        };
        self.client
            .publish(topic, qos, retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))?;

        let eventloop = &mut self.eventloop;
        bounded(cancel, self.timeout, async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) if qos == rumqttc::QoS::AtMostOnce => {
                        return Ok(());
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) if qos == rumqttc::QoS::AtLeastOnce => {
                        return Ok(());
                    }
                    Ok(Event::Incoming(Packet::PubComp(_))) if qos == rumqttc::QoS::ExactlyOnce => {
                        return Ok(());
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(TransportError::Mqtt(e.to_string())),
                }
            }
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))?;

        let eventloop = &mut self.eventloop;
        let flushed = tokio::time::timeout(self.timeout, async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(TransportError::Mqtt(e.to_string())),
                }
            }
        })
        .await;
        flushed.unwrap_or(Err(TransportError::Timeout))
    }
}

async fn bounded<T>(
    cancel: &CancellationToken,
    timeout: Duration,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => result.unwrap_or(Err(TransportError::Timeout)),
    }
}

fn connection_error(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
        ConnectionError::ConnectionRefused(code) => {
            TransportError::Rejected(format!("broker refused connection: {:?}", code))
        }
        other => TransportError::Mqtt(other.to_string()),
    }
}

// =============================================================================
// TLS
// =============================================================================

fn client_tls_config(tls: &MqttTlsConfig) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let builder = if tls.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
    } else {
        builder.with_root_certificates(root_store(tls.ca_cert.as_deref())?)
    };

    match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(parse_certs(cert)?, parse_key(key.expose())?)
            .map_err(|e| TransportError::Tls(format!("invalid client certificate: {}", e))),
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(TransportError::Tls(
            "client certificate and client key must be configured together".to_string(),
        )),
    }
}

fn root_store(ca_pem: Option<&str>) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    match ca_pem {
        Some(pem) => {
            for cert in parse_certs(pem)? {
                roots
                    .add(cert)
                    .map_err(|e| TransportError::Tls(format!("invalid CA certificate: {}", e)))?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs().map_err(|e| {
                TransportError::Tls(format!("failed to load system root certificates: {}", e))
            })?;
            roots.add_parsable_certificates(native);
        }
    }
    Ok(roots)
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(
            "no certificate found in PEM data".to_string(),
        ));
    }
    Ok(certs)
}

fn parse_key(pem: &str) -> Result<PrivateKeyDer<'static>, TransportError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| TransportError::Tls(format!("invalid private key PEM: {}", e)))?
        .ok_or_else(|| TransportError::Tls("no private key found in PEM data".to_string()))
}

/// Accepts any server certificate. Signatures are still checked so the
/// handshake itself stays well-formed.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
