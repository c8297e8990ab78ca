//! Messenger Client
//!
//! HTTP clients used by the resharing orchestrator:
//! - [`MessengerClient`] talks to the messenger service
//! - [`HttpTransport`] delivers initiation messages to operator nodes

use reqwest::{Client, StatusCode};
use reshare_core::delivery::{DeliveryError, OperatorTransport};
use reshare_core::messenger::{async_trait, Messenger, StreamKind, Subscriber, Topic, DEFAULT_TOPIC};
use reshare_core::registration::{register_operator, RetryPolicy};
use reshare_core::{Error, OperatorId, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP-based messenger client
pub struct MessengerClient {
    /// HTTP client
    client: Client,
    /// Messenger service URL
    url: String,
    /// Request timeout
    timeout: Duration,
}

impl MessengerClient {
    /// Create a new messenger client
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept invalid TLS certificates from the messenger
    pub fn with_insecure_tls(mut self) -> Result<Self> {
        self.client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Messenger(e.to_string()))?;
        Ok(self)
    }

    /// Messenger service URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register this operator node under the default topic, retrying per `policy`
    pub async fn register_operator_node(
        &self,
        operator_id: OperatorId,
        address: &str,
        policy: &RetryPolicy,
    ) -> Result<()> {
        register_operator(self, operator_id, address, DEFAULT_TOPIC, policy).await
    }

    /// Messages published on a topic, oldest first
    #[instrument(skip(self))]
    pub async fn topic_messages(&self, topic: &str) -> Result<Vec<Vec<u8>>> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let response = self
            .client
            .get(format!("{}/topics/{}/messages", self.url, topic))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Messenger(e.to_string()))?;
        check_status(&response, "messages")?;

        let messages: Vec<MessageJson> = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))?;

        messages
            .into_iter()
            .map(|m| {
                STANDARD
                    .decode(&m.payload)
                    .map_err(|e| Error::Deserialization(e.to_string()))
            })
            .collect()
    }

    async fn post_bytes(&self, url: String, query: &[(&str, &str)], payload: &[u8], op: &str) -> Result<()> {
        let response = self
            .client
            .post(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Messenger(format!("{} request failed: {}", op, e)))?;
        check_status(&response, op)
    }
}

fn check_status(response: &reqwest::Response, op: &str) -> Result<()> {
    if !response.status().is_success() {
        return Err(Error::Messenger(format!(
            "{} failed with status: {}",
            op,
            response.status()
        )));
    }
    Ok(())
}

#[async_trait]
impl Messenger for MessengerClient {
    #[instrument(skip(self, topic), fields(topic = %topic.topic_name))]
    async fn create_topic(&self, topic: &Topic) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/topics", self.url))
            .json(topic)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Messenger(format!("createTopic request failed: {}", e)))?;
        check_status(&response, "createTopic")?;

        debug!(subscribers = ?topic.subscribers, "Topic created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_topic(&self, name: &str) -> Result<Option<Topic>> {
        let response = self
            .client
            .get(format!("{}/topics/{}", self.url, name))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Messenger(format!("getTopic request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(&response, "getTopic")?;

        let topic = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(Some(topic))
    }

    #[instrument(skip(self, subscriber), fields(name = %subscriber.name))]
    async fn register_node(&self, subscriber: &Subscriber, topic: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/register_node", self.url))
            .query(&[("subscribes_to", topic)])
            .json(subscriber)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Messenger(format!("failed to make request to messenger: {}", e)))?;
        check_status(&response, "register_node")
    }

    #[instrument(skip(self, payload))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.post_bytes(
            format!("{}/publish", self.url),
            &[("topic_name", topic)],
            payload,
            "publish",
        )
        .await
    }

    #[instrument(skip(self, payload))]
    async fn stream(&self, kind: StreamKind, request_id: &str, payload: &[u8]) -> Result<()> {
        self.post_bytes(
            format!("{}/stream/{}", self.url, kind.as_str()),
            &[("request_id", request_id)],
            payload,
            kind.as_str(),
        )
        .await
    }
}

/// Delivers payloads to operator `/consume` endpoints
#[derive(Clone)]
pub struct HttpTransport {
    /// HTTP client, shared across deliveries
    client: Client,
    /// Request timeout
    timeout: Duration,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperatorTransport for HttpTransport {
    async fn consume(&self, address: &str, payload: &[u8]) -> std::result::Result<(), DeliveryError> {
        let url = format!("{}/consume", address.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        if response.status() != StatusCode::OK {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }

        debug!(url = %url, "Payload consumed");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MessageJson {
    payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{Query, State},
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use reshare_core::delivery::{DeliveryStatus, DEFAULT_MAX_CONCURRENCY};
    use reshare_core::signer::Ed25519Signer;
    use reshare_core::{CancelToken, Orchestrator, ResharingRequest};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Address nothing listens on
    async fn dead_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[derive(Default)]
    struct StubMessenger {
        register_calls: AtomicUsize,
        fail_first: usize,
        topics: Mutex<Vec<Topic>>,
        registered: Mutex<Vec<(String, Subscriber)>>,
    }

    async fn stub_messenger(fail_first: usize) -> (String, Arc<StubMessenger>) {
        let state = Arc::new(StubMessenger {
            fail_first,
            ..Default::default()
        });

        async fn register(
            State(state): State<Arc<StubMessenger>>,
            Query(params): Query<HashMap<String, String>>,
            Json(subscriber): Json<Subscriber>,
        ) -> AxumStatus {
            let call = state.register_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= state.fail_first {
                return AxumStatus::SERVICE_UNAVAILABLE;
            }
            let topic = params.get("subscribes_to").cloned().unwrap_or_default();
            state.registered.lock().unwrap().push((topic, subscriber));
            AxumStatus::OK
        }

        async fn create_topic(
            State(state): State<Arc<StubMessenger>>,
            Json(topic): Json<Topic>,
        ) -> AxumStatus {
            state.topics.lock().unwrap().push(topic);
            AxumStatus::OK
        }

        let app = Router::new()
            .route("/register_node", post(register))
            .route("/topics", post(create_topic))
            .route("/topics/:name", get(|| async { AxumStatus::NOT_FOUND }))
            .with_state(Arc::clone(&state));

        (serve(app).await, state)
    }

    /// Operator node answering `/consume` with `status`, recording bodies
    async fn stub_operator(status: AxumStatus) -> (String, Arc<Mutex<Vec<Vec<u8>>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let app = Router::new().route(
            "/consume",
            post(move |body: Bytes| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(body.to_vec());
                    status
                }
            }),
        );
        (serve(app).await, received)
    }

    #[tokio::test]
    async fn test_registration_succeeds_on_third_attempt() {
        let (url, stub) = stub_messenger(2).await;
        let client = MessengerClient::new(&url);

        client
            .register_operator_node(7, "http://op7", &RetryPolicy::immediate(3))
            .await
            .unwrap();

        assert_eq!(stub.register_calls.load(Ordering::SeqCst), 3);
        let registered = stub.registered.lock().unwrap();
        assert_eq!(registered[0].0, DEFAULT_TOPIC);
        assert_eq!(registered[0].1.name, "7");
        assert_eq!(registered[0].1.address, "http://op7");
    }

    #[tokio::test]
    async fn test_registration_exhausted() {
        let (url, stub) = stub_messenger(usize::MAX).await;
        let client = MessengerClient::new(&url);

        let err = client
            .register_operator_node(7, "http://op7", &RetryPolicy::immediate(3))
            .await
            .unwrap_err();

        assert_eq!(stub.register_calls.load(Ordering::SeqCst), 3);
        match err {
            Error::RegistrationFailed { errors, .. } => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registration_transport_errors_aggregated() {
        let client = MessengerClient::new(&dead_address().await);

        let err = client
            .register_operator_node(1, "http://op1", &RetryPolicy::immediate(3))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RegistrationFailed { attempts: 3, ref errors } if errors.len() == 3));
    }

    #[tokio::test]
    async fn test_get_topic_not_found() {
        let (url, _) = stub_messenger(0).await;
        let client = MessengerClient::new(&url);

        assert_eq!(client.get_topic("abcd").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_topic_status_error() {
        let app = Router::new().route("/topics", post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }));
        let client = MessengerClient::new(&serve(app).await);

        let err = client
            .create_topic(&Topic::for_operators("abcd", &[1]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Messenger(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_topic_messages_decoded() {
        let app = Router::new()
            .route(
                "/topics/abcd/messages",
                get(|| async {
                    Json(serde_json::json!([
                        { "hash": "h1", "payload": "AQID", "created_at": "2024-01-01T00:00:00Z" },
                        { "hash": "h2", "payload": "", "created_at": "2024-01-01T00:00:01Z" },
                    ]))
                }),
            )
            .route(
                "/topics/broken/messages",
                get(|| async { Json(serde_json::json!([{ "payload": "!!not base64!!" }])) }),
            )
            .route("/topics/missing/messages", get(|| async { AxumStatus::NOT_FOUND }));
        let client = MessengerClient::new(&serve(app).await);

        let messages = client.topic_messages("abcd").await.unwrap();
        assert_eq!(messages, vec![vec![1u8, 2, 3], vec![]]);

        assert!(matches!(
            client.topic_messages("broken").await,
            Err(Error::Deserialization(_))
        ));
        assert!(matches!(
            client.topic_messages("missing").await,
            Err(Error::Messenger(ref msg)) if msg.contains("404")
        ));
    }

    #[tokio::test]
    async fn test_transport_outcomes() {
        let (ok, received) = stub_operator(AxumStatus::OK).await;
        let (failing, _) = stub_operator(AxumStatus::BAD_GATEWAY).await;
        let (accepted_only, _) = stub_operator(AxumStatus::ACCEPTED).await;
        let transport = HttpTransport::new();

        transport.consume(&format!("{}/", ok), b"payload").await.unwrap();
        assert_eq!(received.lock().unwrap()[0], b"payload");

        assert_eq!(
            transport.consume(&failing, b"payload").await,
            Err(DeliveryError::Status(502))
        );
        assert_eq!(
            transport.consume(&accepted_only, b"payload").await,
            Err(DeliveryError::Status(202))
        );
        assert!(matches!(
            transport.consume(&dead_address().await, b"payload").await,
            Err(DeliveryError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_resharing_over_http() {
        let (messenger_url, messenger) = stub_messenger(0).await;
        let (a, received_a) = stub_operator(AxumStatus::OK).await;
        let (b, _) = stub_operator(AxumStatus::INTERNAL_SERVER_ERROR).await;
        let c = dead_address().await;

        let orchestrator = Orchestrator::new(
            MessengerClient::new(&messenger_url),
            Arc::new(HttpTransport::new().with_timeout(Duration::from_secs(5))),
            Ed25519Signer::generate(1),
        )
        .with_max_concurrency(DEFAULT_MAX_CONCURRENCY);

        let request = ResharingRequest {
            operators: vec![format!("1={}", a), format!("2={}", b)],
            old_operators: vec![format!("1={}", a), format!("3={}", c)],
            threshold: 2,
            validator_pk: "ab12".into(),
        };
        let report = orchestrator.run(&request, CancelToken::never()).await.unwrap();

        let topics = messenger.topics.lock().unwrap().clone();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].topic_name, report.session_id.to_hex());
        assert_eq!(topics[0].subscribers, vec!["1", "2", "3"]);

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.outcomes[0].status, DeliveryStatus::Delivered);
        assert_eq!(
            report.outcomes[1].status,
            DeliveryStatus::Failed(DeliveryError::Status(500))
        );
        assert!(matches!(
            report.outcomes[2].status,
            DeliveryStatus::Failed(DeliveryError::Transport(_))
        ));
        assert_eq!(received_a.lock().unwrap().len(), 1);
    }
}
