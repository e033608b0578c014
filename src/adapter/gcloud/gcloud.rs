//! Cloud Pub/Sub adapter implementation.
//!
//! ## Mapping
//!
//! - A channel is a topic: `projects/{project_id}/topics/{channel}`.
//! - A subscription is `projects/{project_id}/subscriptions/{name}` where
//!   `name` is `{client_identifier}.{channel}`, or just `{channel}` when no
//!   client identifier is configured. Every process sharing an identifier
//!   competes for the same messages.
//! - Payload bytes travel base64-encoded in `data`; the content type, if
//!   any, rides along as the `content_type` attribute.
//!
//! ## Auto-provisioning
//!
//! With `auto_create_topics` the topic is created (PUT, `409` tolerated)
//! before the first publish or subscribe on it. `auto_create_subscriptions`
//! does the same for the subscription. Both default to `true`.
//!
//! ## Delivery
//!
//! Each `subscribe()` spawns a pull task that forwards messages into the
//! inbox and acknowledges them once handed over. The task ends when the
//! inbox is dropped or the adapter is closed.
//!
//! Without a `key_file` requests are sent unauthenticated, which is what
//! the Pub/Sub emulator expects (point `api_endpoint` at it).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use super::auth::TokenSource;
use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    Adapter,
    AdapterPtr,
    ConnectionConfig,
    Driver,
    Envelope,
    PubSubError,
    Result,
    Subscription,
    SubscriptionHandle,
};

const DRIVER: &str = "gcloud";
const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";
const CONTENT_TYPE_ATTR: &str = "content_type";
const INBOX_CAPACITY: usize = 64;
const MAX_MESSAGES_PER_PULL: u32 = 100;
const IDLE_DELAY: Duration = Duration::from_millis(200);
const ERROR_DELAY: Duration = Duration::from_secs(1);

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Deserialize)]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// Everything a pull task needs, shared with the adapter.
struct Api {
    // ---
    http: Client,
    endpoint: String,
    project_id: String,
    auth: Option<TokenSource>,
}

impl Api {
    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{topic}", self.project_id)
    }

    fn subscription_path(&self, subscription: &str) -> String {
        format!("projects/{}/subscriptions/{subscription}", self.project_id)
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/{resource}", self.endpoint)
    }

    async fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        match &self.auth {
            Some(auth) => Ok(req.bearer_auth(auth.access_token(&self.http).await?)),
            None => Ok(req),
        }
    }

    /// PUT a resource, treating "already exists" as success.
    async fn create(&self, resource: &str, body: Value) -> Result<()> {
        // ---
        let req = self.authorize(self.http.put(self.url(resource)).json(&body)).await?;
        let resp = req.send().await?;

        if resp.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        resp.error_for_status()?;

        log_info!("{DRIVER}: created {resource}");
        Ok(())
    }

    async fn post(&self, resource_action: &str, body: Value) -> Result<reqwest::Response> {
        let req = self
            .authorize(self.http.post(self.url(resource_action)).json(&body))
            .await?;
        Ok(req.send().await?.error_for_status()?)
    }

    async fn pull(&self, subscription: &str) -> Result<PullResponse> {
        // ---
        let path = format!("{}:pull", self.subscription_path(subscription));
        let resp = self
            .post(&path, json!({ "maxMessages": MAX_MESSAGES_PER_PULL }))
            .await?;
        Ok(resp.json().await?)
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: Vec<String>) -> Result<()> {
        let path = format!("{}:acknowledge", self.subscription_path(subscription));
        self.post(&path, json!({ "ackIds": ack_ids })).await?;
        Ok(())
    }
}

fn decode_message(channel: &str, msg: PubsubMessage) -> Result<Envelope> {
    // ---
    let payload = BASE64
        .decode(msg.data.as_bytes())
        .map_err(|err| PubSubError::Backend(format!("{DRIVER}: invalid message data: {err}")))?;

    let env = Envelope::new(channel.to_string(), payload);
    Ok(match msg.attributes.get(CONTENT_TYPE_ATTR) {
        Some(ct) => env.with_content_type(ct.as_str()),
        None => env,
    })
}

fn encode_message(env: &Envelope) -> Value {
    let mut msg = json!({ "data": BASE64.encode(&env.payload) });
    if let Some(ct) = &env.content_type {
        msg["attributes"][CONTENT_TYPE_ATTR] = Value::from(ct.as_ref());
    }
    msg
}

struct GcloudAdapter {
    // ---
    api: Arc<Api>,
    client_identifier: Option<String>,
    auto_create_topics: bool,
    auto_create_subscriptions: bool,
    known_topics: Mutex<HashSet<String>>,
    shutdown: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GcloudAdapter {
    fn subscription_name(&self, channel: &str) -> String {
        match &self.client_identifier {
            Some(id) => format!("{id}.{channel}"),
            None => channel.to_string(),
        }
    }

    /// Creates the topic once per adapter when auto-creation is on.
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        // ---
        if !self.auto_create_topics {
            return Ok(());
        }

        let mut known = self.known_topics.lock().await;
        if known.contains(topic) {
            return Ok(());
        }

        self.api.create(&self.api.topic_path(topic), json!({})).await?;
        known.insert(topic.to_string());
        Ok(())
    }

    async fn publish_messages(&self, topic: &str, messages: Vec<Value>) -> Result<()> {
        // ---
        self.ensure_topic(topic).await?;

        let path = format!("{}:publish", self.api.topic_path(topic));
        self.api.post(&path, json!({ "messages": messages })).await?;

        log_debug!("{DRIVER}: published to {topic}");
        Ok(())
    }
}

/// Adds a pull task, dropping handles of tasks that already ended.
fn track(tasks: &mut Vec<JoinHandle<()>>, handle: JoinHandle<()>) {
    tasks.retain(|task| !task.is_finished());
    tasks.push(handle);
}

async fn pull_loop(
    api: Arc<Api>,
    channel: String,
    subscription: String,
    tx: mpsc::Sender<Envelope>,
    shutdown: Arc<Notify>,
) {
    // ---
    loop {
        if tx.is_closed() {
            break;
        }

        let pulled = tokio::select! {
            res = api.pull(&subscription) => res,
            _ = shutdown.notified() => break,
        };

        let received = match pulled {
            Ok(resp) => resp.received_messages,
            Err(_err) => {
                log_warn!("{DRIVER}: pull on {subscription} failed: {_err}");
                tokio::time::sleep(ERROR_DELAY).await;
                continue;
            }
        };

        if received.is_empty() {
            tokio::time::sleep(IDLE_DELAY).await;
            continue;
        }

        let mut ack_ids = Vec::with_capacity(received.len());
        for rm in received {
            match decode_message(&channel, rm.message) {
                Ok(env) => {
                    if tx.send(env).await.is_err() {
                        // Inbox dropped; leave the rest unacknowledged for redelivery.
                        break;
                    }
                }
                Err(_err) => log_warn!("{_err}"),
            }
            ack_ids.push(rm.ack_id);
        }

        if let Err(_err) = api.acknowledge(&subscription, ack_ids).await {
            log_warn!("{DRIVER}: acknowledge on {subscription} failed: {_err}");
        }
    }

    log_debug!("{DRIVER}: pull loop for {subscription} stopped");
}

#[async_trait::async_trait]
impl Adapter for GcloudAdapter {
    // ---
    async fn publish(&self, env: Envelope) -> Result<()> {
        let topic = env.address.0.to_string();
        self.publish_messages(&topic, vec![encode_message(&env)]).await
    }

    /// Sends one `:publish` request per topic.
    async fn publish_batch(&self, envs: Vec<Envelope>) -> Result<()> {
        // ---
        let mut by_topic: Vec<(String, Vec<Value>)> = Vec::new();
        for env in &envs {
            let topic = env.address.0.as_ref();
            let msg = encode_message(env);
            match by_topic.iter_mut().find(|(t, _)| t == topic) {
                Some((_, msgs)) => msgs.push(msg),
                None => by_topic.push((topic.to_string(), vec![msg])),
            }
        }

        for (topic, messages) in by_topic {
            self.publish_messages(&topic, messages).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let channel = sub.0.to_string();
        let subscription = self.subscription_name(&channel);

        self.ensure_topic(&channel).await?;

        if self.auto_create_subscriptions {
            let body = json!({ "topic": self.api.topic_path(&channel) });
            self.api
                .create(&self.api.subscription_path(&subscription), body)
                .await?;
        }

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let handle = tokio::spawn(pull_loop(
            Arc::clone(&self.api),
            channel,
            subscription,
            tx,
            Arc::clone(&self.shutdown),
        ));
        track(&mut *self.tasks.lock().await, handle);

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.shutdown.notify_waiters();

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            // Tasks sleeping between pulls do not see the notification.
            handle.abort();
        }
        Ok(())
    }

    fn driver(&self) -> Option<Driver> {
        Some(Driver::Gcloud)
    }
}

/// Creates a Cloud Pub/Sub adapter from a connection config.
///
/// Fields: `project_id` (required), `key_file`, `client_identifier`,
/// `auto_create_topics`, `auto_create_subscriptions`, `api_endpoint`.
///
/// # Errors
///
/// - `InvalidConfig` for a missing `project_id` or wrongly typed fields.
/// - `Io`, `Serialization` or `Jwt` when the key file cannot be loaded.
/// - `Http` if the HTTP client cannot be built.
pub async fn create_adapter(config: &ConnectionConfig) -> Result<AdapterPtr> {
    // ---
    let project_id = config
        .get_str("project_id", DRIVER)?
        .ok_or_else(|| PubSubError::invalid_config(DRIVER, "`project_id` is required"))?
        .to_string();

    let auth = match config.get_str("key_file", DRIVER)? {
        Some(path) => Some(TokenSource::from_key_file(Path::new(path)).await?),
        None => None,
    };

    let endpoint = config
        .get_str("api_endpoint", DRIVER)?
        .unwrap_or(DEFAULT_ENDPOINT)
        .trim_end_matches('/')
        .to_string();

    let client_identifier = config
        .get_str("client_identifier", DRIVER)?
        .map(str::to_string);

    log_info!(
        "{DRIVER}: project {project_id} at {endpoint} as {}",
        auth.as_ref().map(|a| a.client_email()).unwrap_or("anonymous")
    );

    Ok(Arc::new(GcloudAdapter {
        api: Arc::new(Api {
            http: Client::builder().build()?,
            endpoint,
            project_id,
            auth,
        }),
        client_identifier,
        auto_create_topics: config.get_bool("auto_create_topics", DRIVER)?.unwrap_or(true),
        auto_create_subscriptions: config
            .get_bool("auto_create_subscriptions", DRIVER)?
            .unwrap_or(true),
        known_topics: Mutex::new(HashSet::new()),
        shutdown: Arc::new(Notify::new()),
        tasks: Mutex::new(Vec::new()),
    }))
}
