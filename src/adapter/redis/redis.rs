//! Redis Pub/Sub adapter implementation using `redis`.
//!
//! ## Concurrency model
//!
//! A single background **actor task** owns both Redis connections and is
//! the only code that touches them. It:
//!   - publishes outbound messages via `publish_conn`,
//!   - registers broker subscriptions via `pubsub_sink`,
//!   - polls `pubsub_stream` for incoming messages,
//!   - shuts both down on `close()`.
//!
//! ## Two connections required
//!
//! A Redis connection in Pub/Sub mode cannot issue `PUBLISH`, so two are
//! opened eagerly at construction:
//!
//! - `publish_conn`: `MultiplexedConnection`, used only for `PUBLISH`
//! - `pubsub_sink` / `pubsub_stream`: split from `aio::PubSub`
//!
//! `PubSubSink::subscribe()` resolves once the broker confirmed the
//! subscription, so `subscribe()` returns only after that point. Every local
//! subscriber of a channel waits for that confirmation, including ones that
//! arrive while it is in flight; a subscriber whose confirmation failed is
//! removed again.
//!
//! ## Message delivery
//!
//! Payload bytes are published as-is. Incoming messages are fanned out to
//! every local subscriber of the channel; full or closed inboxes are evicted.
//! Delivery is best-effort and non-durable.

use futures_util::StreamExt;

use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OnceCell, RwLock};
use url::Url;

use crate::{
    //
    log_debug,
    log_error,
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

const DRIVER: &str = "redis";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u64 = 6379;
const INBOX_CAPACITY: usize = 64;

/// Local subscribers of one channel.
#[derive(Default)]
struct Channel {
    /// Set once the broker confirmed the channel subscription.
    confirmed: Arc<OnceCell<()>>,
    senders: Vec<mpsc::Sender<Envelope>>,
}

type SubscriberMap = Arc<RwLock<HashMap<String, Channel>>>;

/// Registers `tx` on `channel` and waits for the broker subscription.
///
/// `confirm` issues the broker `SUBSCRIBE`. It runs only while the channel
/// is unconfirmed and one caller at a time; the others wait for it. On
/// failure `tx` is unregistered and the error returned.
async fn join_channel<F, Fut>(
    subscribers: &SubscriberMap,
    channel: &str,
    tx: mpsc::Sender<Envelope>,
    confirm: F,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    // ---
    let confirmed = {
        let mut map = subscribers.write().await;
        let entry = map.entry(channel.to_string()).or_default();
        entry.senders.retain(|s| !s.is_closed());
        entry.senders.push(tx.clone());
        Arc::clone(&entry.confirmed)
    };

    if let Err(err) = confirmed.get_or_try_init(confirm).await {
        if let Some(entry) = subscribers.write().await.get_mut(channel) {
            entry.senders.retain(|s| !s.same_channel(&tx));
        }
        return Err(err);
    }

    Ok(())
}

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        channel: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<()>,
    },
}

struct RedisAdapter {
    // ---
    label: String,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
}

struct RedisActor {
    // ---
    label: String, // for logging only
    publish_conn: MultiplexedConnection,
    pubsub_sink: PubSubSink,
    pubsub_stream: PubSubStream,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
}

impl RedisActor {
    // ---

    async fn run(mut self) {
        // ---
        let mut stream_open = true;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Cmd::Publish { env, resp }) => {
                            let _ = resp.send(self.handle_publish(env).await);
                        }
                        Some(Cmd::Subscribe { channel, resp }) => {
                            let _ = resp.send(self.handle_subscribe(channel).await);
                        }
                        Some(Cmd::Close { resp }) => {
                            log_debug!("{}: closing redis connections", self.label);
                            let _ = resp.send(());
                            break;
                        }
                        // Every adapter handle is gone.
                        None => break,
                    }
                }

                maybe_msg = self.pubsub_stream.next(), if stream_open => {
                    match maybe_msg {
                        Some(msg) => self.handle_incoming(msg).await,
                        None => {
                            log_error!("{}: pubsub stream ended, no further deliveries", self.label);
                            stream_open = false;
                        }
                    }
                }
            }
        }
    }

    async fn handle_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        redis::cmd("PUBLISH")
            .arg(env.address.0.as_ref())
            .arg(env.payload.as_ref())
            .query_async::<i64>(&mut self.publish_conn)
            .await
            .map(|_receivers| {
                log_debug!("{}: published to {} ({_receivers} receivers)", self.label, env.address);
            })
            .map_err(PubSubError::from)
    }

    async fn handle_subscribe(&mut self, channel: String) -> Result<()> {
        // ---
        self.pubsub_sink.subscribe(&channel).await.map_err(|err| {
            log_error!("{}: failed to subscribe to {channel}: {err}", self.label);
            PubSubError::from(err)
        })?;

        log_info!("{}: subscribed to {channel}", self.label);
        Ok(())
    }

    /// Fans an incoming message out to local subscribers, evicting dead ones.
    async fn handle_incoming(&self, msg: redis::Msg) {
        // ---
        let channel = msg.get_channel_name().to_string();
        let env = Envelope::new(channel.clone(), msg.get_payload_bytes().to_vec());

        let senders = {
            let map = self.subscribers.read().await;
            map.get(&channel).map(|c| c.senders.clone())
        };

        let Some(senders) = senders else {
            return;
        };

        let failed: Vec<_> = senders
            .into_iter()
            .filter(|tx| tx.try_send(env.clone()).is_err())
            .collect();

        if !failed.is_empty() {
            log_warn!(
                "{}: evicted {} slow or closed subscribers on {channel}",
                self.label,
                failed.len()
            );
            if let Some(entry) = self.subscribers.write().await.get_mut(&channel) {
                entry
                    .senders
                    .retain(|s| !failed.iter().any(|f| f.same_channel(s)));
            }
        }
    }
}

impl RedisAdapter {
    // ---
    async fn request<T>(&self, cmd: Cmd, rx: oneshot::Receiver<T>) -> Result<T> {
        self.cmd_tx.send(cmd).await.map_err(|_| {
            PubSubError::Backend(format!("{}: redis actor has stopped", self.label))
        })?;

        rx.await.map_err(|_| {
            PubSubError::Backend(format!("{}: redis actor dropped the response", self.label))
        })
    }
}

#[async_trait::async_trait]
impl Adapter for RedisAdapter {
    // ---

    async fn publish(&self, env: Envelope) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.request(Cmd::Publish { env, resp }, rx).await?
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let channel = sub.0.as_ref().to_string();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let name = channel.clone();
        join_channel(&self.subscribers, &channel, tx, move || async move {
            let (resp, resp_rx) = oneshot::channel();
            self.request(Cmd::Subscribe { channel: name, resp }, resp_rx)
                .await?
        })
        .await?;

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (resp, rx) = oneshot::channel();
        // An already stopped actor counts as closed.
        let _ = self.request(Cmd::Close { resp }, rx).await;
        self.subscribers.write().await.clear();
        Ok(())
    }

    fn driver(&self) -> Option<Driver> {
        Some(Driver::Redis)
    }
}

/// Builds the `redis://` URL for a connection config.
///
/// An explicit `url` wins; otherwise `host`, `port`, `db`, `username` and
/// `password` are assembled, defaulting to `localhost:6379/0`.
fn connection_url(config: &ConnectionConfig) -> Result<Url> {
    // ---
    if let Some(url) = config.get_str("url", DRIVER)? {
        return Url::parse(url)
            .map_err(|err| PubSubError::invalid_config(DRIVER, format!("url {url}: {err}")));
    }

    let host = config.get_str("host", DRIVER)?.unwrap_or(DEFAULT_HOST);
    let port = config.get_u64("port", DRIVER)?.unwrap_or(DEFAULT_PORT);
    let port = u16::try_from(port)
        .map_err(|_| PubSubError::invalid_config(DRIVER, format!("port {port} out of range")))?;
    let db = config.get_u64("db", DRIVER)?.unwrap_or(0);

    let mut url = Url::parse("redis://localhost")
        .map_err(|err| PubSubError::invalid_config(DRIVER, err.to_string()))?;
    url.set_host(Some(host))
        .map_err(|err| PubSubError::invalid_config(DRIVER, format!("host {host}: {err}")))?;
    url.set_port(Some(port))
        .map_err(|_| PubSubError::invalid_config(DRIVER, "url cannot carry a port"))?;
    url.set_path(&format!("/{db}"));

    if let Some(password) = config.get_str("password", DRIVER)? {
        let username = config.get_str("username", DRIVER)?.unwrap_or("");
        url.set_username(username)
            .map_err(|_| PubSubError::invalid_config(DRIVER, "url cannot carry a username"))?;
        url.set_password(Some(password))
            .map_err(|_| PubSubError::invalid_config(DRIVER, "url cannot carry a password"))?;
    }

    Ok(url)
}

/// Creates a Redis adapter from a connection config.
///
/// # Errors
///
/// - `InvalidConfig` if connection fields have the wrong type.
/// - `Redis` if the URL is rejected or either connection cannot be
///   established (both are opened eagerly).
pub async fn create_adapter(config: &ConnectionConfig) -> Result<AdapterPtr> {
    // ---
    let url = connection_url(config)?;
    let client = redis::Client::open(url.as_str())?;

    let publish_conn = client.get_multiplexed_async_connection().await?;
    let (pubsub_sink, pubsub_stream) = client.get_async_pubsub().await?.split();

    let label = format!(
        "redis@{}:{}",
        url.host_str().unwrap_or(DEFAULT_HOST),
        url.port().map(u64::from).unwrap_or(DEFAULT_PORT)
    );
    log_info!("{label}: connected");

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

    let actor = RedisActor {
        label: label.clone(),
        publish_conn,
        pubsub_sink,
        pubsub_stream,
        cmd_rx,
        subscribers: Arc::clone(&subscribers),
    };
    tokio::spawn(actor.run());

    Ok(Arc::new(RedisAdapter {
        label,
        cmd_tx,
        subscribers,
    }))
}
