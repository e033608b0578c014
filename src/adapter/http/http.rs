//! HTTP bridge adapter implementation using `reqwest`.
//!
//! Publishing is a `POST {uri}/messages/{channel}` with a JSON body of the
//! form `{"messages": [...]}`. A batch is split into one request per
//! channel, preserving the order in which channels first appear.
//!
//! Each payload is embedded as JSON when it parses as JSON and as a string
//! otherwise.
//!
//! The bridge has no subscribe side. Subscriptions go to the adapter built
//! from the nested `subscribe_connection_config`, which this adapter owns.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::{
    // ---
    log_debug,
    Adapter,
    AdapterPtr,
    Address,
    ConnectionConfig,
    Driver,
    Envelope,
    PubSubError,
    Result,
    Subscription,
    SubscriptionHandle,
};

const DRIVER: &str = "http";

struct HttpAdapter {
    // ---
    client: Client,
    base: Url,
    subscribe_adapter: AdapterPtr,
}

impl HttpAdapter {
    fn channel_url(&self, channel: &Address) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PubSubError::Backend(format!("{DRIVER}: {} cannot be a base", self.base)))?
            .pop_if_empty()
            .push("messages")
            .push(channel.0.as_ref());
        Ok(url)
    }

    async fn post_messages(&self, channel: &Address, messages: Vec<Value>) -> Result<()> {
        // ---
        let url = self.channel_url(channel)?;
        log_debug!("{DRIVER}: POST {url} ({} messages)", messages.len());

        self.client
            .post(url)
            .json(&json!({ "messages": messages }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

fn message_value(env: &Envelope) -> Value {
    serde_json::from_slice(&env.payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&env.payload).into_owned()))
}

#[async_trait::async_trait]
impl Adapter for HttpAdapter {
    // ---
    async fn publish(&self, env: Envelope) -> Result<()> {
        self.publish_batch(vec![env]).await
    }

    async fn publish_batch(&self, envs: Vec<Envelope>) -> Result<()> {
        // ---
        let mut batches: Vec<(Address, Vec<Value>)> = Vec::new();

        for env in &envs {
            let value = message_value(env);
            match batches.iter_mut().find(|(addr, _)| *addr == env.address) {
                Some((_, messages)) => messages.push(value),
                None => batches.push((env.address.clone(), vec![value])),
            }
        }

        for (channel, messages) in batches {
            self.post_messages(&channel, messages).await?;
        }

        Ok(())
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        self.subscribe_adapter.subscribe(sub).await
    }

    async fn close(&self) -> Result<()> {
        self.subscribe_adapter.close().await
    }

    fn driver(&self) -> Option<Driver> {
        Some(Driver::Http)
    }
}

/// Validated base URL of an HTTP pub-sub bridge.
///
/// Parsed from the connection's `uri` before anything else about the
/// connection is built.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    base: Url,
}

impl HttpEndpoint {
    /// Reads and parses `uri` from an `http` connection config.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `uri` is missing, not a string, or not an
    /// absolute URL that can carry a path.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        // ---
        let uri = config
            .get_str("uri", DRIVER)?
            .ok_or_else(|| PubSubError::invalid_config(DRIVER, "`uri` is required"))?;

        let base = Url::parse(uri)
            .map_err(|err| PubSubError::invalid_config(DRIVER, format!("uri {uri}: {err}")))?;

        if base.cannot_be_a_base() {
            return Err(PubSubError::invalid_config(DRIVER, format!("uri {uri} cannot carry a path")));
        }

        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

/// Creates an HTTP bridge adapter.
///
/// `subscribe_adapter` is the already constructed adapter for the nested
/// `subscribe_connection_config`.
///
/// # Errors
///
/// `Http` if the client cannot be built.
pub fn create_adapter(endpoint: HttpEndpoint, subscribe_adapter: AdapterPtr) -> Result<AdapterPtr> {
    // ---
    let client = Client::builder().build()?;

    log_debug!("{DRIVER}: bridge at {}", endpoint.base);

    Ok(Arc::new(HttpAdapter {
        client,
        base: endpoint.base,
        subscribe_adapter,
    }))
}
