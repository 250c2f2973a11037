use std::{fmt::Debug, time::Duration};

use anyhow::Context;
use async_trait::async_trait;

use crate::config::Target;

/// Something that can call a function once.
#[async_trait]
pub trait Invoke: Debug + 'static + Send + Sync {
    async fn invoke(&self, target: &Target) -> anyhow::Result<()>;
}

/// POSTs the payload with reqwest. Only the status is looked at: anything
/// outside 2xx is an error, the body is dropped.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Invoke for HttpInvoker {
    async fn invoke(&self, target: &Target) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&target.url)
            .body(target.payload.clone())
            .send()
            .await
            .with_context(|| format!("POST {} failed", target.url))?;

        tracing::debug!("{}: {}", resp.status(), target.url);
        resp.error_for_status()?;

        Ok(())
    }
}
