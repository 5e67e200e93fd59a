use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use time::OffsetDateTime;

use crate::ports;
use crate::push::dispatch;
use crate::types::push::{DeliveryOutcome, DeliveryRequest};

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl ports::TimeProvider for TokioTimeProvider {
    type Sleep<'a>
        = tokio::time::Sleep
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        tokio::time::sleep(duration)
    }
}

/// Posts encrypted messages to push endpoints over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    /// `timeout` bounds each send so a wedged endpoint cannot stall a run.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl ports::PushDispatcher for HttpDispatcher {
    type Fut<'a>
        = Pin<Box<dyn Future<Output = DeliveryOutcome> + Send + 'a>>
    where
        Self: 'a;

    fn send<'a>(&'a self, request: &'a DeliveryRequest) -> Self::Fut<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(&request.endpoint)
                .header(dispatch::TTL_HEADER, request.ttl_seconds.to_string())
                .header(AUTHORIZATION, request.authorization.as_str())
                .header(CONTENT_TYPE, dispatch::CONTENT_TYPE)
                .header(CONTENT_ENCODING, dispatch::CONTENT_ENCODING)
                .body(request.body.clone())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let outcome = dispatch::classify(status);
                    tracing::info!(
                        endpoint = %request.endpoint,
                        status,
                        ?outcome,
                        "push service responded"
                    );
                    outcome
                }
                Err(err) => {
                    tracing::warn!(
                        endpoint = %request.endpoint,
                        error = %err,
                        "push request failed"
                    );
                    DeliveryOutcome::Retry
                }
            }
        })
    }
}
