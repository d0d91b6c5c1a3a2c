//! HTTP webhook notification sink.
//!
//! POSTs each [`NotificationPayload`] as a JSON document.  Any 2xx status
//! is success; everything else is reported back to the worker, which owns
//! the retry policy.

use crate::error::NotifyError;
use crate::notify::NotificationPayload;

/// Encode the request body.
pub fn encode_body(payload: &NotificationPayload) -> Result<Vec<u8>, NotifyError> {
    serde_json::to_vec(payload).map_err(|_| NotifyError::Transport("payload encoding failed"))
}

/// Map an HTTP status to a delivery result.
pub fn check_status(status: u16) -> Result<(), NotifyError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(NotifyError::Rejected(status))
    }
}

#[cfg(target_os = "espidf")]
pub use esp::WebhookSink;

#[cfg(target_os = "espidf")]
mod esp {
    use std::time::Duration;

    use esp_idf_svc::http::Method;
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
    use log::{debug, warn};

    use super::{check_status, encode_body};
    use crate::app::ports::NotificationSink;
    use crate::error::NotifyError;
    use crate::notify::NotificationPayload;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub struct WebhookSink {
        url: String,
    }

    impl WebhookSink {
        pub fn new(url: impl Into<String>) -> Self {
            Self { url: url.into() }
        }

        fn post(&self, body: &[u8]) -> Result<u16, NotifyError> {
            let mut conn = EspHttpConnection::new(&Configuration {
                timeout: Some(REQUEST_TIMEOUT),
                crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                ..Default::default()
            })
            .map_err(|_| NotifyError::Transport("http client init failed"))?;

            let len = body.len().to_string();
            let headers = [("Content-Type", "application/json"), ("Content-Length", len.as_str())];
            conn.initiate_request(Method::Post, &self.url, &headers)
                .map_err(|_| NotifyError::Transport("request failed"))?;
            let mut written = 0;
            while written < body.len() {
                written += conn
                    .write(&body[written..])
                    .map_err(|_| NotifyError::Transport("write failed"))?;
            }
            conn.initiate_response()
                .map_err(|_| NotifyError::Transport("no response"))?;
            Ok(conn.status())
        }
    }

    impl NotificationSink for WebhookSink {
        fn deliver(&mut self, payload: &NotificationPayload) -> Result<(), NotifyError> {
            let body = encode_body(payload)?;
            let status = self.post(&body)?;
            debug!("webhook: {:?} -> HTTP {}", payload.severity, status);
            check_status(status).inspect_err(|_| warn!("webhook: rejected with HTTP {}", status))
        }
    }
}
