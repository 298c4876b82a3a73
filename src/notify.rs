//! Best-effort run notifications

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {message}")]
    Http { message: String },
}

/// Something that can tell a human how the run is going
pub trait Notifier {
    fn notify(&self, label: &str, text: &str) -> Result<(), NotifyError>;
}

/// Posts `{"username": label, "text": text}` to a Slack-style incoming webhook
pub struct SlackNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl SlackNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("caption-trainer/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Http { message: format!("Failed to create HTTP client: {e}") })?;

        Ok(Self { url: url.into(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for SlackNotifier {
    fn notify(&self, label: &str, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({ "username": label, "text": text });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| NotifyError::Http { message: format!("Notification request failed: {e}") })?;

        if !response.status().is_success() {
            return Err(NotifyError::Http {
                message: format!("Webhook returned {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Records every message; optionally fails each call
    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        pub messages: Rc<RefCell<Vec<(String, String)>>>,
        pub fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, label: &str, text: &str) -> Result<(), NotifyError> {
            self.messages.borrow_mut().push((label.to_string(), text.to_string()));
            if self.fail {
                return Err(NotifyError::Http { message: "unreachable".to_string() });
            }
            Ok(())
        }
    }
}
