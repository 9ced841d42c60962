//! Expression translation collaborator
//!
//! Formulas and physical-access descriptors are translated by an external service. The
//! engine only sees the [`ExpressionTranslator`] contract; [`TranslationClient`] adds the
//! timeout, retry and backoff policy around any implementation.

use crate::models::ConnectionCategory;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Error returned by a translator
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TranslationError {
    #[error("Translation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Translation service unavailable: {0}")]
    Unavailable(String),
    #[error("Translation rejected: {0}")]
    Rejected(String),
    #[error("Translation service returned an empty expression")]
    EmptyResponse,
    #[error("HTTP error: {0}")]
    Http(String),
}

impl TranslationError {
    /// Transient failures are retried; rejections and empty answers are final
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslationError::Timeout(_) | TranslationError::Unavailable(_) | TranslationError::Http(_)
        )
    }
}

/// What is being translated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "category")]
pub enum TranslationKind {
    /// A calculated-field formula
    Formula,
    /// A connection/relation descriptor to turn into a physical-access expression
    Connection(ConnectionCategory),
}

/// A calculation the translated formula may refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub tableau_name: String,
    pub caption: String,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub kind: TranslationKind,
    /// Formula text, or a serialized connection descriptor
    pub source: String,
    pub table_name: String,
    #[serde(default)]
    pub known_dependencies: Vec<Dependency>,
    /// Upper bound for one attempt
    #[serde(skip)]
    pub timeout: Duration,
}

impl TranslationRequest {
    pub fn formula(source: &str, table_name: &str, known_dependencies: Vec<Dependency>) -> Self {
        Self {
            kind: TranslationKind::Formula,
            source: source.to_string(),
            table_name: table_name.to_string(),
            known_dependencies,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn connection(category: ConnectionCategory, source: String, table_name: &str) -> Self {
        Self {
            kind: TranslationKind::Connection(category),
            source,
            table_name: table_name.to_string(),
            known_dependencies: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub translated_expression: String,
}

/// Synchronous translation contract
pub trait ExpressionTranslator: Send + Sync {
    fn translate(&self, request: &TranslationRequest)
    -> Result<TranslationResponse, TranslationError>;
}

/// Inline marker embedded in an expression whose translation failed
pub fn error_marker(reason: &str) -> String {
    format!(
        "ERROR(\"Translation failed: {}\")",
        reason.replace('"', "'")
    )
}

/// Whether an expression carries an inline error marker
pub fn is_error_marker(expression: &str) -> bool {
    expression.starts_with("ERROR(\"Translation failed")
}

/// Timeout and retry settings for translation calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Sleep before the first retry; doubled for every further retry
    pub initial_backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Translator wrapper applying a [`RetryPolicy`]
pub struct TranslationClient {
    translator: Box<dyn ExpressionTranslator>,
    policy: RetryPolicy,
}

impl TranslationClient {
    pub fn new(translator: Box<dyn ExpressionTranslator>, policy: RetryPolicy) -> Self {
        Self { translator, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Translate with retries. An empty expression counts as [`TranslationError::EmptyResponse`].
    pub fn translate(&self, request: &TranslationRequest) -> Result<String, TranslationError> {
        let mut request = request.clone();
        request.timeout = self.policy.timeout;

        let mut attempt = 0;
        loop {
            let result = self
                .translator
                .translate(&request)
                .and_then(|response| {
                    let expression = response.translated_expression.trim().to_string();
                    if expression.is_empty() {
                        Err(TranslationError::EmptyResponse)
                    } else {
                        Ok(expression)
                    }
                });
            match result {
                Ok(expression) => return Ok(expression),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let wait = self.policy.backoff(attempt);
                    warn!(
                        "Translation for '{}' failed ({}), retry {}/{} in {:?}",
                        request.table_name, e, attempt, self.policy.max_retries, wait
                    );
                    thread::sleep(wait);
                }
                Err(e) => {
                    debug!(
                        "Translation for '{}' gave up after {} attempt(s): {}",
                        request.table_name,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Returns the source text unchanged. Useful for dry runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl ExpressionTranslator for IdentityTranslator {
    fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, TranslationError> {
        Ok(TranslationResponse {
            translated_expression: request.source.clone(),
        })
    }
}

/// Translator backed by an HTTP endpoint accepting a JSON [`TranslationRequest`] and
/// answering with a JSON [`TranslationResponse`].
#[cfg(feature = "api-backend")]
pub struct HttpTranslator {
    client: reqwest::blocking::Client,
    endpoint: String,
}

#[cfg(feature = "api-backend")]
impl HttpTranslator {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[cfg(feature = "api-backend")]
impl ExpressionTranslator for HttpTranslator {
    fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, TranslationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    TranslationError::Timeout(request.timeout)
                } else if e.is_connect() {
                    TranslationError::Unavailable(e.to_string())
                } else {
                    TranslationError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TranslationError::Unavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TranslationError::Rejected(format!("{}: {}", status, body)));
        }
        response
            .json::<TranslationResponse>()
            .map_err(|e| TranslationError::Http(format!("Failed to parse response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails with the queued errors first, then answers with a fixed expression
    struct Scripted {
        failures: Mutex<Vec<TranslationError>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(failures: Vec<TranslationError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }
    }

    impl ExpressionTranslator for Scripted {
        fn translate(
            &self,
            _request: &TranslationRequest,
        ) -> Result<TranslationResponse, TranslationError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(TranslationResponse {
                    translated_expression: "SUM('Orders'[Sales])".to_string(),
                })
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::ZERO,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn retries_transient_failures() {
        let client = TranslationClient::new(
            Box::new(Scripted::new(vec![
                TranslationError::Timeout(Duration::from_secs(1)),
                TranslationError::Unavailable("503".to_string()),
            ])),
            policy(3),
        );
        let request = TranslationRequest::formula("SUM([Sales])", "Orders", Vec::new());
        assert_eq!(client.translate(&request).unwrap(), "SUM('Orders'[Sales])");
    }

    #[test]
    fn gives_up_after_max_retries() {
        let client = TranslationClient::new(
            Box::new(Scripted::new(vec![
                TranslationError::Unavailable("down".to_string());
                5
            ])),
            policy(2),
        );
        let request = TranslationRequest::formula("SUM([Sales])", "Orders", Vec::new());
        assert!(matches!(
            client.translate(&request),
            Err(TranslationError::Unavailable(_))
        ));
    }

    #[test]
    fn rejection_is_not_retried() {
        let scripted = Scripted::new(vec![TranslationError::Rejected("bad".to_string())]);
        let client = TranslationClient::new(Box::new(scripted), policy(3));
        let request = TranslationRequest::formula("???", "Orders", Vec::new());
        assert!(matches!(
            client.translate(&request),
            Err(TranslationError::Rejected(_))
        ));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn error_marker_is_recognizable() {
        let marker = error_marker("service said \"no\"");
        assert!(is_error_marker(&marker));
        assert!(!marker.contains("\"no\""));
    }
}
