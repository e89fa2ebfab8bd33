/// Resilience patterns for store-facing calls
///
/// - **Timeout**: bounds every call to an external store
/// - **Retry**: exponential backoff with jitter, restricted to errors the
///   caller marks as retryable (e.g. version conflicts on conditional writes)
///
/// # Example: conditional write with bounded retry
///
/// ```rust,no_run
/// use resilience::{with_retry_if, RetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::default();
///
///     let result = with_retry_if(
///         &config,
///         |_attempt| async { Ok::<_, String>(()) },
///         |err| err == "conflict",
///     )
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, TimeoutConfig, TimeoutError};
