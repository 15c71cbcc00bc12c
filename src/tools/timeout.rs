//! Time bounds for tool invocations and `--version` probes.

use super::process::RunError;
use std::time::Duration;
use tokio::time;

/// Default timeout for a tool invocation
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Timeout for `--version` probes during binary resolution
const VERSION_CHECK_TIMEOUT_SECS: u64 = 3;

/// Hard upper bound on how long one process may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl ExecutionTimeout {
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use toolgate::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Timeout used when probing candidate binaries with `--version`
    pub fn version_check() -> Self {
        Self::from_secs(VERSION_CHECK_TIMEOUT_SECS)
    }

    /// Drive `future` to completion within the bound
    ///
    /// Returns [`RunError::TimedOut`] if the timeout expires first. The future
    /// is dropped on expiry, so anything it owns (a child with
    /// `kill_on_drop`) is cleaned up with it.
    pub async fn run<F, T>(&self, future: F) -> Result<T, RunError>
    where
        F: std::future::Future<Output = Result<T, RunError>>,
    {
        match time::timeout(self.duration, future).await {
            Ok(result) => result,
            Err(_) => Err(RunError::TimedOut(self.duration)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_default() {
        let timeout = ExecutionTimeout::default();
        assert_eq!(timeout.duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_timeout_constructors() {
        assert_eq!(
            ExecutionTimeout::from_millis(1500).duration(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            ExecutionTimeout::from_secs(45).duration(),
            Duration::from_secs(45)
        );
        assert_eq!(
            ExecutionTimeout::version_check().duration(),
            Duration::from_secs(3)
        );
    }

    #[tokio::test]
    async fn test_timeout_run_success() {
        let timeout = ExecutionTimeout::from_secs(1);
        let result = timeout.run(async { Ok::<_, RunError>("value") }).await;
        assert_eq!(result.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_timeout_run_timeout() {
        let timeout = ExecutionTimeout::from_millis(50);

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<(), RunError>(())
            })
            .await;

        assert!(matches!(result, Err(RunError::TimedOut(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_timeout_run_future_error() {
        let timeout = ExecutionTimeout::from_secs(1);

        let result = timeout
            .run(async { Err::<(), RunError>(RunError::OutputLimitExceeded(10)) })
            .await;

        assert!(matches!(result, Err(RunError::OutputLimitExceeded(10))));
    }
}
