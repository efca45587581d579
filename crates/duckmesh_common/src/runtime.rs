use std::time::{
    Duration,
    SystemTime,
};

use async_trait::async_trait;

/// Execution environment abstraction so background loops (coordinator,
/// compaction, retention) can be driven by a real clock in production and a
/// controllable one in tests, rather than calling `tokio::time`/`SystemTime`
/// directly.
#[async_trait]
pub trait Runtime: Clone + Send + Sync + 'static {
    async fn wait(&self, duration: Duration);

    fn system_time(&self) -> SystemTime;

    fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioRuntime;

#[async_trait]
impl Runtime for TokioRuntime {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future)
    }
}
