//! Lifecycle of the daemon's background tasks.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Named background tasks sharing one cancellation root.
///
/// Every task receives a child of `global_token`; [`shutdown_all`](Self::shutdown_all)
/// cancels the root and joins each task, bounded by the shutdown timeout.
pub struct TaskManager {
    tasks: HashMap<String, JoinHandle<Result<()>>>,
    pub global_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// How long `shutdown_all` waits for each task.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Spawns `task_fn` under `name`. A task already registered under the
    /// same name is cancelled along with everything else at shutdown, but
    /// no longer joined.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let result = task_fn(token).await;
            match &result {
                Ok(()) => info!("Task '{task_name}' finished"),
                Err(e) => error!("Task '{task_name}' failed: {e:#}"),
            }
            result
        });

        if self.tasks.insert(name.clone(), handle).is_some() {
            warn!("Task '{name}' replaced an earlier task of the same name");
        }
        info!("Task '{name}' spawned");
        Ok(())
    }

    /// Cancels and joins every task. Returns the first failure, if any.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());
        self.global_token.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks.drain() {
            let failure = match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => e.context(format!("Task '{name}' failed")),
                Ok(Err(e)) => anyhow!("Task '{name}' panicked: {e}"),
                Err(_) => anyhow!("Task '{name}' did not stop within {:?}", self.shutdown_timeout),
            };
            warn!("{failure:#}");
            first_error.get_or_insert(failure);
        }

        match first_error {
            Some(error) => Err(error).context("One or more tasks failed during shutdown"),
            None => {
                info!("All tasks stopped");
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|h| !h.is_finished())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    #[tokio::test]
    async fn cancelled_tasks_stop_cleanly() {
        let mut tm = TaskManager::new();
        for name in ["a", "b"] {
            tm.spawn_task(name.to_string(), |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .await
            .unwrap();
        }
        assert_eq!(tm.active_count(), 2);
        assert!(tm.is_running("a"));

        tm.shutdown_all().await.unwrap();
        assert_eq!(tm.active_count(), 0);
    }

    #[tokio::test]
    async fn task_failure_surfaces_at_shutdown() {
        let mut tm = TaskManager::new();
        tm.spawn_task("broken".to_string(), |_| async { Err(anyhow!("actuator gone")) })
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(!tm.is_running("broken"));

        let err = tm.shutdown_all().await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("broken"));
        assert!(message.contains("actuator gone"));
    }

    #[tokio::test]
    async fn stuck_task_times_out() {
        let mut tm = TaskManager::new().with_shutdown_timeout(Duration::from_millis(20));
        tm.spawn_task("stuck".to_string(), |_| async {
            sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap();

        let err = tm.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("did not stop"));
    }

    #[tokio::test]
    async fn panic_is_reported() {
        let mut tm = TaskManager::new();
        tm.spawn_task("panicky".to_string(), |_| async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .await
        .unwrap();

        let err = tm.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("panicked"));
    }
}
