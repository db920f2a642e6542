//! Post-action hooks: fire-and-log commands that run after a response has
//! been emitted.
//!
//! Hooks are submitted to a bounded queue drained by a small pool of
//! background workers. The dispatcher never waits for a hook; saturation
//! drops the oldest queued hook rather than blocking or rejecting the new
//! one. Failures are logged and never reach the client - the exit status
//! of a hook is informational only.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::models::response::PostActionHook;
use crate::simulation::ExchangeView;

/// One queued hook execution.
#[derive(Debug)]
struct HookJob {
    hook: PostActionHook,
    payload: ExchangeView,
}

#[derive(Debug)]
pub struct HookPool {
    queue: Mutex<VecDeque<HookJob>>,
    notify: Notify,
    capacity: usize,
    cancel: CancellationToken,
}

impl HookPool {
    /// Create the pool and spawn its workers.
    pub fn start(capacity: usize, workers: usize) -> Arc<Self> {
        let pool = Arc::new(HookPool {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            cancel: CancellationToken::new(),
        });

        for worker in 0..workers.max(1) {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.worker_loop(worker).await;
            });
        }
        pool
    }

    /// Enqueue a hook. Never blocks; the oldest queued hook is dropped when
    /// the queue is full.
    pub fn submit(&self, hook: PostActionHook, payload: ExchangeView) {
        {
            let mut queue = self.queue.lock().expect("hook queue poisoned");
            if queue.len() >= self.capacity {
                if let Some(dropped) = queue.pop_front() {
                    tracing::warn!(binary = %dropped.hook.binary, "hook queue saturated, dropping oldest");
                }
            }
            queue.push_back(HookJob { hook, payload });
        }
        self.notify.notify_one();
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().expect("hook queue poisoned").len()
    }

    async fn worker_loop(&self, worker: usize) {
        loop {
            let job = self.queue.lock().expect("hook queue poisoned").pop_front();
            match job {
                Some(job) => execute(job).await,
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            tracing::debug!(worker, "hook worker stopping");
                            return;
                        }
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }
}

async fn execute(job: HookJob) {
    let HookJob { hook, payload } = job;

    if hook.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(hook.delay_ms)).await;
    }

    let serialized = match serde_json::to_vec(&payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(binary = %hook.binary, "could not serialize pair for hook: {e}");
            return;
        }
    };

    let child = Command::new(&hook.binary)
        .args(&hook.arguments)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(binary = %hook.binary, "could not start hook: {e}");
            return;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(&serialized).await {
            tracing::warn!(binary = %hook.binary, "could not write pair to hook: {e}");
        }
    }

    match child.wait_with_output().await {
        Ok(output) if output.status.success() => {
            tracing::debug!(binary = %hook.binary, "hook completed");
        }
        Ok(output) => {
            tracing::warn!(
                binary = %hook.binary,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "hook exited non-zero"
            );
        }
        Err(e) => {
            tracing::warn!(binary = %hook.binary, "hook failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{ParsedRequest, Scheme};
    use crate::models::response::ResponseDetails;

    fn payload() -> ExchangeView {
        let request = ParsedRequest::new("GET", Scheme::Http, "example.com", "/");
        ExchangeView::new(&request, &ResponseDetails::new(200, "ok"))
    }

    fn hook(binary: &str) -> PostActionHook {
        PostActionHook {
            binary: binary.to_string(),
            arguments: vec![],
            delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn saturation_drops_the_oldest() {
        // No workers draining: build the pool by hand so jobs stay queued.
        let pool = HookPool {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: 2,
            cancel: CancellationToken::new(),
        };

        pool.submit(hook("first"), payload());
        pool.submit(hook("second"), payload());
        pool.submit(hook("third"), payload());

        let queue = pool.queue.lock().unwrap();
        let binaries: Vec<&str> = queue.iter().map(|j| j.hook.binary.as_str()).collect();
        assert_eq!(binaries, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn failing_hooks_never_propagate() {
        let pool = HookPool::start(8, 1);
        pool.submit(hook("/definitely/not/a/real/hook"), payload());

        // Give the worker a moment; the only observable outcome is that
        // nothing panics and the queue drains.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.queued(), 0);
        pool.shutdown();
    }
}
