use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use janus_core::error::TaskError;
use janus_core::task::{Task, TaskId};

/// Something the person driving the engine should hear about.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A background task reached a terminal state and nobody was waiting.
    Completed(Task),
    /// A reflex rule proposes a task; answer with `confirm`.
    Suggestion(Task),
}

struct HubState {
    expected: HashSet<TaskId>,
    waiters: HashMap<TaskId, Vec<oneshot::Sender<Task>>>,
    recent: VecDeque<Task>,
    retention: usize,
}

/// Single completion channel plus the monitor that drains it. Each finished
/// task goes to its registered waiters, or to the notification sink when it
/// ran in the background and nobody asked for it.
#[derive(Clone)]
pub struct CompletionHub {
    state: Arc<Mutex<HubState>>,
    tx: mpsc::UnboundedSender<Task>,
}

impl CompletionHub {
    pub fn spawn(
        retention: usize,
        sink: mpsc::UnboundedSender<Notification>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(HubState {
            expected: HashSet::new(),
            waiters: HashMap::new(),
            recent: VecDeque::with_capacity(retention),
            retention,
        }));
        let monitor = tokio::spawn(monitor(Arc::clone(&state), rx, sink));
        (Self { state, tx }, monitor)
    }

    /// Announce that `task_id` will eventually complete, so `wait` can be
    /// called before it does.
    pub async fn track(&self, task_id: TaskId) {
        self.state.lock().await.expected.insert(task_id);
    }

    pub fn complete(&self, task: Task) {
        if let Err(e) = self.tx.send(task) {
            warn!(task_id = %e.0.id, "completion monitor is gone, dropping completion");
        }
    }

    /// Resolve once `task_id` is terminal. Returns immediately for recently
    /// completed tasks.
    pub async fn wait(&self, task_id: TaskId) -> Result<Task, TaskError> {
        let rx = {
            let mut state = self.state.lock().await;
            if let Some(task) = state.recent.iter().rev().find(|task| task.id == task_id) {
                return Ok(task.clone());
            }
            if !state.expected.contains(&task_id) {
                return Err(TaskError::NotFound(task_id.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.entry(task_id).or_default().push(tx);
            rx
        };
        rx.await.map_err(|_| TaskError::NotFound(task_id.to_string()))
    }

    #[cfg(test)]
    pub(crate) async fn is_tracked(&self, task_id: TaskId) -> bool {
        self.state.lock().await.expected.contains(&task_id)
    }

    pub async fn recent(&self, task_id: TaskId) -> Option<Task> {
        self.state
            .lock()
            .await
            .recent
            .iter()
            .rev()
            .find(|task| task.id == task_id)
            .cloned()
    }
}

async fn monitor(
    state: Arc<Mutex<HubState>>,
    mut rx: mpsc::UnboundedReceiver<Task>,
    sink: mpsc::UnboundedSender<Notification>,
) {
    while let Some(task) = rx.recv().await {
        let waiters = {
            let mut state = state.lock().await;
            state.expected.remove(&task.id);
            state.recent.push_back(task.clone());
            while state.recent.len() > state.retention {
                state.recent.pop_front();
            }
            state.waiters.remove(&task.id).unwrap_or_default()
        };

        // A waiter whose caller went away no longer counts as a claim.
        let mut claimed = false;
        for waiter in waiters {
            claimed |= waiter.send(task.clone()).is_ok();
        }
        debug!(task_id = %task.id, state = %task.state, claimed, "completion_delivered");
        if !claimed && task.metadata.background {
            let _ = sink.send(Notification::Completed(task));
        }
    }
    debug!("completion monitor stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use janus_core::task::TaskState;

    fn finished(background: bool) -> Task {
        let mut task = Task::new("stats");
        task.metadata.background = background;
        task.set_state(TaskState::Completed);
        task
    }

    #[tokio::test]
    async fn waiter_registered_before_completion_receives_task() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (hub, _monitor) = CompletionHub::spawn(8, sink_tx);
        let task = finished(true);
        hub.track(task.id).await;

        let waiter = {
            let hub = hub.clone();
            let id = task.id;
            tokio::spawn(async move { hub.wait(id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.complete(task.clone());

        let delivered = waiter.await.expect("join").expect("completion");
        assert_eq!(delivered.id, task.id);
        // Claimed by a waiter, so the sink stays quiet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unclaimed_background_completion_goes_to_sink() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (hub, _monitor) = CompletionHub::spawn(8, sink_tx);

        let foreground = finished(false);
        let background = finished(true);
        hub.complete(foreground.clone());
        hub.complete(background.clone());

        match sink_rx.recv().await {
            Some(Notification::Completed(task)) => assert_eq!(task.id, background.id),
            other => panic!("unexpected notification: {other:?}"),
        }
        assert_eq!(hub.wait(foreground.id).await.expect("recent").id, foreground.id);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
        let (hub, _monitor) = CompletionHub::spawn(8, sink_tx);
        let err = hub.wait(TaskId::new_v4()).await.expect_err("unknown");
        assert!(matches!(err, TaskError::NotFound(_)));
    }

    #[tokio::test]
    async fn retention_bounds_recent_history() {
        let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
        let (hub, _monitor) = CompletionHub::spawn(2, sink_tx);
        let tasks: Vec<Task> = (0..3).map(|_| finished(false)).collect();
        for task in &tasks {
            hub.complete(task.clone());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(hub.recent(tasks[0].id).await.is_none());
        assert!(hub.recent(tasks[2].id).await.is_some());
    }

    #[tokio::test]
    async fn abandoned_waiter_falls_back_to_sink() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (hub, _monitor) = CompletionHub::spawn(8, sink_tx);
        let task = finished(true);
        hub.track(task.id).await;

        let waiter = {
            let hub = hub.clone();
            let id = task.id;
            tokio::spawn(async move { hub.wait(id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;

        hub.complete(task.clone());
        match sink_rx.recv().await {
            Some(Notification::Completed(done)) => assert_eq!(done.id, task.id),
            other => panic!("unexpected notification: {other:?}"),
        }
        assert!(!hub.is_tracked(task.id).await);
    }
}
