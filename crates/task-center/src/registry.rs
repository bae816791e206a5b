use std::sync::atomic::{AtomicU64, Ordering};

use browserpilot_core_types::{TaskId, TaskStatus};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::TaskCenterError;
use crate::model::{Task, TaskEvent, TaskRecord};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Authoritative store of task records.
///
/// Each record sits behind its own mutex; every status transition is a
/// compare-and-set from `Running` performed under that lock, so the first of
/// any racing complete/fail/cancel calls wins and later ones observe a
/// terminal status.
#[derive(Debug)]
pub struct TaskRegistry {
    records: DashMap<TaskId, Mutex<TaskRecord>>,
    counter: AtomicU64,
    log_capacity: usize,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    pub fn new(log_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            counter: AtomicU64::new(0),
            log_capacity: log_capacity.max(1),
            events,
        }
    }

    /// `task_<unix seconds>_<counter>`; the counter alone keeps ids unique,
    /// the timestamp keeps them unique across restarts.
    pub fn generate_id(&self) -> TaskId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        TaskId(format!("task_{}_{}", Utc::now().timestamp(), seq))
    }

    pub fn register(&self, task_id: TaskId, description: String) -> Result<(), TaskCenterError> {
        match self.records.entry(task_id.clone()) {
            Entry::Occupied(_) => {
                warn!(task_id = %task_id, "duplicate task registration");
                Err(TaskCenterError::AlreadyRegistered(task_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(Mutex::new(TaskRecord::new(
                    task_id.clone(),
                    description,
                    self.log_capacity,
                )));
                self.emit(TaskEvent::Registered { task_id });
                Ok(())
            }
        }
    }

    /// Move a running task to `status`. Returns false when the task is unknown
    /// or already terminal; nothing is modified in that case.
    pub fn transition(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        debug_assert!(status.is_terminal());
        let Some(entry) = self.records.get(task_id) else {
            return false;
        };
        let mut record = entry.value().lock();
        if record.status != TaskStatus::Running {
            debug!(
                task_id = %task_id,
                current = %record.status,
                requested = %status,
                "ignoring transition of finished task"
            );
            return false;
        }
        record.status = status;
        record.end_time = Some(Utc::now());
        if result.is_some() {
            record.result = result;
        }
        if error.is_some() {
            record.error = error;
        }
        drop(record);
        drop(entry);
        self.emit(TaskEvent::StatusChanged {
            task_id: task_id.clone(),
            status,
        });
        true
    }

    /// Attach a result produced after the task was already cancelled.
    pub fn attach_partial_result(&self, task_id: &TaskId, result: Value) -> bool {
        let Some(entry) = self.records.get(task_id) else {
            return false;
        };
        let mut record = entry.value().lock();
        if record.status != TaskStatus::Cancelled || record.result.is_some() {
            return false;
        }
        record.result = Some(result);
        true
    }

    pub fn add_log(&self, task_id: &TaskId, message: &str) -> bool {
        let Some(entry) = self.records.get(task_id) else {
            return false;
        };
        let line = entry.value().lock().push_log(message);
        drop(entry);
        self.emit(TaskEvent::Log {
            task_id: task_id.clone(),
            line,
        });
        true
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        let entry = self.records.get(task_id)?;
        let snapshot = entry.value().lock().snapshot();
        Some(snapshot)
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        let entry = self.records.get(task_id)?;
        let status = entry.value().lock().status;
        Some(status)
    }

    /// Snapshots of every task, oldest first
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .records
            .iter()
            .map(|entry| entry.value().lock().snapshot())
            .collect();
        tasks.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }

    pub fn running_ids(&self) -> Vec<TaskId> {
        self.records
            .iter()
            .filter(|entry| entry.value().lock().status == TaskStatus::Running)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop every finished task and return the removed ids.
    pub fn clear_finished(&self) -> Vec<TaskId> {
        let mut removed = Vec::new();
        self.records.retain(|task_id, record| {
            let keep = record.get_mut().status == TaskStatus::Running;
            if !keep {
                removed.push(task_id.clone());
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: TaskEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_follow_timestamp_counter_format() {
        let registry = TaskRegistry::new(10);
        let first = registry.generate_id();
        let second = registry.generate_id();
        assert_ne!(first, second);
        let parts: Vec<&str> = first.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "task");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], "1");
    }

    #[test]
    fn terminal_status_is_never_overwritten() {
        let registry = TaskRegistry::new(10);
        let id = TaskId::from("task_1");
        registry.register(id.clone(), "demo".into()).unwrap();

        assert!(registry.transition(&id, TaskStatus::Completed, Some(json!(1)), None));
        assert!(!registry.transition(&id, TaskStatus::Failed, None, Some("late".into())));
        assert!(!registry.transition(&id, TaskStatus::Cancelled, None, None));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!(1)));
        assert!(task.error.is_none());
        assert!(task.end_time.is_some());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = TaskRegistry::new(10);
        let id = TaskId::from("task_dup");
        registry.register(id.clone(), String::new()).unwrap();
        assert!(matches!(
            registry.register(id, String::new()),
            Err(TaskCenterError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn logs_are_timestamped_and_capped() {
        let registry = TaskRegistry::new(2);
        let id = TaskId::from("task_logs");
        registry.register(id.clone(), String::new()).unwrap();
        for n in 0..3 {
            assert!(registry.add_log(&id, &format!("entry {}", n)));
        }
        let logs = registry.get(&id).unwrap().logs;
        assert_eq!(logs.len(), 2);
        assert!(logs[0].ends_with(": entry 1"));
        assert!(logs[1].ends_with(": entry 2"));
        assert!(!registry.add_log(&TaskId::from("missing"), "x"));
    }

    #[test]
    fn partial_results_only_attach_to_cancelled_tasks() {
        let registry = TaskRegistry::new(10);
        let id = TaskId::from("task_partial");
        registry.register(id.clone(), String::new()).unwrap();
        assert!(!registry.attach_partial_result(&id, json!("early")));
        assert!(registry.transition(&id, TaskStatus::Cancelled, None, None));
        assert!(registry.attach_partial_result(&id, json!("late")));
        assert!(!registry.attach_partial_result(&id, json!("again")));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.result, Some(json!("late")));
    }
}
