use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use action_flow::{Action, ActionKind, Script, ScriptError, Step};
use agent_bridge::{AgentError, AgentFactory, AgentHandle, AgentOptions, BrowserOp, Instruction};
use async_trait::async_trait;
use browserpilot_core_types::{TaskId, TaskStatus};
use browserpilot_task_center::{
    AgentStatus, TaskCenterError, TaskConfig, TaskManager, TaskManagerConfig, TaskRequest,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_test::assert_ok;

type Rule = dyn Fn(&Instruction) -> Result<Value, AgentError> + Send + Sync;

struct FakeAgent {
    calls: Mutex<Vec<Instruction>>,
    closed: AtomicBool,
    delay: Duration,
    rule: Arc<Rule>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeAgent {
    fn texts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|i| i.text.clone()).collect()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentHandle for FakeAgent {
    async fn execute(&self, instruction: &Instruction) -> Result<Value, AgentError> {
        self.calls.lock().push(instruction.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        (self.rule)(instruction)
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeFactory {
    rule: Arc<Rule>,
    delay: Duration,
    unavailable: bool,
    created: Mutex<Vec<(TaskId, Arc<FakeAgent>)>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeFactory {
    fn new(rule: impl Fn(&Instruction) -> Result<Value, AgentError> + Send + Sync + 'static) -> Self {
        Self {
            rule: Arc::new(rule),
            delay: Duration::ZERO,
            unavailable: false,
            created: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn succeeding() -> Self {
        Self::new(|_| Ok(json!({ "done": true })))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn agent_for(&self, task_id: &TaskId) -> Arc<FakeAgent> {
        self.created
            .lock()
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, agent)| Arc::clone(agent))
            .expect("agent was created")
    }

    fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl AgentFactory for FakeFactory {
    async fn create(
        &self,
        task_id: &TaskId,
        _options: &AgentOptions,
    ) -> Result<Arc<dyn AgentHandle>, AgentError> {
        if self.unavailable {
            return Err(AgentError::Unavailable("no browser".into()));
        }
        let agent = Arc::new(FakeAgent {
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            delay: self.delay,
            rule: Arc::clone(&self.rule),
            active: Arc::clone(&self.active),
            peak: Arc::clone(&self.peak),
        });
        self.created.lock().push((task_id.clone(), Arc::clone(&agent)));
        Ok(agent)
    }
}

fn manager_with(factory: Arc<FakeFactory>, config: TaskManagerConfig) -> TaskManager {
    TaskManager::new(config, factory)
}

fn manager(factory: Arc<FakeFactory>) -> TaskManager {
    manager_with(
        factory,
        TaskManagerConfig {
            require_api_key: false,
            ..TaskManagerConfig::default()
        },
    )
}

fn login_script() -> Script {
    Script::new("Login")
        .with_description("sign in")
        .with_step(
            Step::new("login", "fill the form")
                .with_action(Action::navigate("https://example.com/login"))
                .with_action(Action::type_text("#user", "${user}")),
        )
}

#[test]
fn concurrently_generated_ids_are_distinct() {
    let manager = manager(Arc::new(FakeFactory::succeeding()));
    let ids: Vec<TaskId> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                scope.spawn(move || (0..100).map(|_| manager.generate_task_id()).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 800);
    assert!(ids.iter().all(|id| id.as_str().starts_with("task_")));
}

#[test]
fn cancel_succeeds_once_and_blocks_later_transitions() {
    let manager = manager(Arc::new(FakeFactory::succeeding()));
    let id = TaskId::from("task_cancel");
    manager.register_task(id.clone()).unwrap();

    assert!(manager.cancel_task(&id));
    assert!(!manager.cancel_task(&id));
    assert!(!manager.complete_task(&id, json!("late")));
    assert!(!manager.fail_task(&id, "late"));
    assert!(!manager.cancel_task(&TaskId::from("unknown")));

    let task = manager.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
    assert!(task.error.is_none());
    assert!(task.logs.iter().any(|line| line.ends_with(": Task cancelled")));
}

#[test]
fn racing_terminal_transitions_have_exactly_one_winner() {
    for round in 0..50 {
        let manager = manager(Arc::new(FakeFactory::succeeding()));
        let id = TaskId::from(format!("task_race_{}", round));
        manager.register_task(id.clone()).unwrap();
        let barrier = Arc::new(Barrier::new(3));

        let wins: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..3)
                .map(|which| {
                    let manager = manager.clone();
                    let id = id.clone();
                    let barrier = Arc::clone(&barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        match which {
                            0 => manager.complete_task(&id, json!("ok")),
                            1 => manager.fail_task(&id, "boom"),
                            _ => manager.cancel_task(&id),
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(wins, 1);
        let task = manager.get_task(&id).unwrap();
        match task.status {
            TaskStatus::Completed => {
                assert_eq!(task.result, Some(json!("ok")));
                assert!(task.error.is_none());
            }
            TaskStatus::Failed => {
                assert_eq!(task.error.as_deref(), Some("boom"));
                assert!(task.result.is_none());
            }
            TaskStatus::Cancelled => {
                assert!(task.result.is_none());
                assert!(task.error.is_none());
            }
            TaskStatus::Running => panic!("task left running"),
        }
    }
}

#[tokio::test]
async fn clear_history_keeps_running_tasks() {
    let manager = manager(Arc::new(FakeFactory::succeeding()));
    for name in ["task_a", "task_b", "task_c", "task_d"] {
        manager.register_task(TaskId::from(name)).unwrap();
    }
    manager.complete_task(&TaskId::from("task_a"), json!({}));
    manager.fail_task(&TaskId::from("task_b"), "broken");
    manager.cancel_task(&TaskId::from("task_c"));

    assert_eq!(manager.clear_history().await, 3);

    let remaining: Vec<TaskId> = manager.list_tasks().into_iter().map(|t| t.task_id).collect();
    assert_eq!(remaining, vec![TaskId::from("task_d")]);
    assert_eq!(manager.clear_history().await, 0);
}

#[tokio::test(start_paused = true)]
async fn script_task_runs_to_completion_and_releases_its_agent() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));

    let id = manager
        .submit_script(login_script(), TaskConfig::default().with_variable("user", "alice"))
        .unwrap();
    assert_eq!(manager.get_task(&id).unwrap().status, TaskStatus::Running);

    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.description, "Login: sign in");
    let result = task.result.unwrap();
    assert_eq!(result["total_runs"], json!(1));
    assert_eq!(result["successful_runs"], json!(1));
    assert_eq!(result["status"], json!("completed"));
    assert!(task.logs.iter().any(|line| line.ends_with(": Run 1 succeeded")));

    let agent = factory.agent_for(&id);
    assert_eq!(
        agent.texts(),
        vec![
            "Navigate to https://example.com/login".to_string(),
            "Type 'alice' into element matching selector: #user".to_string(),
        ]
    );
    assert!(agent.is_closed());
    assert_eq!(manager.agent_status(&id), AgentStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn free_form_task_records_agent_result() {
    let factory = Arc::new(FakeFactory::new(|instruction| match &instruction.op {
        BrowserOp::Task { goal, max_steps } => Ok(json!({ "goal": goal, "max_steps": max_steps })),
        _ => Err(AgentError::InvalidInstruction("expected a goal".into())),
    }));
    let manager = manager(Arc::clone(&factory));

    let request = TaskRequest::free_form("find the cheapest flight")
        .with_config(TaskConfig {
            max_steps: Some(25),
            ..TaskConfig::default()
        });
    let id = manager.submit(request).unwrap();
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        task.result,
        Some(json!({ "goal": "find the cheapest flight", "max_steps": 25 }))
    );
    assert!(factory.agent_for(&id).is_closed());
}

#[tokio::test(start_paused = true)]
async fn failing_script_marks_task_failed_with_partial_history() {
    let factory = Arc::new(FakeFactory::new(|_| Err(AgentError::transient("page crashed"))));
    let manager = manager(Arc::clone(&factory));

    let id = manager
        .submit_script(
            login_script(),
            TaskConfig::default()
                .with_variable("user", "alice")
                .with_max_retries(2),
        )
        .unwrap();
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("page crashed"));
    let result = task.result.unwrap();
    assert_eq!(result["failed_runs"], json!(1));
    assert_eq!(factory.agent_for(&id).calls.lock().len(), 2);
    assert!(factory.agent_for(&id).is_closed());
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_periodic_task_stops_it_and_keeps_history() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));

    let id = manager
        .submit_script(
            login_script(),
            TaskConfig::default()
                .with_variable("user", "alice")
                .with_periodic(60.0),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.agent_status(&id), AgentStatus::Active);

    assert!(manager.cancel_task(&id));
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.error.is_none());
    let partial = task.result.expect("partial history attached");
    assert_eq!(partial["total_runs"], json!(1));
    assert_eq!(partial["status"], json!("cancelled"));

    let agent = factory.agent_for(&id);
    assert!(agent.is_closed());
    let calls = agent.calls.lock().len();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(agent.calls.lock().len(), calls);
}

#[tokio::test]
async fn unsupported_model_is_rejected_without_registering() {
    let manager = manager(Arc::new(FakeFactory::succeeding()));
    let request = TaskRequest::free_form("open the docs")
        .with_config(TaskConfig::default().with_model("llama-3-70b"));

    let err = manager.submit(request).unwrap_err();
    assert!(matches!(
        err,
        TaskCenterError::Agent(AgentError::UnsupportedModel(_))
    ));
    assert!(err.is_caller_error());
    assert!(manager.list_tasks().is_empty());
}

#[tokio::test]
async fn untranslatable_script_is_rejected_before_dispatch() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));
    let script = Script::new("Hover").with_step(
        Step::new("hover", "").with_action(Action::new(ActionKind::from("hover".to_string()))),
    );

    let err = manager.submit_script(script, TaskConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        TaskCenterError::Script(ScriptError::UnsupportedAction(_))
    ));
    assert!(manager.list_tasks().is_empty());
    assert_eq!(factory.created_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_a_periodic_task_externally_stops_its_loop() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));

    let id = manager
        .submit_script(
            login_script(),
            TaskConfig::default()
                .with_variable("user", "alice")
                .with_periodic(60.0),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.agent_status(&id), AgentStatus::Active);

    assert!(manager.fail_task(&id, "operator aborted"));
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("operator aborted"));
    assert_eq!(manager.agent_status(&id), AgentStatus::Stopped);

    let agent = factory.agent_for(&id);
    assert!(agent.is_closed());
    let calls = agent.calls.lock().len();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(agent.calls.lock().len(), calls);
}

#[tokio::test(start_paused = true)]
async fn completing_a_periodic_task_externally_releases_its_agent() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));

    let id = manager
        .submit_script(
            login_script(),
            TaskConfig::default()
                .with_variable("user", "alice")
                .with_periodic(60.0),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(manager.complete_task(&id, json!({ "done": true })));
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({ "done": true })));
    assert!(factory.agent_for(&id).is_closed());
}

#[tokio::test]
async fn out_of_range_period_is_invalid() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));
    let outcome = manager.submit_script(login_script(), TaskConfig::default().with_periodic(1e30));
    assert!(matches!(outcome, Err(TaskCenterError::InvalidRequest(_))));
    assert!(manager.list_tasks().is_empty());
    assert_eq!(factory.created_count(), 0);
}

#[tokio::test]
async fn empty_free_form_task_is_invalid() {
    let manager = manager(Arc::new(FakeFactory::succeeding()));
    assert!(matches!(
        manager.submit(TaskRequest::free_form("   ")),
        Err(TaskCenterError::InvalidRequest(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn agent_creation_failure_fails_the_task() {
    let factory = Arc::new(FakeFactory {
        unavailable: true,
        ..FakeFactory::succeeding()
    });
    let manager = manager(factory);

    let id = manager.submit(TaskRequest::free_form("anything")).unwrap();
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().starts_with("agent unavailable"));
}

#[tokio::test(start_paused = true)]
async fn one_failing_task_does_not_disturb_another() {
    let factory = Arc::new(FakeFactory::new(|instruction| match &instruction.op {
        BrowserOp::Click { selector } if selector == "#broken" => {
            Err(AgentError::ElementNotFound(selector.clone()))
        }
        _ => Ok(json!({})),
    }));
    let manager = manager(Arc::clone(&factory));
    let click = |selector: &str| {
        Script::new(format!("Click {}", selector))
            .with_step(Step::new("click", "").with_action(Action::click(selector)))
    };

    let broken = manager
        .submit_script(click("#broken"), TaskConfig::default().with_max_retries(1))
        .unwrap();
    let healthy = manager.submit_script(click("#ok"), TaskConfig::default()).unwrap();

    let broken = manager.wait(&broken).await.unwrap();
    let healthy = manager.wait(&healthy).await.unwrap();
    assert_eq!(broken.status, TaskStatus::Failed);
    assert_eq!(healthy.status, TaskStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn concurrent_executions_respect_the_slot_limit() {
    let factory = Arc::new(FakeFactory::succeeding().with_delay(Duration::from_secs(10)));
    let manager = manager_with(
        Arc::clone(&factory),
        TaskManagerConfig {
            require_api_key: false,
            max_concurrent_tasks: 2,
            ..TaskManagerConfig::default()
        },
    );

    let ids: Vec<TaskId> = (0..5)
        .map(|n| {
            manager
                .submit(TaskRequest::free_form(format!("goal {}", n)))
                .unwrap()
        })
        .collect();
    for id in &ids {
        assert_eq!(manager.wait(id).await.unwrap().status, TaskStatus::Completed);
    }
    assert_eq!(factory.peak.load(Ordering::SeqCst), 2);
    assert_eq!(factory.created_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn variable_updates_apply_from_the_next_run() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));
    let script = Script::new("Greet").with_step(
        Step::new("greet", "").with_action(Action::type_text("#name", "${user}")),
    );

    let id = manager
        .submit_script(
            script,
            TaskConfig::default()
                .with_variable("user", "alice")
                .with_periodic(10.0),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_ok!(manager.update_variables(
        &id,
        HashMap::from([("user".to_string(), "bob".to_string())])
    ));
    tokio::time::sleep(Duration::from_secs(11)).await;
    manager.cancel_task(&id);
    manager.wait(&id).await.unwrap();

    let texts = factory.agent_for(&id).texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("'alice'"));
    assert!(texts[1].contains("'bob'"));

    assert!(matches!(
        manager.update_variables(&id, HashMap::new()),
        Err(TaskCenterError::NotRunning(_))
    ));
    assert!(matches!(
        manager.update_variables(&TaskId::from("nope"), HashMap::new()),
        Err(TaskCenterError::NotFound(_))
    ));
}

#[tokio::test]
async fn agents_can_be_started_and_stopped_explicitly() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));
    let id = TaskId::from("task_manual");
    manager.register_task(id.clone()).unwrap();

    assert_eq!(manager.agent_status(&id), AgentStatus::Stopped);
    let status = manager
        .start_agent(&id, &AgentOptions::default())
        .await
        .unwrap();
    assert_eq!(status, AgentStatus::Active);
    manager.start_agent(&id, &AgentOptions::default()).await.unwrap();
    assert_eq!(factory.created_count(), 1);

    assert!(manager.stop_agent(&id).await);
    assert!(factory.agent_for(&id).is_closed());
    assert_eq!(manager.agent_status(&id), AgentStatus::Stopped);
    assert!(!manager.stop_agent(&id).await);

    assert!(matches!(
        manager
            .start_agent(&TaskId::from("missing"), &AgentOptions::default())
            .await,
        Err(TaskCenterError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_running_work_and_refuses_new_tasks() {
    let factory = Arc::new(FakeFactory::succeeding());
    let manager = manager(Arc::clone(&factory));
    let id = manager
        .submit_script(
            login_script(),
            TaskConfig::default()
                .with_variable("user", "alice")
                .with_periodic(30.0),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    manager.shutdown().await;
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(factory.agent_for(&id).is_closed());
    assert!(matches!(
        manager.submit(TaskRequest::free_form("more")),
        Err(TaskCenterError::ShuttingDown)
    ));
}
