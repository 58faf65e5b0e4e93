//! Line-oriented console: requests go in on stdin, task outcomes and
//! notifications come out on stdout.

use janus_core::error::JanusError;
use janus_core::task::{Role, Task, TaskId, TaskState};
use janus_orchestrator::{Notification, Orchestrator};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Quit,
    /// Answer to the most recent task awaiting confirmation.
    Answer(bool),
    Tasks,
    Skills,
    Abort(TaskId),
    Invalid(String),
    Request(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let head = words.next().map(str::to_lowercase);
    match (head.as_deref(), words.next(), words.next()) {
        (None, _, _) => Command::Empty,
        (Some("quit" | "exit"), None, _) => Command::Quit,
        (Some("y" | "yes"), None, _) => Command::Answer(true),
        (Some("n" | "no"), None, _) => Command::Answer(false),
        (Some("tasks"), None, _) => Command::Tasks,
        (Some("skills"), None, _) => Command::Skills,
        (Some("abort"), Some(id), None) => match id.parse::<TaskId>() {
            Ok(task_id) => Command::Abort(task_id),
            Err(_) => Command::Invalid(format!("not a task id: {id}")),
        },
        (Some("abort"), _, _) => Command::Invalid("usage: abort <task-id>".into()),
        _ => Command::Request(line.to_string()),
    }
}

/// One-paragraph summary of where a task stands.
pub fn render_task(task: &Task) -> String {
    let mut out = format!("[{}] {}", task.state, task.id);
    if let Some(skill_id) = task.target_skill_id() {
        out.push_str(&format!(" ({skill_id})"));
    }
    out.push_str(&format!(": {}", task.query()));

    match task.state {
        TaskState::Auditing => {
            let reason = task
                .metadata
                .audit
                .as_ref()
                .map(|verdict| verdict.reason.as_str())
                .unwrap_or("suggested action");
            out.push_str(&format!("\n  {reason}; proceed? [y/n]"));
        }
        TaskState::Running | TaskState::Waiting => {
            out.push_str("\n  working in the background");
        }
        _ => {}
    }

    if let Some(failure) = &task.metadata.failure {
        out.push_str(&format!("\n  {failure}"));
    } else if task.state == TaskState::Completed
        && let Some(record) = task.history.iter().rev().find(|r| r.role == Role::Assistant)
    {
        out.push_str(&format!("\n  {}", record.content));
    }
    for artifact in &task.artifacts {
        out.push_str(&format!("\n  artifact: {artifact}"));
    }
    out
}

fn print_task(task: &Task) {
    println!("{}", render_task(task));
}

fn print_error(message: &str) {
    eprintln!("error: {message}");
}

#[derive(Clone)]
pub struct Console {
    orchestrator: Orchestrator,
}

impl Console {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn announce(&self, notification: Notification) {
        match notification {
            Notification::Completed(task) => {
                println!("background task finished");
                print_task(&task);
            }
            Notification::Suggestion(task) => {
                println!("suggestion");
                print_task(&task);
            }
        }
    }

    /// Run everything except `Quit`, which the caller handles.
    pub async fn execute(&self, command: Command) {
        match command {
            Command::Empty | Command::Quit => {}
            Command::Invalid(message) => print_error(&message),
            Command::Tasks => {
                let tasks = self.orchestrator.active_tasks().await;
                if tasks.is_empty() {
                    println!("no active tasks");
                }
                tasks.iter().for_each(print_task);
            }
            Command::Skills => {
                for skill in self.orchestrator.manifest() {
                    println!("{:<20} {}", skill.id, skill.description);
                }
            }
            Command::Answer(approve) => self.answer(approve).await,
            Command::Abort(task_id) => self.report(self.orchestrator.abort(task_id).await),
            Command::Request(query) => {
                let task = self.orchestrator.submit(&query).await;
                print_task(&task);
            }
        }
    }

    async fn answer(&self, approve: bool) {
        let latest = self
            .orchestrator
            .awaiting_confirmation()
            .await
            .into_iter()
            .max_by_key(|task| task.created_at);
        match latest {
            Some(task) => self.report(self.orchestrator.confirm(task.id, approve).await),
            None => print_error("nothing is awaiting confirmation"),
        }
    }

    fn report(&self, result: Result<Task, JanusError>) {
        match result {
            Ok(task) => print_task(&task),
            Err(e) => print_error(&e.to_string()),
        }
    }
}
