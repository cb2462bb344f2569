//! Record types produced by the parsers and consumed by the session client.
//!
//! Plain value objects: no behavior beyond validated construction and the
//! two lookup helpers on [`TasksList`]. Everything lives in memory only for
//! the duration of a listing or a search call.

use chrono::NaiveDateTime;
use serde::Deserialize;

/// Canonical decoded shape of every JSON action response from the portal.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskResponse {
    pub status: i64,
    pub message: String,
}

/// Requester of a parent request: portal id plus display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiator {
    pub id: String,
    pub name: String,
}

/// Wait descriptor attached to a task that has been placed on hold.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskWait {
    /// Wait-kind label, the part of the wait cell before the colon.
    pub kind: String,
    /// Free-text part of the wait cell after the colon.
    pub description: String,
    /// Resolution moment, when the wait cell carries a trailing
    /// `DD.MM.YYYY HH:MM` stamp.
    pub datetime: Option<NaiveDateTime>,
}

/// One assigned task, parsed from a single listing-table row.
///
/// Constructed only by [`crate::parse::parse_tasks_list`]; fields other than
/// `id` are filled in as the row is scanned and stay untouched afterwards.
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub id: String,
    /// Whether the listing row carried the current-task marker class.
    pub run: bool,
    /// Identifier of the parent request this task belongs to.
    pub request_id: Option<String>,
    pub initiator: Option<Initiator>,
    /// Free-text description, newline-joined and trimmed.
    pub text: Option<String>,
    pub date: Option<String>,
    /// Task-type label from the listing row.
    pub kind: Option<String>,
    /// Elapsed time as the portal renders it.
    pub time: Option<String>,
    /// Planned time as the portal renders it.
    pub plan: Option<String>,
    pub wait: Option<TaskWait>,
    /// Portal id of the employee the task is assigned to.
    pub user_id: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Ordered task collection preserving listing-row order.
///
/// Ids are not guaranteed unique at the model level; both lookups return the
/// first match in row order.
#[derive(Debug, Clone, Default)]
pub struct TasksList(Vec<Task>);

impl TasksList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, task: Task) {
        self.0.push(task);
    }

    /// First task whose listing row carried the running marker, if any.
    pub fn running(&self) -> Option<&Task> {
        self.0.iter().find(|t| t.run)
    }

    /// First task with the given id, if any.
    pub fn by_id(&self, id: &str) -> Option<&Task> {
        self.0.iter().find(|t| t.id == id)
    }
}

impl std::ops::Deref for TasksList {
    type Target = [Task];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for TasksList {
    type Item = Task;
    type IntoIter = std::vec::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TasksList {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Task> for TasksList {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One selectable task type from the taxonomy search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskType {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub disabled: bool,
}

/// Named group of task types, in server order. Produced fresh per search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTypesGroup {
    pub name: String,
    pub task_types: Vec<TaskType>,
}

/// Comment audience selector on the close form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentType {
    Default,
    Internal,
    Dispatcher,
    Manager,
}

impl CommentType {
    /// Wire value the close form expects.
    pub fn as_form_value(self) -> &'static str {
        match self {
            Self::Default => "0",
            Self::Internal => "2",
            Self::Dispatcher => "4",
            Self::Manager => "5",
        }
    }
}

/// Continuation decision when the portal asks whether other employees keep
/// working on the parent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseChoice {
    Close,
    Continue,
    Rejected,
}

impl CloseChoice {
    /// Wire value the close form expects.
    pub fn as_form_value(self) -> &'static str {
        match self {
            Self::Close => "Close",
            Self::Continue => "AsIs",
            Self::Rejected => "Denied",
        }
    }
}

/// What the portal expects next after a close has been prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseFollowUp {
    /// A free-text comment on the finished work is required.
    CommentRequired,
    /// The portal asks whether work on the request continues; a
    /// [`CloseChoice`] must accompany the close.
    ContinuationChoice,
}
