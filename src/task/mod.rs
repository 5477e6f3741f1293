use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schemaless key/value record as held by the remote store
pub type Document = serde_json::Map<String, serde_json::Value>;

/// The three fixed lists of the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListId {
    /// Work not started yet; every new task lands here
    Backlog,
    /// Work being done
    InProgress,
    /// Finished work
    Done,
}

impl ListId {
    /// All lists in board order
    pub const ALL: [ListId; 3] = [ListId::Backlog, ListId::InProgress, ListId::Done];

    /// Name of the remote collection that holds this list's documents
    pub fn collection_name(&self) -> &'static str {
        match self {
            ListId::Backlog => "backlog",
            ListId::InProgress => "inProgress",
            ListId::Done => "done",
        }
    }

    /// Position of the list on the board, used to index per-list arrays
    pub fn index(&self) -> usize {
        match self {
            ListId::Backlog => 0,
            ListId::InProgress => 1,
            ListId::Done => 2,
        }
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection_name())
    }
}

impl FromStr for ListId {
    type Err = crate::BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "backlog" | "todo" => Ok(ListId::Backlog),
            "inprogress" => Ok(ListId::InProgress),
            "done" => Ok(ListId::Done),
            _ => Err(crate::BoardError::InvalidArgument(format!(
                "Unknown list: {}",
                s
            ))),
        }
    }
}

/// A task as shown on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned identifier, absent until the first successful create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Task title, never empty for a stored task
    pub title: String,

    /// Free-form description, may be empty
    #[serde(default)]
    pub description: String,
}

/// The writable fields of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Partial update merged into an existing document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Task {
    /// Create a task that has not been stored yet
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Attach a server-assigned id (chainable)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The id if one has been assigned and is not blank
    pub fn stored_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Everything but the id, ready to be written to a document
    pub fn fields(&self) -> TaskFields {
        TaskFields {
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }

    /// Build a task from a stored document and its id
    pub fn from_document(id: &str, document: &Document) -> crate::Result<Self> {
        let fields: TaskFields = serde_json::from_value(serde_json::Value::Object(document.clone()))?;
        Ok(Self {
            id: Some(id.to_string()),
            title: fields.title,
            description: fields.description,
        })
    }
}

impl TaskFields {
    /// Create a new set of task fields
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// A blank title means the user submitted nothing
    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty()
    }

    /// Serialize into a store document
    pub fn to_document(&self) -> crate::Result<Document> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(crate::BoardError::InvalidArgument(format!(
                "Task fields did not serialize to an object: {}",
                other
            ))),
        }
    }
}

impl TaskPatch {
    /// Patch that replaces both title and description
    pub fn replace(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: Some(description.into()),
        }
    }

    /// Set only the title (chainable)
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set only the description (chainable)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True when the patch carries no fields
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }

    /// Serialize the present fields into a partial document
    pub fn to_document(&self) -> crate::Result<Document> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(crate::BoardError::InvalidArgument(format!(
                "Task patch did not serialize to an object: {}",
                other
            ))),
        }
    }
}

/// The two tasks a fresh board starts with
pub fn starter_tasks() -> Vec<TaskFields> {
    vec![
        TaskFields::new("Buy milk", "Go to the store and buy milk"),
        TaskFields::new(
            "Create a Kanban app",
            "Using a document store and async Rust create a Kanban app!",
        ),
    ]
}
