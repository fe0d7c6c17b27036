//! Intents and the selectable menu.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a selected option is escalated downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    /// An everyday need (food, water, ...).
    Need,
    /// A request for help, escalated like an emergency.
    Alert,
}

/// One entry of the menu the cursor moves through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    /// Text shown on the dashboard and sent downstream.
    pub label: String,
    /// Escalation kind.
    pub kind: OptionKind,
}

impl MenuOption {
    /// Create a menu option.
    #[must_use]
    pub fn new(label: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            label: label.into(),
            kind,
        }
    }
}

/// A discrete user action resolved from a blink count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Intent {
    /// Move the cursor; `cursor` is its new position.
    Navigate {
        /// Cursor position after the move.
        cursor: usize,
    },
    /// Choose the option under the cursor.
    Select {
        /// Index of the chosen option.
        index: usize,
    },
    /// Raise an emergency.
    Emergency,
}

impl Intent {
    /// Whether this intent is forwarded to the downstream workflow.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self, Self::Navigate { .. })
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Navigate { cursor } => write!(f, "navigate({cursor})"),
            Self::Select { index } => write!(f, "select({index})"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// An intent emitted for a device, with the option it refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretedIntent {
    /// Device whose blinks produced the intent.
    pub device_id: String,
    /// The resolved intent.
    pub intent: Intent,
    /// Option under the cursor after a navigate, or the selected option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option: Option<MenuOption>,
    /// When the intent was resolved.
    pub at: DateTime<Utc>,
}
