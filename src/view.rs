//! Presentation-facing contract: the active tab and the events the
//! controller publishes for whatever renders its state.

use crate::types::User;

/// Panels the view can show.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tab {
    #[default]
    Messages,
    AllUsers,
}

impl Tab {
    /// Resolve a tab from its view name. Anything but `allUsers` selects the
    /// message feed.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "allUsers" | "all_users" => Self::AllUsers,
            _ => Self::Messages,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::AllUsers => "allUsers",
        }
    }
}

/// State changes the presentation layer reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewEvent {
    TabSelected(Tab),
    /// A session is active; the view should mark the user as identified.
    Identified(User),
    SessionCleared,
    MessagesUpdated { count: usize },
    UsersUpdated { count: usize },
    MessageSent,
    AutoUpdateChanged(bool),
    /// Synchronous feedback on rejected input.
    Alert(String),
    /// Persistent notice, e.g. polling stopped for good.
    Notice(String),
}

#[cfg(test)]
#[path = "view_test.rs"]
mod view_test;
