//! Change notification.
//!
//! Listeners register for a path and a [`DataChangeScope`]. After every
//! commit the candidate is walked together with the [`ListenerTree`]; each
//! listener whose path the commit touched receives one [`DataChangeEvent`]
//! describing the changes visible in its scope:
//!
//! * [`DataChangeScope::Base`] reports the node itself being created,
//!   replaced or removed,
//! * [`DataChangeScope::One`] additionally reports changes to its direct
//!   children,
//! * [`DataChangeScope::Subtree`] reports any change at or below the node.
//!
//! Registering below a keyed list or leaf-list with the bare list name as the
//! entry step, such as `/items/items`, matches every entry of that list.
//!
//! Events of one commit are delivered after the new root is published and
//! before the next commit's events, either on the committing thread or on a
//! dedicated notification thread, see [`DispatchMode`].

pub mod dispatch;
pub mod event;
mod resolve;
pub mod tree;

use std::fmt;

pub use dispatch::DispatchMode;
pub use event::DataChangeEvent;
pub(crate) use resolve::resolve_notifications;
pub use tree::{ListenerNodeRef, ListenerRegistration, ListenerTree, Walker};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataChangeScope {
    Base,
    One,
    Subtree,
}

impl DataChangeScope {
    pub const ALL: [DataChangeScope; 3] = [
        DataChangeScope::Base,
        DataChangeScope::One,
        DataChangeScope::Subtree,
    ];
}

impl fmt::Display for DataChangeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataChangeScope::Base => "base",
            DataChangeScope::One => "one",
            DataChangeScope::Subtree => "subtree",
        })
    }
}

pub trait DataChangeListener: Send + Sync {
    fn on_data_changed(&self, event: &DataChangeEvent);
}

impl<F> DataChangeListener for F
where
    F: Fn(&DataChangeEvent) + Send + Sync,
{
    fn on_data_changed(&self, event: &DataChangeEvent) {
        self(event)
    }
}
