//! Components: the schedulable things a workflow or group contains.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::group::Group;
use crate::report::ComponentReport;
use crate::store::OutputStore;
use crate::unit::{UnitOfWork, UnitStatus};

/// Either a unit of work or a group of components.
///
/// Cloning is cheap and shares execution state.
#[derive(Clone)]
pub enum Component {
    /// A single task.
    Unit(Arc<UnitOfWork>),
    /// A nested group.
    Group(Arc<Group>),
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Unit(unit) => unit.fmt(f),
            Component::Group(group) => group.fmt(f),
        }
    }
}

impl From<UnitOfWork> for Component {
    fn from(unit: UnitOfWork) -> Self {
        Component::Unit(Arc::new(unit))
    }
}

impl From<Group> for Component {
    fn from(group: Group) -> Self {
        Component::Group(Arc::new(group))
    }
}

impl From<Arc<UnitOfWork>> for Component {
    fn from(unit: Arc<UnitOfWork>) -> Self {
        Component::Unit(unit)
    }
}

impl From<Arc<Group>> for Component {
    fn from(group: Arc<Group>) -> Self {
        Component::Group(group)
    }
}

impl Component {
    /// Unique id.
    pub fn id(&self) -> Uuid {
        match self {
            Component::Unit(unit) => unit.id(),
            Component::Group(group) => group.id(),
        }
    }

    /// Name.
    pub fn name(&self) -> &str {
        match self {
            Component::Unit(unit) => unit.name(),
            Component::Group(group) => group.name(),
        }
    }

    /// Description.
    pub fn description(&self) -> &str {
        match self {
            Component::Unit(unit) => unit.description(),
            Component::Group(group) => group.description(),
        }
    }

    /// Current status; derived from the children for groups.
    pub fn status(&self) -> UnitStatus {
        match self {
            Component::Unit(unit) => unit.status(),
            Component::Group(group) => group.status(),
        }
    }

    /// Returns the unit if this component is one.
    pub fn as_unit(&self) -> Option<&Arc<UnitOfWork>> {
        match self {
            Component::Unit(unit) => Some(unit),
            Component::Group(_) => None,
        }
    }

    /// Returns the group if this component is one.
    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            Component::Group(group) => Some(group),
            Component::Unit(_) => None,
        }
    }

    /// Calls `visit` on this component and every descendant, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Component)) {
        visit(self);
        if let Component::Group(group) = self {
            for child in group.components() {
                child.walk(visit);
            }
        }
    }

    /// Reverts this component and its descendants to `Pending`.
    pub fn reset(&self) {
        match self {
            Component::Unit(unit) => unit.reset(),
            Component::Group(group) => group.reset(),
        }
    }

    /// Builds the read-only report of this component.
    pub fn report(&self) -> ComponentReport {
        match self {
            Component::Unit(unit) => ComponentReport::for_unit(unit),
            Component::Group(group) => ComponentReport::for_group(group),
        }
    }

    /// Executes the component against `store`, observing `token`.
    pub(crate) fn execute<'a>(
        &'a self,
        store: &'a OutputStore,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        match self {
            Component::Unit(unit) => Box::pin(unit.execute(store, token)),
            Component::Group(group) => Box::pin(group.execute(store, token)),
        }
    }
}
