//! Named resources shared by the steps of a recipe, and run traces.
//!
//! A resource is anything several steps need to reuse, such as a database
//! pool or an API client. It is declared once with
//! [`DeclareResource`](crate::steps::base::DeclareResource) (or
//! [`Scope::provide`](crate::Scope::provide)), looked up by name and type,
//! and closed when the recipe finishes baking.

use crate::error::StepError;
use crate::step::StepName;
use async_trait::async_trait;
use serde::Serialize;
use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// A connectable resource shared between steps.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use batter::{Resource, StepError};
///
/// #[derive(Debug)]
/// struct Pool {
///     url: String,
/// }
///
/// #[async_trait]
/// impl Resource for Pool {
///     async fn close(&self) -> Result<(), StepError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Resource: Send + Sync + Debug {
    /// Releases the resource. Called once, when the recipe finishes baking.
    async fn close(&self) -> Result<(), StepError> {
        Ok(())
    }
}

/// A resource with its concrete type erased.
#[derive(Clone)]
pub(crate) struct ResourceHandle {
    resource: Arc<dyn Resource>,
    typed: Arc<dyn Any + Send + Sync>,
}

impl ResourceHandle {
    pub(crate) fn new<R: Resource + 'static>(resource: R) -> Self {
        let shared = Arc::new(resource);
        Self {
            resource: shared.clone(),
            typed: shared,
        }
    }

    pub(crate) fn downcast<R: Resource + 'static>(&self) -> Option<Arc<R>> {
        self.typed.clone().downcast::<R>().ok()
    }

    pub(crate) async fn close(&self) -> Result<(), StepError> {
        self.resource.close().await
    }
}

impl Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.resource, f)
    }
}

/// Registry of the resources declared during a run, in declaration order.
#[derive(Clone, Default)]
pub struct Resources {
    entries: Vec<(String, ResourceHandle)>,
}

impl Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Resources {
    /// The resource named `name`, if one was declared with type `R`.
    pub fn get<R: Resource + 'static>(&self, name: &str) -> Option<Arc<R>> {
        self.handle(name)?.downcast()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handle(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds a resource. Returns `false`, leaving the registry untouched, when
    /// the name is taken.
    pub(crate) fn insert(&mut self, name: String, handle: ResourceHandle) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, handle));
        true
    }

    pub(crate) fn drain(&mut self) -> Vec<(String, ResourceHandle)> {
        std::mem::take(&mut self.entries)
    }

    fn handle(&self, name: &str) -> Option<&ResourceHandle> {
        self.entries
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, handle)| handle)
    }
}

/// Severity of a [`TraceEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Debug,
    #[default]
    Info,
    Warn,
}

/// A line a step asked to have reported with the run result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub level: TraceLevel,
    /// The step that recorded the entry.
    pub step: Option<StepName>,
    pub message: String,
}

impl TraceEntry {
    pub fn new(level: TraceLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            step: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "{}: {}", step, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct Pool {
        closed: AtomicBool,
    }

    #[async_trait]
    impl Resource for Pool {
        async fn close(&self) -> Result<(), StepError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Client;

    impl Resource for Client {}

    #[test]
    fn test_lookup_by_name_and_type() {
        let mut resources = Resources::default();
        assert!(resources.insert("db".to_string(), ResourceHandle::new(Pool::default())));
        assert!(resources.insert("api".to_string(), ResourceHandle::new(Client)));

        assert!(resources.get::<Pool>("db").is_some());
        assert!(resources.get::<Client>("db").is_none());
        assert!(resources.get::<Pool>("cache").is_none());
        assert_eq!(resources.names().collect::<Vec<_>>(), vec!["db", "api"]);
    }

    #[test]
    fn test_duplicate_name_is_refused() {
        let mut resources = Resources::default();
        assert!(resources.insert("db".to_string(), ResourceHandle::new(Client)));
        assert!(!resources.insert("db".to_string(), ResourceHandle::new(Pool::default())));
        assert_eq!(resources.len(), 1);
        assert!(resources.get::<Client>("db").is_some());
    }

    #[tokio::test]
    async fn test_close_reaches_the_shared_instance() {
        let handle = ResourceHandle::new(Pool::default());
        let pool = handle.downcast::<Pool>().unwrap();

        handle.close().await.unwrap();
        assert!(pool.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_trace_display() {
        let mut entry = TraceEntry::new(TraceLevel::Info, "connected");
        assert_eq!(entry.to_string(), "connected");
        entry.step = Some(StepName::new("Connect"));
        assert_eq!(entry.to_string(), "Connect: connected");
    }
}
