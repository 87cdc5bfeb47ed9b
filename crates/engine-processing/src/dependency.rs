use model::core::identifiers::DependencyKey;
use std::collections::HashSet;

/// Answers whether a dependency a task is gated on is present.
pub trait DependencyResolver: Send + Sync {
    fn is_satisfied(&self, key: &DependencyKey) -> bool;
}

/// Fixed set of satisfied dependencies, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticDependencies {
    satisfied: HashSet<DependencyKey>,
}

impl StaticDependencies {
    pub fn new<I>(satisfied: I) -> Self
    where
        I: IntoIterator<Item = DependencyKey>,
    {
        Self {
            satisfied: satisfied.into_iter().collect(),
        }
    }
}

impl DependencyResolver for StaticDependencies {
    fn is_satisfied(&self, key: &DependencyKey) -> bool {
        self.satisfied.contains(key)
    }
}
