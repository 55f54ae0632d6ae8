use crate::store::UpdateRecord;

/// Decides which updates are worth loading and launching.
pub trait SelectionPolicy: Send + Sync {
    /// Whether `candidate` should replace the currently `launched` update.
    fn should_load_new_update(&self, candidate: &UpdateRecord, launched: &UpdateRecord) -> bool;

    /// Pick the update to launch among those in the store.
    fn select_update_to_launch<'a>(&self, updates: &'a [UpdateRecord]) -> Option<&'a UpdateRecord>;
}

/// Prefers the most recently committed update built for the running runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicyNewest {
    runtime_version: String,
}

impl SelectionPolicyNewest {
    pub fn new(runtime_version: impl Into<String>) -> Self {
        Self {
            runtime_version: runtime_version.into(),
        }
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    fn is_compatible(&self, update: &UpdateRecord) -> bool {
        update.runtime_version == self.runtime_version
    }
}

impl SelectionPolicy for SelectionPolicyNewest {
    fn should_load_new_update(&self, candidate: &UpdateRecord, launched: &UpdateRecord) -> bool {
        self.is_compatible(candidate) && candidate.commit_time > launched.commit_time
    }

    fn select_update_to_launch<'a>(&self, updates: &'a [UpdateRecord]) -> Option<&'a UpdateRecord> {
        updates
            .iter()
            .filter(|update| update.is_ready() && self.is_compatible(update))
            .max_by_key(|update| update.commit_time)
    }
}

/// Whether a verified candidate should be adopted.
///
/// With nothing launched there is no baseline to compare against, so any
/// candidate is adopted. Both the check and the fetch path go through here.
pub fn should_adopt(
    policy: &dyn SelectionPolicy,
    candidate: &UpdateRecord,
    launched: Option<&UpdateRecord>,
) -> bool {
    match launched {
        None => true,
        Some(launched) => policy.should_load_new_update(candidate, launched),
    }
}
