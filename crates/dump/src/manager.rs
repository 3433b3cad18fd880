//! Intent manager: owns the set of intents, imposes a scheduling order, and
//! hands work out to the dump workers.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use docdump_core::{Error, IntentKind, Namespace, Result};
use tracing::trace;

use crate::intent::Intent;

/// How `finalize` orders the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizePolicy {
  /// Preserve insertion order.
  Legacy,
  /// Largest size hint first, ties broken by namespace. Reduces the chance
  /// of one enormous collection gating completion of the whole dump.
  LongestTaskFirst,
}

#[derive(Default)]
struct Inner {
  queue: VecDeque<Intent>,
  users: Option<Intent>,
  roles: Option<Intent>,
  auth_version: Option<Intent>,
  oplog: Option<Intent>,
  namespaces: HashSet<Namespace>,
  finalized: bool,
  completed: Vec<Namespace>,
}

/// Shared-mutable intent set. `add` is only legal before `finalize`; after
/// it the set is immutable and `pop`/`finish` are safe from any task.
///
/// Intents that must be serialized with the rest of the dump (users, roles,
/// auth version, oplog) never come out of `pop`; they are reachable only
/// through their named accessors.
#[derive(Default)]
pub struct IntentManager {
  inner: Mutex<Inner>,
}

impl IntentManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert an intent. Fails on duplicate namespaces, duplicate singleton
  /// kinds, and on a manager that is already finalized.
  pub fn add(&self, intent: Intent) -> Result<()> {
    let mut inner = self.inner.lock().unwrap();
    if inner.finalized {
      return Err(Error::Internal(format!(
        "cannot add intent for {} after finalization",
        intent.ns
      )));
    }
    if !inner.namespaces.insert(intent.ns.clone()) {
      return Err(Error::Internal(format!("duplicate intent for {}", intent.ns)));
    }
    trace!(ns = %intent.ns, kind = ?intent.kind, "queued intent");
    let slot = match intent.kind {
      IntentKind::Users => &mut inner.users,
      IntentKind::Roles => &mut inner.roles,
      IntentKind::AuthVersion => &mut inner.auth_version,
      IntentKind::Oplog => &mut inner.oplog,
      _ => {
        inner.queue.push_back(intent);
        return Ok(());
      }
    };
    if slot.is_some() {
      return Err(Error::Internal(format!(
        "duplicate {:?} intent ({})",
        intent.kind, intent.ns
      )));
    }
    *slot = Some(intent);
    Ok(())
  }

  /// Whether an intent for this namespace has been queued.
  pub fn contains(&self, ns: &Namespace) -> bool {
    self.inner.lock().unwrap().namespaces.contains(ns)
  }

  /// Fix the scheduling order. May be called exactly once.
  pub fn finalize(&self, policy: FinalizePolicy) -> Result<()> {
    let mut inner = self.inner.lock().unwrap();
    if inner.finalized {
      return Err(Error::Internal("intent manager finalized twice".to_string()));
    }
    if policy == FinalizePolicy::LongestTaskFirst {
      let mut intents: Vec<Intent> = inner.queue.drain(..).collect();
      intents.sort_by(|a, b| b.size_hint.cmp(&a.size_hint).then_with(|| a.ns.cmp(&b.ns)));
      inner.queue = intents.into();
    }
    inner.finalized = true;
    Ok(())
  }

  /// Next intent to dump, or `None` when the queue is drained.
  pub fn pop(&self) -> Option<Intent> {
    let mut inner = self.inner.lock().unwrap();
    debug_assert!(inner.finalized, "pop before finalize");
    inner.queue.pop_front()
  }

  /// Record that an intent's dump completed. Purely observational.
  pub fn finish(&self, ns: &Namespace) {
    let mut inner = self.inner.lock().unwrap();
    trace!(%ns, "intent complete");
    inner.completed.push(ns.clone());
  }

  /// Number of intents the worker pool will pop.
  pub fn collection_count(&self) -> usize {
    self.inner.lock().unwrap().queue.len()
  }

  pub fn completed_count(&self) -> usize {
    self.inner.lock().unwrap().completed.len()
  }

  pub fn users(&self) -> Option<Intent> {
    self.inner.lock().unwrap().users.clone()
  }

  pub fn roles(&self) -> Option<Intent> {
    self.inner.lock().unwrap().roles.clone()
  }

  pub fn auth_version(&self) -> Option<Intent> {
    self.inner.lock().unwrap().auth_version.clone()
  }

  pub fn oplog(&self) -> Option<Intent> {
    self.inner.lock().unwrap().oplog.clone()
  }

  /// Every intent in the manager: the queue in its current order, then the
  /// singletons. Used for the metadata phase and the archive manifest.
  pub fn all_intents(&self) -> Vec<Intent> {
    let inner = self.inner.lock().unwrap();
    let mut intents: Vec<Intent> = inner.queue.iter().cloned().collect();
    for special in [&inner.users, &inner.roles, &inner.auth_version, &inner.oplog] {
      if let Some(intent) = special {
        intents.push(intent.clone());
      }
    }
    intents
  }
}

#[cfg(test)]
mod tests {
  use docdump_core::IntentKind;
  use serde_json::Value;

  use super::*;

  fn collection_intent(db: &str, coll: &str, size: u64) -> Intent {
    Intent::collection(
      Namespace::new(db, coll).unwrap(),
      IntentKind::Regular,
      Value::Null,
      size,
      true,
    )
  }

  #[test]
  fn legacy_policy_preserves_insertion_order() {
    let manager = IntentManager::new();
    manager.add(collection_intent("db", "b", 10)).unwrap();
    manager.add(collection_intent("db", "a", 99)).unwrap();
    manager.finalize(FinalizePolicy::Legacy).unwrap();

    assert_eq!(manager.pop().unwrap().ns.collection, "b");
    assert_eq!(manager.pop().unwrap().ns.collection, "a");
    assert!(manager.pop().is_none());
  }

  #[test]
  fn longest_task_first_sorts_by_size_then_namespace() {
    let manager = IntentManager::new();
    manager.add(collection_intent("db", "small", 1)).unwrap();
    manager.add(collection_intent("db", "big", 1000)).unwrap();
    manager.add(collection_intent("db", "tie_b", 50)).unwrap();
    manager.add(collection_intent("db", "tie_a", 50)).unwrap();
    manager.finalize(FinalizePolicy::LongestTaskFirst).unwrap();

    let order: Vec<String> = std::iter::from_fn(|| manager.pop())
      .map(|i| i.ns.collection)
      .collect();
    assert_eq!(order, ["big", "tie_a", "tie_b", "small"]);
  }

  #[test]
  fn duplicate_namespace_is_rejected() {
    let manager = IntentManager::new();
    manager.add(collection_intent("db", "c", 0)).unwrap();
    let err = manager.add(collection_intent("db", "c", 0)).unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
  }

  #[test]
  fn double_finalize_is_rejected() {
    let manager = IntentManager::new();
    manager.finalize(FinalizePolicy::Legacy).unwrap();
    assert!(matches!(
      manager.finalize(FinalizePolicy::Legacy),
      Err(Error::Internal(_))
    ));
  }

  #[test]
  fn add_after_finalize_is_rejected() {
    let manager = IntentManager::new();
    manager.finalize(FinalizePolicy::Legacy).unwrap();
    assert!(manager.add(collection_intent("db", "c", 0)).is_err());
  }

  #[test]
  fn singletons_are_excluded_from_pop() {
    let manager = IntentManager::new();
    manager.add(collection_intent("db", "c", 0)).unwrap();
    manager
      .add(Intent::special(
        Namespace::new("local", "oplog").unwrap(),
        IntentKind::Oplog,
        0,
      ))
      .unwrap();
    manager
      .add(Intent::special(
        Namespace::new("admin", "system.users").unwrap(),
        IntentKind::Users,
        0,
      ))
      .unwrap();
    manager.finalize(FinalizePolicy::Legacy).unwrap();

    assert_eq!(manager.collection_count(), 1);
    assert_eq!(manager.pop().unwrap().ns.collection, "c");
    assert!(manager.pop().is_none());
    assert!(manager.oplog().is_some());
    assert!(manager.users().is_some());
    assert!(manager.roles().is_none());
  }

  #[test]
  fn duplicate_singleton_kind_is_rejected() {
    let manager = IntentManager::new();
    manager
      .add(Intent::special(
        Namespace::new("local", "oplog").unwrap(),
        IntentKind::Oplog,
        0,
      ))
      .unwrap();
    let err = manager
      .add(Intent::special(
        Namespace::new("local", "oplog.other").unwrap(),
        IntentKind::Oplog,
        0,
      ))
      .unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
  }

  #[test]
  fn concurrent_pop_hands_out_each_intent_once() {
    use std::sync::Arc;

    let manager = Arc::new(IntentManager::new());
    for i in 0..64 {
      manager.add(collection_intent("db", &format!("c{i}"), i)).unwrap();
    }
    manager.finalize(FinalizePolicy::LongestTaskFirst).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
      let manager = Arc::clone(&manager);
      handles.push(std::thread::spawn(move || {
        let mut seen = Vec::new();
        while let Some(intent) = manager.pop() {
          seen.push(intent.ns);
        }
        seen
      }));
    }

    let mut all: Vec<Namespace> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 64);
  }
}
