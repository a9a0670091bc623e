// Breakpoint and watchpoint registry
//
// Owns every breakpoint of the session. Each breakpoint lives once in the id
// map and is referenced by id from exactly one lookup index (file+line, call
// name, return name or watched property) so hits resolve in O(1).
// All operations run under a single mutex: the interpreter thread reads
// while command workers write.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use crate::protocol::{DbgpError, DbgpResult};
use crate::types::{BreakpointId, BreakpointKind, BreakpointState, HitCondition, LineKey};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakpoint {
    /// Assigned by the registry on insertion
    pub id: BreakpointId,
    pub kind: BreakpointKind,
    pub state: BreakpointState,
    pub file: String,
    pub line: u32,
    /// Fully qualified function name for call/return breakpoints
    pub function: Option<String>,
    /// Exception name for exception breakpoints, `None` matches any
    pub exception: Option<String>,
    pub temporary: bool,
    pub hit_value: u32,
    pub hit_condition: Option<HitCondition>,
    pub hit_count: u32,
    /// Guard expression, or the watched property for watchpoints
    pub expression: Option<String>,
    pub break_on_access: bool,
    pub break_on_modification: bool,
}

impl Breakpoint {
    pub fn new(kind: BreakpointKind) -> Self {
        Self {
            id: BreakpointId(0),
            kind,
            state: BreakpointState::Enabled,
            file: String::new(),
            line: 0,
            function: None,
            exception: None,
            temporary: false,
            hit_value: 0,
            hit_condition: None,
            hit_count: 0,
            expression: None,
            break_on_access: false,
            break_on_modification: false,
        }
    }

    pub fn line(file: impl Into<String>, line: u32) -> Self {
        let mut bp = Self::new(BreakpointKind::Line);
        bp.file = file.into();
        bp.line = line;
        bp
    }

    pub fn call(function: impl Into<String>) -> Self {
        let mut bp = Self::new(BreakpointKind::Call);
        bp.function = Some(function.into());
        bp
    }

    pub fn function_return(function: impl Into<String>) -> Self {
        let mut bp = Self::new(BreakpointKind::Return);
        bp.function = Some(function.into());
        bp
    }

    pub fn watch(
        property: impl Into<String>,
        file: impl Into<String>,
        line: u32,
        access: bool,
        modification: bool,
    ) -> Self {
        let mut bp = Self::new(BreakpointKind::Watch);
        bp.expression = Some(property.into());
        bp.file = file.into();
        bp.line = line;
        bp.break_on_access = access;
        bp.break_on_modification = modification;
        bp
    }

    pub fn is_enabled(&self) -> bool {
        self.state == BreakpointState::Enabled
    }

    pub fn line_key(&self) -> LineKey {
        LineKey::new(self.file.clone(), self.line)
    }

    /// Property watched by a watchpoint
    pub fn watched_property(&self) -> Option<&str> {
        match self.kind {
            BreakpointKind::Watch => self.expression.as_deref(),
            _ => None,
        }
    }

    /// Guard expression evaluated on hit (never the watched property)
    pub fn guard(&self) -> Option<&str> {
        match self.kind {
            BreakpointKind::Watch => None,
            _ => self.expression.as_deref().filter(|expr| !expr.trim().is_empty()),
        }
    }

    fn validate(&self) -> DbgpResult<()> {
        if self.hit_condition == Some(HitCondition::Multiple) && self.hit_value == 0 {
            return Err(DbgpError::InvalidHitCondition("%0".to_string()));
        }
        Ok(())
    }

    /// Count a hit and apply the hit policy
    fn register_hit(&mut self) -> bool {
        self.hit_count = self.hit_count.saturating_add(1);
        match self.hit_condition {
            Some(condition) => condition.is_met(self.hit_value, self.hit_count),
            None => true,
        }
    }
}

/// Changes applied by `breakpoint_update`; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct BreakpointUpdate {
    pub state: Option<BreakpointState>,
    pub line: Option<u32>,
    pub hit_value: Option<u32>,
    pub hit_condition: Option<HitCondition>,
    pub expression: Option<String>,
    /// (access, modification) flags for watchpoints
    pub watch_flags: Option<(bool, bool)>,
}

/// Session-wide suspend switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuspendFlags {
    pub on_entry: bool,
    pub on_exit: bool,
    pub on_exception: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    by_id: HashMap<BreakpointId, Breakpoint>,
    lines: HashMap<LineKey, BreakpointId>,
    calls: HashMap<String, BreakpointId>,
    returns: HashMap<String, BreakpointId>,
    watches: HashMap<String, Vec<BreakpointId>>,
    flags: SuspendFlags,
}

impl RegistryState {
    fn index(&mut self, bp: &Breakpoint) {
        let displaced = match bp.kind {
            BreakpointKind::Line | BreakpointKind::Conditional => {
                self.lines.insert(bp.line_key(), bp.id)
            }
            BreakpointKind::Call => bp
                .function
                .clone()
                .and_then(|name| self.calls.insert(name, bp.id)),
            BreakpointKind::Return => bp
                .function
                .clone()
                .and_then(|name| self.returns.insert(name, bp.id)),
            BreakpointKind::Watch => {
                if let Some(property) = bp.watched_property() {
                    self.watches
                        .entry(property.to_string())
                        .or_default()
                        .push(bp.id);
                }
                None
            }
            BreakpointKind::Exception => {
                self.flags.on_exception = true;
                None
            }
        };

        // last write wins: the displaced breakpoint is gone entirely
        if let Some(old) = displaced.filter(|old| *old != bp.id) {
            debug!("Breakpoint {} replaced by {}", old, bp.id);
            self.by_id.remove(&old);
        }
    }

    fn unindex(&mut self, bp: &Breakpoint) {
        match bp.kind {
            BreakpointKind::Line | BreakpointKind::Conditional => {
                let key = bp.line_key();
                if self.lines.get(&key) == Some(&bp.id) {
                    self.lines.remove(&key);
                }
            }
            BreakpointKind::Call => {
                if let Some(name) = &bp.function {
                    if self.calls.get(name) == Some(&bp.id) {
                        self.calls.remove(name);
                    }
                }
            }
            BreakpointKind::Return => {
                if let Some(name) = &bp.function {
                    if self.returns.get(name) == Some(&bp.id) {
                        self.returns.remove(name);
                    }
                }
            }
            BreakpointKind::Watch => {
                if let Some(property) = bp.watched_property() {
                    if let Some(list) = self.watches.get_mut(property) {
                        list.retain(|id| *id != bp.id);
                        if list.is_empty() {
                            self.watches.remove(property);
                        }
                    }
                }
            }
            BreakpointKind::Exception => {
                let others = self
                    .by_id
                    .values()
                    .any(|other| other.kind == BreakpointKind::Exception && other.id != bp.id);
                if !others {
                    self.flags.on_exception = false;
                }
            }
        }
    }

    /// Shared hit path for line/call/return lookups
    fn hit(&mut self, id: Option<BreakpointId>) -> Option<Breakpoint> {
        let id = id?;
        let bp = self.by_id.get_mut(&id)?;
        if !bp.is_enabled() || !bp.register_hit() {
            return None;
        }
        let fired = bp.clone();
        if fired.temporary {
            // at most once: the breakpoint leaves every index in the same call
            self.unindex(&fired);
            self.by_id.remove(&id);
        }
        Some(fired)
    }
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    state: Mutex<RegistryState>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breakpoint and return its freshly assigned id
    pub fn add(&self, mut breakpoint: Breakpoint) -> DbgpResult<BreakpointId> {
        breakpoint.validate()?;

        let mut state = self.state.lock();
        state.next_id += 1;
        breakpoint.id = BreakpointId(state.next_id);
        breakpoint.hit_count = 0;

        let id = breakpoint.id;
        debug!("Adding {} breakpoint {}", breakpoint.kind.as_str(), id);
        state.index(&breakpoint);
        state.by_id.insert(id, breakpoint);
        Ok(id)
    }

    pub fn remove(&self, id: BreakpointId) -> DbgpResult<Breakpoint> {
        let mut state = self.state.lock();
        let bp = state
            .by_id
            .remove(&id)
            .ok_or_else(|| DbgpError::BreakpointNotFound(id.to_string()))?;
        state.unindex(&bp);
        debug!("Removed breakpoint {}", id);
        Ok(bp)
    }

    pub fn update(&self, id: BreakpointId, update: BreakpointUpdate) -> DbgpResult<Breakpoint> {
        let mut state = self.state.lock();
        let mut bp = state
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| DbgpError::BreakpointNotFound(id.to_string()))?;

        let mut candidate = bp.clone();
        if let Some(hit_value) = update.hit_value {
            candidate.hit_value = hit_value;
        }
        if let Some(condition) = update.hit_condition {
            candidate.hit_condition = Some(condition);
        }
        candidate.validate()?;

        if let Some(new_state) = update.state {
            bp.state = new_state;
        }
        bp.hit_value = candidate.hit_value;
        bp.hit_condition = candidate.hit_condition;

        if let Some(new_line) = update.line.filter(|_| bp.kind.is_line()) {
            let old_key = bp.line_key();
            let indexed = state.lines.get(&old_key).copied();
            match indexed {
                Some(indexed) if indexed == id => {
                    state.lines.remove(&old_key);
                    bp.line = new_line;
                    state.index(&bp);
                }
                other => {
                    error!(
                        "Breakpoint index mismatch for {} at {}: indexed {:?}",
                        id, old_key, other
                    );
                }
            }
        }

        if bp.kind == BreakpointKind::Watch {
            if let Some((access, modification)) = update.watch_flags {
                bp.break_on_access = access;
                bp.break_on_modification = modification;
            }
            // Re-indexing moves the watch to the back of its list
            let moved = update
                .expression
                .filter(|expression| bp.expression.as_ref() != Some(expression));
            if let Some(expression) = moved {
                state.unindex(&bp);
                bp.expression = Some(expression);
                state.index(&bp);
            }
        } else if let Some(expression) = update.expression {
            bp.expression = Some(expression);
        }

        state.by_id.insert(id, bp.clone());
        Ok(bp)
    }

    pub fn get(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.state.lock().by_id.get(&id).cloned()
    }

    /// All breakpoints ordered by id
    pub fn list(&self) -> Vec<Breakpoint> {
        let state = self.state.lock();
        let mut all: Vec<Breakpoint> = state.by_id.values().cloned().collect();
        all.sort_by_key(|bp| bp.id);
        all
    }

    /// Evaluate a line boundary. Called for every executed line.
    pub fn hit_line(&self, file: &str, line: u32) -> Option<Breakpoint> {
        let mut state = self.state.lock();
        let id = state.lines.get(&LineKey::new(file, line)).copied();
        state.hit(id)
    }

    pub fn hit_call(&self, function: &str) -> Option<Breakpoint> {
        let mut state = self.state.lock();
        let id = state.calls.get(function).copied();
        state.hit(id)
    }

    pub fn hit_return(&self, function: &str) -> Option<Breakpoint> {
        let mut state = self.state.lock();
        let id = state.returns.get(function).copied();
        state.hit(id)
    }

    /// Enabled exception breakpoint matching `name`, if any
    pub fn hit_exception(&self, name: &str) -> Option<Breakpoint> {
        let mut state = self.state.lock();
        let id = state
            .by_id
            .values()
            .filter(|bp| bp.kind == BreakpointKind::Exception && bp.is_enabled())
            .filter(|bp| match bp.exception.as_deref() {
                None | Some("") | Some("*") => true,
                Some(expected) => expected == name,
            })
            .map(|bp| bp.id)
            .min();
        state.hit(id)
    }

    pub fn has_exception_breakpoints(&self) -> bool {
        self.state
            .lock()
            .by_id
            .values()
            .any(|bp| bp.kind == BreakpointKind::Exception)
    }

    /// Watchpoints registered for a property, in registration order
    pub fn watchers_of(&self, property: &str) -> Vec<Breakpoint> {
        let state = self.state.lock();
        state
            .watches
            .get(property)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn suspend_flags(&self) -> SuspendFlags {
        self.state.lock().flags
    }

    pub fn set_suspend_on_entry(&self, value: bool) {
        self.state.lock().flags.on_entry = value;
    }

    pub fn set_suspend_on_exit(&self, value: bool) {
        self.state.lock().flags.on_exit = value;
    }

    pub fn set_suspend_on_exception(&self, value: bool) {
        self.state.lock().flags.on_exception = value;
    }

    /// Drop every breakpoint and reset the suspend switches
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        let next_id = state.next_id;
        *state = RegistryState {
            next_id,
            ..RegistryState::default()
        };
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_policy(mut bp: Breakpoint, condition: HitCondition, value: u32) -> Breakpoint {
        bp.hit_condition = Some(condition);
        bp.hit_value = value;
        bp
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = BreakpointRegistry::new();
        let first = registry.add(Breakpoint::line("/a.js", 1)).unwrap();
        let second = registry.add(Breakpoint::line("/a.js", 2)).unwrap();

        assert_eq!(first, BreakpointId(1));
        assert_eq!(second, BreakpointId(2));
        assert_eq!(registry.get(first).unwrap().line, 1);
    }

    #[test]
    fn test_hit_line_lookup() {
        let registry = BreakpointRegistry::new();
        let id = registry.add(Breakpoint::line("/a.js", 3)).unwrap();

        assert!(registry.hit_line("/a.js", 2).is_none());
        assert!(registry.hit_line("/b.js", 3).is_none());

        let hit = registry.hit_line("/a.js", 3).unwrap();
        assert_eq!(hit.id, id);
        assert_eq!(hit.hit_count, 1);
    }

    #[test]
    fn test_at_least_policy() {
        let registry = BreakpointRegistry::new();
        registry
            .add(with_policy(Breakpoint::line("/a.js", 3), HitCondition::AtLeast, 3))
            .unwrap();

        assert!(registry.hit_line("/a.js", 3).is_none());
        assert!(registry.hit_line("/a.js", 3).is_none());
        assert!(registry.hit_line("/a.js", 3).is_some());
        assert!(registry.hit_line("/a.js", 3).is_some());
    }

    #[test]
    fn test_equal_policy() {
        let registry = BreakpointRegistry::new();
        registry
            .add(with_policy(Breakpoint::line("/a.js", 3), HitCondition::Equal, 2))
            .unwrap();

        let fired: Vec<bool> = (0..4).map(|_| registry.hit_line("/a.js", 3).is_some()).collect();
        assert_eq!(fired, vec![false, true, false, false]);
    }

    #[test]
    fn test_modulo_policy_fires_on_multiples() {
        let registry = BreakpointRegistry::new();
        registry
            .add(with_policy(Breakpoint::line("/a.js", 3), HitCondition::Multiple, 3))
            .unwrap();

        for count in 1..=12u32 {
            let fired = registry.hit_line("/a.js", 3).is_some();
            assert_eq!(fired, count % 3 == 0, "hit {}", count);
        }
    }

    #[test]
    fn test_modulo_zero_is_rejected() {
        let registry = BreakpointRegistry::new();
        let result = registry.add(with_policy(
            Breakpoint::line("/a.js", 3),
            HitCondition::Multiple,
            0,
        ));
        assert!(matches!(result, Err(DbgpError::InvalidHitCondition(_))));

        let id = registry.add(Breakpoint::line("/a.js", 4)).unwrap();
        let update = BreakpointUpdate {
            hit_condition: Some(HitCondition::Multiple),
            hit_value: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            registry.update(id, update),
            Err(DbgpError::InvalidHitCondition(_))
        ));
        // rejected update leaves the breakpoint untouched
        assert_eq!(registry.get(id).unwrap().hit_condition, None);
    }

    #[test]
    fn test_temporary_fires_once() {
        let registry = BreakpointRegistry::new();
        let mut bp = Breakpoint::line("/a.js", 5);
        bp.temporary = true;
        let id = registry.add(bp).unwrap();

        assert!(registry.hit_line("/a.js", 5).is_some());
        for _ in 0..3 {
            assert!(registry.hit_line("/a.js", 5).is_none());
        }
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_disabled_breakpoints_do_not_count() {
        let registry = BreakpointRegistry::new();
        let mut bp = Breakpoint::line("/a.js", 5);
        bp.state = BreakpointState::Disabled;
        let id = registry.add(bp).unwrap();

        assert!(registry.hit_line("/a.js", 5).is_none());
        assert_eq!(registry.get(id).unwrap().hit_count, 0);
    }

    #[test]
    fn test_update_reindexes_line() {
        let registry = BreakpointRegistry::new();
        let id = registry.add(Breakpoint::line("/a.js", 3)).unwrap();

        let update = BreakpointUpdate {
            line: Some(8),
            ..Default::default()
        };
        registry.update(id, update).unwrap();

        assert!(registry.hit_line("/a.js", 3).is_none());
        assert_eq!(registry.hit_line("/a.js", 8).unwrap().id, id);
    }

    #[test]
    fn test_update_state_and_expression() {
        let registry = BreakpointRegistry::new();
        let id = registry.add(Breakpoint::line("/a.js", 3)).unwrap();

        let updated = registry
            .update(
                id,
                BreakpointUpdate {
                    state: Some(BreakpointState::Disabled),
                    expression: Some("x > 1".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(!updated.is_enabled());
        assert_eq!(updated.guard(), Some("x > 1"));
        assert!(registry.hit_line("/a.js", 3).is_none());
    }

    #[test]
    fn test_update_unknown_id() {
        let registry = BreakpointRegistry::new();
        assert!(matches!(
            registry.update(BreakpointId(42), BreakpointUpdate::default()),
            Err(DbgpError::BreakpointNotFound(_))
        ));
    }

    #[test]
    fn test_last_write_wins_per_line() {
        let registry = BreakpointRegistry::new();
        let first = registry.add(Breakpoint::line("/a.js", 3)).unwrap();
        let second = registry.add(Breakpoint::line("/a.js", 3)).unwrap();

        assert!(registry.get(first).is_none());
        assert_eq!(registry.hit_line("/a.js", 3).unwrap().id, second);
    }

    #[test]
    fn test_call_and_return_lookup() {
        let registry = BreakpointRegistry::new();
        let call = registry.add(Breakpoint::call("app.main")).unwrap();
        let ret = registry.add(Breakpoint::function_return("app.main")).unwrap();

        assert_eq!(registry.hit_call("app.main").unwrap().id, call);
        assert_eq!(registry.hit_return("app.main").unwrap().id, ret);
        assert!(registry.hit_call("app.other").is_none());

        registry.remove(call).unwrap();
        assert!(registry.hit_call("app.main").is_none());
        assert!(registry.hit_return("app.main").is_some());
    }

    #[test]
    fn test_watchers_accumulate_in_order() {
        let registry = BreakpointRegistry::new();
        let access = registry
            .add(Breakpoint::watch("x", "/a.js", 4, true, false))
            .unwrap();
        let modification = registry
            .add(Breakpoint::watch("x", "/a.js", 4, false, true))
            .unwrap();

        let ids: Vec<BreakpointId> = registry.watchers_of("x").iter().map(|bp| bp.id).collect();
        assert_eq!(ids, vec![access, modification]);

        registry.remove(access).unwrap();
        let ids: Vec<BreakpointId> = registry.watchers_of("x").iter().map(|bp| bp.id).collect();
        assert_eq!(ids, vec![modification]);
        assert!(registry.watchers_of("y").is_empty());
    }

    #[test]
    fn test_watch_update_moves_property() {
        let registry = BreakpointRegistry::new();
        let id = registry
            .add(Breakpoint::watch("x", "/a.js", 4, true, false))
            .unwrap();

        registry
            .update(
                id,
                BreakpointUpdate {
                    expression: Some("y".to_string()),
                    watch_flags: Some((false, true)),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(registry.watchers_of("x").is_empty());
        let moved = registry.watchers_of("y");
        assert_eq!(moved.len(), 1);
        assert!(moved[0].break_on_modification);
        assert!(!moved[0].break_on_access);
    }

    #[test]
    fn test_watch_flag_update_keeps_order() {
        let registry = BreakpointRegistry::new();
        let first = registry
            .add(Breakpoint::watch("x", "/a.js", 4, true, false))
            .unwrap();
        let second = registry
            .add(Breakpoint::watch("x", "/a.js", 4, true, false))
            .unwrap();

        registry
            .update(
                first,
                BreakpointUpdate {
                    watch_flags: Some((false, true)),
                    ..Default::default()
                },
            )
            .unwrap();
        registry
            .update(
                first,
                BreakpointUpdate {
                    expression: Some("x".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let watchers = registry.watchers_of("x");
        let ids: Vec<BreakpointId> = watchers.iter().map(|bp| bp.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(watchers[0].break_on_modification);
        assert!(!watchers[0].break_on_access);
    }

    #[test]
    fn test_exception_breakpoints_drive_flag() {
        let registry = BreakpointRegistry::new();
        let mut bp = Breakpoint::new(BreakpointKind::Exception);
        bp.exception = Some("TypeError".to_string());
        let id = registry.add(bp).unwrap();

        assert!(registry.suspend_flags().on_exception);
        assert!(registry.hit_exception("TypeError").is_some());
        assert!(registry.hit_exception("RangeError").is_none());

        registry.remove(id).unwrap();
        assert!(!registry.suspend_flags().on_exception);
    }

    #[test]
    fn test_clear_all() {
        let registry = BreakpointRegistry::new();
        let line = registry.add(Breakpoint::line("/a.js", 3)).unwrap();
        let call = registry.add(Breakpoint::call("f")).unwrap();
        let ret = registry.add(Breakpoint::function_return("f")).unwrap();
        let watch = registry
            .add(Breakpoint::watch("x", "/a.js", 3, true, true))
            .unwrap();
        registry.set_suspend_on_entry(true);

        registry.clear_all();

        for id in [line, call, ret, watch] {
            assert!(registry.get(id).is_none());
            assert!(matches!(registry.remove(id), Err(DbgpError::BreakpointNotFound(_))));
        }
        assert!(registry.hit_line("/a.js", 3).is_none());
        assert!(registry.hit_call("f").is_none());
        assert!(registry.hit_return("f").is_none());
        assert!(registry.watchers_of("x").is_empty());
        assert_eq!(registry.suspend_flags(), SuspendFlags::default());
        assert!(registry.is_empty());

        // ids keep counting after a clear
        let next = registry.add(Breakpoint::line("/a.js", 3)).unwrap();
        assert!(next > watch);
    }
}
