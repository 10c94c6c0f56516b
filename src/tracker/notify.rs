//! Freeze/thaw and change notification.
//!
//! A frozen project still accepts mutations but skips recomputing its totals and notifying its
//! listeners; thawing replays both once. There is no freeze depth: the first thaw after any
//! number of freezes unfreezes the project.

use tracing::{debug, trace, warn};

use super::{Forest, IntervalKey, ProjectKey, TaskKey};

/// Token returned on registration, used to unregister a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked after a project changed. It receives the forest mutably, so a listener may
/// itself edit the tracker. Notifications raised for the same project while its listeners are
/// running are folded into the one being delivered.
pub type Listener = Box<dyn FnMut(&mut Forest, ProjectKey)>;

pub(crate) struct ListenerEntry {
    pub(crate) id: ListenerId,
    pub(crate) callback: Listener,
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ListenerEntry").field(&self.id).finish()
    }
}

impl Forest {
    /// Registers `callback` to be told about changes of `project`. Listeners run in
    /// registration order. Registering the same closure twice yields two registrations.
    pub fn add_listener(
        &mut self,
        project: ProjectKey,
        callback: impl FnMut(&mut Forest, ProjectKey) + 'static,
    ) -> Option<ListenerId> {
        let id = ListenerId(self.next_listener);
        let Some(p) = self.projects.get_mut(project) else {
            warn!("Can't add a listener to missing project {project:?}");
            return None;
        };
        self.next_listener += 1;
        p.listeners.push(ListenerEntry {
            id,
            callback: Box::new(callback),
        });
        Some(id)
    }

    /// Returns false when no such registration exists.
    pub fn remove_listener(&mut self, project: ProjectKey, id: ListenerId) -> bool {
        let Some(p) = self.projects.get_mut(project) else {
            return false;
        };
        if let Some(pos) = p.listeners.iter().position(|v| v.id == id) {
            p.listeners.remove(pos);
            return true;
        }
        // The listener may be running right now, in which case it's parked outside the project.
        let in_flight = p.dispatching.as_ref().is_some_and(|ids| ids.contains(&id));
        if in_flight && !p.dropped_listeners.contains(&id) {
            p.dropped_listeners.push(id);
            return true;
        }
        false
    }

    pub fn listener_count(&self, project: ProjectKey) -> usize {
        self.projects
            .get(project)
            .map_or(0, |p| p.listeners.len())
    }

    pub fn freeze_project(&mut self, project: ProjectKey) {
        match self.projects.get_mut(project) {
            Some(p) => p.frozen = true,
            None => warn!("Can't freeze missing project {project:?}"),
        }
    }

    /// Unfreezes the project, recomputes its totals and notifies its listeners once.
    pub fn thaw_project(&mut self, project: ProjectKey) {
        let Some(p) = self.projects.get_mut(project) else {
            warn!("Can't thaw missing project {project:?}");
            return;
        };
        p.frozen = false;
        self.refresh_time(project);
    }

    pub fn freeze_task(&mut self, task: TaskKey) {
        if let Some(project) = self.tasks.get(task).and_then(|t| t.parent) {
            self.freeze_project(project);
        }
    }

    pub fn thaw_task(&mut self, task: TaskKey) {
        if let Some(project) = self.tasks.get(task).and_then(|t| t.parent) {
            self.thaw_project(project);
        }
    }

    /// Freezes the project owning the interval, for editing its fields without triggering a
    /// scrub on every keystroke.
    pub fn freeze_interval(&mut self, interval: IntervalKey) {
        if let Some(project) = self.owning_project(interval) {
            self.freeze_project(project);
        }
    }

    /// Thaws the project owning the interval. The scrub this triggers may merge the interval
    /// away, so the returned key is the one to keep using.
    pub fn thaw_interval(&mut self, interval: IntervalKey) -> Option<IntervalKey> {
        let task = self.intervals.get(interval)?.parent?;
        let Some(project) = self.tasks.get(task).and_then(|t| t.parent) else {
            return Some(interval);
        };
        if let Some(p) = self.projects.get_mut(project) {
            p.frozen = false;
        }
        let handle = self.scrub_intervals(task, Some(interval));
        self.refresh_time(project);
        handle
    }

    /// Thaws every frozen project and brings every stale total up to date. Meant for the
    /// process lifecycle layer before saving on shutdown.
    pub fn thaw_all(&mut self) {
        let pending = self
            .projects
            .iter()
            .filter(|(_, p)| p.frozen || p.dirty_time)
            .map(|(key, _)| key)
            .collect::<Vec<_>>();
        debug!("Flushing {} pending projects", pending.len());
        for project in pending {
            if let Some(p) = self.projects.get_mut(project) {
                p.frozen = false;
            }
            self.refresh_time(project);
        }
    }

    pub(crate) fn owning_project(&self, interval: IntervalKey) -> Option<ProjectKey> {
        let task = self.intervals.get(interval)?.parent?;
        self.tasks.get(task)?.parent
    }

    /// Tells listeners that something other than the time totals changed.
    pub(crate) fn modified(&mut self, project: ProjectKey) {
        let Some(p) = self.projects.get(project) else {
            return;
        };
        if p.being_destroyed || p.frozen {
            return;
        }
        self.dispatch(project);
    }

    /// Marks the totals stale and, unless frozen, recomputes them and notifies listeners.
    pub(crate) fn refresh_time(&mut self, project: ProjectKey) {
        let Some(p) = self.projects.get_mut(project) else {
            return;
        };
        if p.being_destroyed {
            return;
        }
        p.dirty_time = true;
        if p.frozen {
            return;
        }
        self.compute_secs(project);
        self.dispatch(project);
    }

    fn dispatch(&mut self, project: ProjectKey) {
        let Some(p) = self.projects.get_mut(project) else {
            return;
        };
        if p.dispatching.is_some() {
            trace!("Project {} is already notifying its listeners", p.id);
            return;
        }
        let mut listeners = std::mem::take(&mut p.listeners);
        p.dispatching = Some(listeners.iter().map(|v| v.id).collect());

        for entry in listeners.iter_mut() {
            let dropped = self
                .projects
                .get(project)
                .map_or(true, |p| p.being_destroyed || p.dropped_listeners.contains(&entry.id));
            if dropped {
                continue;
            }
            (entry.callback)(self, project);
        }

        // The project may have been destroyed by one of its own listeners.
        if let Some(p) = self.projects.get_mut(project) {
            let dropped = std::mem::take(&mut p.dropped_listeners);
            listeners.retain(|v| !dropped.contains(&v.id));
            listeners.append(&mut p.listeners);
            p.listeners = listeners;
            p.dispatching = None;
        }
    }
}

#[cfg(test)]
mod notify_tests {
    use std::{cell::RefCell, rc::Rc};

    use crate::{tracker::Forest, utils::logging::TEST_LOGGING};

    #[test]
    fn frozen_edits_notify_once_after_thaw() {
        *TEST_LOGGING;
        let mut forest = Forest::default();
        let project = forest.new_project();
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        forest.add_listener(project, move |_, _| *counter.borrow_mut() += 1);

        forest.freeze_project(project);
        for i in 0..10 {
            forest.set_title(project, &format!("title {i}"));
            forest.set_desc(project, &format!("desc {i}"));
        }
        assert_eq!(*calls.borrow(), 0);

        forest.thaw_project(project);
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(forest.project(project).unwrap().title(), "title 9");
    }

    #[test]
    fn listeners_run_in_registration_order_and_can_be_removed() {
        let mut forest = Forest::default();
        let project = forest.new_project();
        let log = Rc::new(RefCell::new(vec![]));

        let first_log = log.clone();
        let first = forest
            .add_listener(project, move |_, _| first_log.borrow_mut().push("first"))
            .unwrap();
        let second_log = log.clone();
        forest.add_listener(project, move |_, _| second_log.borrow_mut().push("second"));

        forest.set_title(project, "a");
        assert_eq!(*log.borrow(), vec!["first", "second"]);

        assert!(forest.remove_listener(project, first));
        assert!(!forest.remove_listener(project, first));
        forest.set_title(project, "b");
        assert_eq!(*log.borrow(), vec!["first", "second", "second"]);
    }

    #[test]
    fn listener_may_edit_the_project_it_watches() {
        let mut forest = Forest::default();
        let project = forest.new_project();
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        forest.add_listener(project, move |forest, key| {
            *counter.borrow_mut() += 1;
            forest.set_notes(key, "touched by listener");
        });

        forest.set_title(project, "edited");
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(forest.project(project).unwrap().notes(), "touched by listener");
        assert_eq!(forest.listener_count(project), 1);
    }

    #[test]
    fn listener_can_unregister_itself_while_running() {
        let mut forest = Forest::default();
        let project = forest.new_project();
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let own_id = Rc::new(RefCell::new(None));
        let id_slot = own_id.clone();
        let id = forest
            .add_listener(project, move |forest, key| {
                *counter.borrow_mut() += 1;
                if let Some(id) = *id_slot.borrow() {
                    forest.remove_listener(key, id);
                }
            })
            .unwrap();
        *own_id.borrow_mut() = Some(id);

        forest.set_title(project, "once");
        forest.set_title(project, "twice");
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(forest.listener_count(project), 0);
    }

    #[test]
    fn removal_during_dispatch_only_accepts_running_listeners() {
        let mut forest = Forest::default();
        let project = forest.new_project();
        let other = forest.new_project();
        let foreign = forest.add_listener(other, |_, _| {}).unwrap();
        let gone = forest.add_listener(project, |_, _| {}).unwrap();
        assert!(forest.remove_listener(project, gone));

        let results = Rc::new(RefCell::new(vec![]));
        let sink = results.clone();
        forest.add_listener(project, move |forest, key| {
            sink.borrow_mut().push(forest.remove_listener(key, foreign));
            sink.borrow_mut().push(forest.remove_listener(key, gone));
        });

        forest.set_title(project, "dispatch");
        assert_eq!(*results.borrow(), vec![false, false]);
        assert_eq!(forest.listener_count(project), 1);
        assert_eq!(forest.listener_count(other), 1);
    }

    #[test]
    fn thaw_all_flushes_every_frozen_project() {
        let mut forest = Forest::default();
        let a = forest.new_project();
        let b = forest.new_project();
        forest.append_project(None, a);
        forest.append_project(None, b);
        forest.freeze_project(a);
        forest.freeze_project(b);
        forest.set_title(a, "a");

        forest.thaw_all();
        assert!(!forest.project(a).unwrap().is_frozen());
        assert!(!forest.project(b).unwrap().is_frozen());
        assert!(!forest.project(a).unwrap().is_dirty());
    }
}
