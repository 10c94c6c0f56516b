//! Structural edits of the forest: creating, moving and destroying projects, tasks and
//! intervals, plus ids, GUIDs, traversal and sorting.
//!
//! Every insertion first detaches the entity from wherever it currently lives, so an entity is
//! never owned twice.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    BillingRates, Bucket, Forest, Interval, IntervalKey, Project, ProjectInfo, ProjectKey,
    Schedule, ScrubThresholds, Task, TaskBilling, TaskKey,
};

/// Entity visited by [Forest::walk].
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Project {
        key: ProjectKey,
        project: &'a Project,
        depth: usize,
    },
    Task {
        key: TaskKey,
        task: &'a Task,
    },
    Interval {
        key: IntervalKey,
        interval: &'a Interval,
    },
}

/// Order used by [Forest::sort_projects]. Time and planning keys sort largest first, text keys
/// alphabetically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortKey {
    Ever,
    Day,
    Yesterday,
    Week,
    LastWeek,
    Month,
    Year,
    Current,
    Title,
    Desc,
    EstimatedStart,
    EstimatedEnd,
    DueDate,
    Sizing,
    PercentComplete,
    Urgency,
    Importance,
    Status,
}

impl Forest {
    // Projects

    pub fn new_project(&mut self) -> ProjectKey {
        self.new_project_with("", "")
    }

    /// Creates a detached project with the next free id.
    pub fn new_project_with(&mut self, title: &str, desc: &str) -> ProjectKey {
        let id = self.next_free_id;
        self.next_free_id += 1;
        let info = ProjectInfo {
            title: title.into(),
            desc: desc.into(),
            ..ProjectInfo::default()
        };
        self.projects.insert(Project::new(id, info))
    }

    /// Copies the project's descriptive data and, recursively, its sub-projects. Tasks are not
    /// copied. The copy is detached and gets a fresh id and GUID.
    pub fn duplicate_project(&mut self, project: ProjectKey) -> Option<ProjectKey> {
        let Some(p) = self.projects.get(project) else {
            warn!("Can't duplicate missing project {project:?}");
            return None;
        };
        let info = p.info.clone();
        let children = p.children.clone();

        let id = self.next_free_id;
        self.next_free_id += 1;
        let copy = self.projects.insert(Project::new(id, info));
        for child in children {
            if let Some(child_copy) = self.duplicate_project(child) {
                self.append_project(Some(copy), child_copy);
            }
        }
        Some(copy)
    }

    /// Destroys the project with all of its tasks, intervals and sub-projects.
    #[instrument(skip(self))]
    pub fn destroy_project(&mut self, project: ProjectKey) {
        let Some(p) = self.projects.get_mut(project) else {
            warn!("Can't destroy missing project {project:?}");
            return;
        };
        p.being_destroyed = true;
        let tasks = std::mem::take(&mut p.tasks);
        let children = p.children.clone();
        p.current_task = None;

        self.detach_project(project);
        for task in tasks {
            self.drop_task(task);
        }
        for child in children {
            self.destroy_project(child);
        }
        self.projects.remove(project);
    }

    /// Destroys every project of the forest.
    pub fn destroy_all(&mut self) {
        for root in self.roots.clone() {
            self.destroy_project(root);
        }
    }

    /// Removes the project from its parent or from the roots. The project stays alive.
    pub fn detach_project(&mut self, project: ProjectKey) {
        let Some(p) = self.projects.get_mut(project) else {
            return;
        };
        let parent = p.parent.take();
        match parent {
            Some(parent) => {
                if let Some(pp) = self.projects.get_mut(parent) {
                    pp.children.retain(|v| *v != project);
                }
                self.modified(parent);
            }
            None => self.roots.retain(|v| *v != project),
        }
    }

    /// Moves `child` to the end of `parent`'s sub-projects, or of the roots when `parent` is
    /// `None`.
    pub fn append_project(&mut self, parent: Option<ProjectKey>, child: ProjectKey) {
        self.place_project(child, parent, None);
    }

    /// Moves `project` right before `sibling`. Without a sibling it goes to the end of the
    /// roots.
    pub fn insert_project_before(&mut self, project: ProjectKey, sibling: Option<ProjectKey>) {
        let Some(sibling) = sibling else {
            self.place_project(project, None, None);
            return;
        };
        if project == sibling {
            return;
        }
        let Some(parent) = self.projects.get(sibling).map(|p| p.parent) else {
            warn!("Can't insert before missing project {sibling:?}");
            return;
        };
        if !self.can_place(project, parent) {
            return;
        }
        self.detach_project(project);
        let index = self.sibling_index(parent, sibling);
        self.place_project(project, parent, index);
    }

    /// Moves `project` right after `sibling`. Without a sibling it goes to the front of the
    /// roots.
    pub fn insert_project_after(&mut self, project: ProjectKey, sibling: Option<ProjectKey>) {
        let Some(sibling) = sibling else {
            self.place_project(project, None, Some(0));
            return;
        };
        if project == sibling {
            return;
        }
        let Some(parent) = self.projects.get(sibling).map(|p| p.parent) else {
            warn!("Can't insert after missing project {sibling:?}");
            return;
        };
        if !self.can_place(project, parent) {
            return;
        }
        self.detach_project(project);
        let index = self.sibling_index(parent, sibling).map(|v| v + 1);
        self.place_project(project, parent, index);
    }

    /// Moves `project` under `parent` at `position`, clamped to the length of the list.
    pub fn reparent_project(
        &mut self,
        project: ProjectKey,
        parent: Option<ProjectKey>,
        position: usize,
    ) {
        self.place_project(project, parent, Some(position));
    }

    fn sibling_index(&self, parent: Option<ProjectKey>, sibling: ProjectKey) -> Option<usize> {
        let list = match parent {
            Some(parent) => &self.projects.get(parent)?.children,
            None => &self.roots,
        };
        list.iter().position(|v| *v == sibling)
    }

    /// True when `ancestor` is `project` itself or one of its parents.
    fn is_ancestor(&self, ancestor: ProjectKey, project: ProjectKey) -> bool {
        let mut current = Some(project);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.projects.get(key).and_then(|p| p.parent);
        }
        false
    }

    fn can_place(&self, project: ProjectKey, parent: Option<ProjectKey>) -> bool {
        if !self.projects.contains(project) {
            warn!("Can't move missing project {project:?}");
            return false;
        }
        let Some(parent) = parent else {
            return true;
        };
        if !self.projects.contains(parent) {
            warn!("Can't move project {project:?} under missing project {parent:?}");
            return false;
        }
        if self.is_ancestor(project, parent) {
            warn!("Refusing to move project {project:?} under its own descendant");
            return false;
        }
        true
    }

    /// Index is relative to the destination list with `project` already taken out of it.
    fn place_project(
        &mut self,
        project: ProjectKey,
        parent: Option<ProjectKey>,
        index: Option<usize>,
    ) {
        if !self.can_place(project, parent) {
            return;
        }
        self.detach_project(project);

        let list = match parent {
            Some(parent) => match self.projects.get_mut(parent) {
                Some(p) => &mut p.children,
                None => return,
            },
            None => &mut self.roots,
        };
        let index = index.unwrap_or(list.len()).min(list.len());
        list.insert(index, project);
        if let Some(p) = self.projects.get_mut(project) {
            p.parent = parent;
        }
        if let Some(parent) = parent {
            self.modified(parent);
        }
    }

    fn update_info(&mut self, project: ProjectKey, update: impl FnOnce(&mut ProjectInfo)) -> bool {
        match self.projects.get_mut(project) {
            Some(p) => {
                update(&mut p.info);
                true
            }
            None => {
                warn!("Can't edit missing project {project:?}");
                false
            }
        }
    }

    pub fn set_title(&mut self, project: ProjectKey, title: &str) {
        if self.update_info(project, |info| info.title = title.into()) {
            self.modified(project);
        }
    }

    pub fn set_desc(&mut self, project: ProjectKey, desc: &str) {
        if self.update_info(project, |info| info.desc = desc.into()) {
            self.modified(project);
        }
    }

    pub fn set_notes(&mut self, project: ProjectKey, notes: &str) {
        if self.update_info(project, |info| info.notes = notes.into()) {
            self.modified(project);
        }
    }

    pub fn set_custom_id(&mut self, project: ProjectKey, custom_id: Option<&str>) {
        if self.update_info(project, |info| info.custom_id = custom_id.map(Into::into)) {
            self.modified(project);
        }
    }

    pub fn set_rates(&mut self, project: ProjectKey, rates: BillingRates) {
        if self.update_info(project, |info| info.rates = rates) {
            self.modified(project);
        }
    }

    /// New thresholds may change what the scrubber keeps, so the totals are recomputed.
    pub fn set_thresholds(&mut self, project: ProjectKey, thresholds: ScrubThresholds) {
        if self.update_info(project, |info| info.thresholds = thresholds) {
            self.refresh_time(project);
        }
    }

    /// Percent complete is clamped to 100.
    pub fn set_schedule(&mut self, project: ProjectKey, schedule: Schedule) {
        let schedule = Schedule {
            percent_complete: schedule.percent_complete.min(100),
            ..schedule
        };
        if self.update_info(project, |info| info.schedule = schedule) {
            self.modified(project);
        }
    }

    pub fn set_percent_complete(&mut self, project: ProjectKey, percent: u8) {
        if self.update_info(project, |info| info.schedule.percent_complete = percent.min(100)) {
            self.modified(project);
        }
    }

    /// Forces the numeric id of a project, used when loading a saved forest. When the id is
    /// already taken the id is assigned anyway and the current holder is returned so the
    /// caller can resolve the conflict.
    pub fn set_project_id(&mut self, project: ProjectKey, id: i32) -> Option<ProjectKey> {
        let conflict = self.locate_by_id(id).filter(|v| *v != project);
        if let Some(holder) = conflict {
            warn!("Project id {id} is already used by {holder:?}");
        }
        let Some(p) = self.projects.get_mut(project) else {
            warn!("Can't set id of missing project {project:?}");
            return conflict;
        };
        // Ids stay dense when loading: reclaim only the most recently handed out one.
        if p.id + 1 == self.next_free_id {
            self.next_free_id -= 1;
        }
        p.id = id;
        if id >= self.next_free_id {
            self.next_free_id = id + 1;
        }
        self.modified(project);
        conflict
    }

    pub fn set_project_guid(&mut self, project: ProjectKey, guid: Uuid) {
        if let Some(p) = self.projects.get_mut(project) {
            p.guid = guid;
            self.modified(project);
        }
    }

    /// Finds the live project carrying `id`.
    pub fn locate_by_id(&self, id: i32) -> Option<ProjectKey> {
        self.projects
            .iter()
            .find(|(_, p)| p.id == id)
            .map(|(key, _)| key)
    }

    /// Visits `project` and its descendants pre-order. Stops as soon as `f` returns false, in
    /// which case false is returned.
    pub fn foreach_project(
        &self,
        project: ProjectKey,
        mut f: impl FnMut(ProjectKey, &Project) -> bool,
    ) -> bool {
        self.visit_projects(project, &mut f)
    }

    /// Same as [Forest::foreach_project] over every root in order.
    pub fn foreach_forest(&self, mut f: impl FnMut(ProjectKey, &Project) -> bool) -> bool {
        self.roots.iter().all(|root| self.visit_projects(*root, &mut f))
    }

    fn visit_projects(
        &self,
        project: ProjectKey,
        f: &mut dyn FnMut(ProjectKey, &Project) -> bool,
    ) -> bool {
        let Some(p) = self.projects.get(project) else {
            return true;
        };
        if !f(project, p) {
            return false;
        }
        p.children.iter().all(|child| self.visit_projects(*child, f))
    }

    /// Depth first traversal of the whole forest. Each project is followed by its tasks (each
    /// followed by its intervals) and then by its sub-projects.
    pub fn walk(&self, mut f: impl FnMut(Node<'_>) -> bool) -> bool {
        self.roots
            .iter()
            .all(|root| self.walk_project(*root, 0, &mut f))
    }

    fn walk_project(
        &self,
        key: ProjectKey,
        depth: usize,
        f: &mut dyn FnMut(Node<'_>) -> bool,
    ) -> bool {
        let Some(project) = self.projects.get(key) else {
            return true;
        };
        if !f(Node::Project {
            key,
            project,
            depth,
        }) {
            return false;
        }
        for &task_key in &project.tasks {
            let Some(task) = self.tasks.get(task_key) else {
                continue;
            };
            if !f(Node::Task {
                key: task_key,
                task,
            }) {
                return false;
            }
            for &ivl_key in &task.intervals {
                if let Some(interval) = self.intervals.get(ivl_key) {
                    if !f(Node::Interval {
                        key: ivl_key,
                        interval,
                    }) {
                        return false;
                    }
                }
            }
        }
        project
            .children
            .iter()
            .all(|child| self.walk_project(*child, depth + 1, f))
    }

    /// Number of projects in the subtree, `project` included.
    pub fn subtree_project_count(&self, project: ProjectKey) -> usize {
        let mut count = 0;
        self.foreach_project(project, |_, _| {
            count += 1;
            true
        });
        count
    }

    /// Number of projects reachable from the roots.
    pub fn forest_project_count(&self) -> usize {
        let mut count = 0;
        self.foreach_forest(|_, _| {
            count += 1;
            true
        });
        count
    }

    /// Sorts the roots and, recursively, every list of sub-projects.
    #[instrument(skip(self))]
    pub fn sort_projects(&mut self, key: SortKey) {
        let mut roots = std::mem::take(&mut self.roots);
        roots.sort_by(|a, b| self.compare_projects(*a, *b, key));
        self.roots = roots;

        let parents = self.projects.iter().map(|(k, _)| k).collect::<Vec<_>>();
        for parent in parents {
            let Some(mut children) = self
                .projects
                .get_mut(parent)
                .map(|p| std::mem::take(&mut p.children))
            else {
                continue;
            };
            children.sort_by(|a, b| self.compare_projects(*a, *b, key));
            if let Some(p) = self.projects.get_mut(parent) {
                p.children = children;
            }
        }
    }

    fn compare_projects(&self, a: ProjectKey, b: ProjectKey, key: SortKey) -> Ordering {
        let (Some(pa), Some(pb)) = (self.projects.get(a), self.projects.get(b)) else {
            return Ordering::Equal;
        };
        let bucket = |bucket: Bucket| self.total(b, bucket).cmp(&self.total(a, bucket));
        let (sa, sb) = (&pa.info.schedule, &pb.info.schedule);
        match key {
            SortKey::Ever => bucket(Bucket::Ever),
            SortKey::Day => bucket(Bucket::Day),
            SortKey::Yesterday => bucket(Bucket::Yesterday),
            SortKey::Week => bucket(Bucket::Week),
            SortKey::LastWeek => bucket(Bucket::LastWeek),
            SortKey::Month => bucket(Bucket::Month),
            SortKey::Year => bucket(Bucket::Year),
            SortKey::Current => self.total_secs_current(b).cmp(&self.total_secs_current(a)),
            SortKey::Title => pa.info.title.cmp(&pb.info.title),
            SortKey::Desc => pa.info.desc.cmp(&pb.info.desc),
            SortKey::EstimatedStart => sb.estimated_start.cmp(&sa.estimated_start),
            SortKey::EstimatedEnd => sb.estimated_end.cmp(&sa.estimated_end),
            SortKey::DueDate => sb.due_date.cmp(&sa.due_date),
            SortKey::Sizing => sb.sizing.cmp(&sa.sizing),
            SortKey::PercentComplete => sb.percent_complete.cmp(&sa.percent_complete),
            SortKey::Urgency => sb.urgency.cmp(&sa.urgency),
            SortKey::Importance => sb.importance.cmp(&sa.importance),
            SortKey::Status => sb.status.cmp(&sa.status),
        }
    }

    // Tasks

    pub fn new_task(&mut self) -> TaskKey {
        self.tasks.insert(Task::new())
    }

    /// Detached copy of the task's memo, notes and billing data, without intervals.
    pub fn copy_task(&mut self, task: TaskKey) -> Option<TaskKey> {
        let copy = Task::copy_of(self.tasks.get(task)?);
        Some(self.tasks.insert(copy))
    }

    /// Destroys the task and its intervals.
    pub fn destroy_task(&mut self, task: TaskKey) {
        if !self.tasks.contains(task) {
            warn!("Can't destroy missing task {task:?}");
            return;
        }
        self.remove_task(task);
        self.drop_task(task);
    }

    fn drop_task(&mut self, task: TaskKey) {
        if let Some(t) = self.tasks.remove(task) {
            for interval in t.intervals {
                self.intervals.remove(interval);
            }
        }
    }

    /// Takes the task out of its project without destroying it. When it was the project's
    /// current task the first remaining task becomes current. A timer running on the task is
    /// paused and picked up by the project's new current task.
    pub fn remove_task(&mut self, task: TaskKey) {
        let Some(project) = self.tasks.get(task).and_then(|t| t.parent) else {
            return;
        };
        let was_running = self.suspend_task(task);
        if let Some(t) = self.tasks.get_mut(task) {
            t.parent = None;
        }
        if let Some(p) = self.projects.get_mut(project) {
            p.tasks.retain(|v| *v != task);
            if p.current_task == Some(task) {
                p.current_task = p.tasks.first().copied();
            }
        }
        if was_running {
            debug!("Handing the timer of removed task {task:?} to the next task");
            self.start_timer(project);
        } else {
            self.refresh_time(project);
        }
    }

    /// Moves the task to the end of the project's list.
    pub fn append_task(&mut self, project: ProjectKey, task: TaskKey) {
        self.place_task(project, task, None, false);
    }

    /// Moves the task to the front of the project's list and makes it current. A timer running
    /// on the previous lead task moves along to this one.
    pub fn prepend_task(&mut self, project: ProjectKey, task: TaskKey) {
        let lead = self
            .projects
            .get(project)
            .and_then(|p| p.tasks.first().copied())
            .filter(|v| *v != task);
        let lead_running = lead.is_some_and(|v| self.suspend_task(v));
        self.place_task(project, task, Some(0), true);
        if lead_running {
            self.resume_task(task);
            self.refresh_time(project);
        }
    }

    /// Moves `insertee` right before `before` in the project owning `before`. A running
    /// insertee keeps running and becomes the current task.
    pub fn insert_task(&mut self, before: TaskKey, insertee: TaskKey) {
        if before == insertee {
            return;
        }
        let Some(project) = self.tasks.get(before).and_then(|t| t.parent) else {
            warn!("Task {before:?} is not part of any project");
            return;
        };
        let was_running = self.suspend_task(insertee);
        self.remove_task(insertee);
        let index = self
            .projects
            .get(project)
            .and_then(|p| p.tasks.iter().position(|v| *v == before));
        self.place_task(project, insertee, index, was_running);
        if was_running {
            self.resume_task(insertee);
            self.refresh_time(project);
        }
    }

    /// Creates a task inheriting the billing data of `old`, inserts it right before `old` and
    /// makes it current.
    pub fn new_task_insert(&mut self, old: TaskKey) -> Option<TaskKey> {
        let task = self.copy_task(old)?;
        if let Some(t) = self.tasks.get_mut(task) {
            t.memo = super::entities::DEFAULT_TASK_MEMO.into();
            t.notes.clear();
        }
        self.insert_task(old, task);
        self.set_current_task(task);
        Some(task)
    }

    /// Detaches `task`, pausing its timer, and inserts it into `project` at `index`. The timer
    /// resumes in the new place.
    fn place_task(
        &mut self,
        project: ProjectKey,
        task: TaskKey,
        index: Option<usize>,
        make_current: bool,
    ) {
        if !self.projects.contains(project) || !self.tasks.contains(task) {
            warn!("Can't move task {task:?} into project {project:?}");
            return;
        }
        let was_running = self.suspend_task(task);
        self.remove_task(task);

        if let Some(p) = self.projects.get_mut(project) {
            let index = index.unwrap_or(p.tasks.len()).min(p.tasks.len());
            p.tasks.insert(index, task);
            if make_current || p.current_task.is_none() {
                p.current_task = Some(task);
            }
        }
        if let Some(t) = self.tasks.get_mut(task) {
            t.parent = Some(project);
        }
        if was_running {
            debug!("Resuming timer of moved task {task:?}");
            self.resume_task(task);
        }
        self.refresh_time(project);
    }

    /// Makes `task` the one the timer works on. A timer running on the previous current task
    /// carries over to this one.
    pub fn set_current_task(&mut self, task: TaskKey) {
        let Some(project) = self.tasks.get(task).and_then(|t| t.parent) else {
            warn!("Task {task:?} is not part of any project");
            return;
        };
        let old = self.current_task(project);
        if old == Some(task) {
            self.modified(project);
            return;
        }
        let was_running = old.is_some_and(|v| self.suspend_task(v));
        if let Some(p) = self.projects.get_mut(project) {
            p.current_task = Some(task);
        }
        if was_running {
            self.start_timer(project);
        } else {
            self.refresh_time(project);
        }
    }

    /// The task the timer works on. Falls back to the first task.
    pub fn current_task(&self, project: ProjectKey) -> Option<TaskKey> {
        let p = self.projects.get(project)?;
        p.current_task
            .filter(|v| p.tasks.contains(v))
            .or_else(|| p.tasks.first().copied())
    }

    pub fn first_task(&self, project: ProjectKey) -> Option<TaskKey> {
        self.projects.get(project)?.tasks.first().copied()
    }

    pub fn is_first_task(&self, task: TaskKey) -> bool {
        self.task_position(task)
            .is_some_and(|(index, _)| index == 0)
    }

    pub fn is_last_task(&self, task: TaskKey) -> bool {
        self.task_position(task)
            .is_some_and(|(index, len)| index + 1 == len)
    }

    fn task_position(&self, task: TaskKey) -> Option<(usize, usize)> {
        let project = self.tasks.get(task)?.parent?;
        let list = &self.projects.get(project)?.tasks;
        Some((list.iter().position(|v| *v == task)?, list.len()))
    }

    /// Moves every interval of `task` into the task listed before it and destroys `task`.
    /// Returns the task that received the intervals.
    pub fn merge_task_up(&mut self, task: TaskKey) -> Option<TaskKey> {
        let project = self.tasks.get(task)?.parent?;
        let index = self.task_position(task)?.0;
        let Some(target) = index
            .checked_sub(1)
            .and_then(|v| self.projects.get(project)?.tasks.get(v).copied())
        else {
            warn!("Task {task:?} has no task above it to merge into");
            return None;
        };

        self.freeze_project(project);
        let moved = self
            .tasks
            .get_mut(task)
            .map(|t| std::mem::take(&mut t.intervals))
            .unwrap_or_default();
        for interval in &moved {
            if let Some(v) = self.intervals.get_mut(*interval) {
                v.parent = Some(target);
            }
        }
        if let Some(t) = self.tasks.get_mut(target) {
            t.intervals.extend(moved);
        }
        self.normalize_order(target);
        self.destroy_task(task);
        self.thaw_project(project);
        Some(target)
    }

    /// Restores the newest-first order of a task's list after intervals from elsewhere were
    /// spliced in. Only the head may stay running.
    fn normalize_order(&mut self, task: TaskKey) {
        let Some(mut list) = self.tasks.get_mut(task).map(|t| std::mem::take(&mut t.intervals))
        else {
            return;
        };
        list.sort_by_key(|key| {
            self.intervals
                .get(*key)
                .map(|v| (std::cmp::Reverse(v.running), std::cmp::Reverse(v.start)))
        });
        for key in list.iter().skip(1) {
            if let Some(v) = self.intervals.get_mut(*key) {
                v.running = false;
            }
        }
        if let Some(t) = self.tasks.get_mut(task) {
            t.intervals = list;
        }
    }

    fn update_task(&mut self, task: TaskKey, update: impl FnOnce(&mut Task)) {
        let Some(t) = self.tasks.get_mut(task) else {
            warn!("Can't edit missing task {task:?}");
            return;
        };
        update(t);
        let project = t.parent;
        if let Some(project) = project {
            self.modified(project);
        }
    }

    pub fn set_task_memo(&mut self, task: TaskKey, memo: &str) {
        self.update_task(task, |t| t.memo = memo.into());
    }

    pub fn set_task_notes(&mut self, task: TaskKey, notes: &str) {
        self.update_task(task, |t| t.notes = notes.into());
    }

    pub fn set_task_billing(&mut self, task: TaskKey, billing: TaskBilling) {
        self.update_task(task, |t| t.billing = billing);
    }

    pub fn set_task_guid(&mut self, task: TaskKey, guid: Uuid) {
        self.update_task(task, |t| t.guid = guid);
    }

    // Intervals

    /// A fresh interval: both ends at the epoch, protected from scrubbing until given a start.
    pub fn new_interval(&mut self) -> IntervalKey {
        let epoch = DateTime::<Utc>::default();
        self.intervals.insert(Interval::new(epoch, epoch))
    }

    /// `stop` is clamped to `start`.
    pub fn new_interval_at(&mut self, start: DateTime<Utc>, stop: DateTime<Utc>) -> IntervalKey {
        self.intervals.insert(Interval::new(start, stop))
    }

    pub fn destroy_interval(&mut self, interval: IntervalKey) {
        self.unhook_interval(interval);
        self.intervals.remove(interval);
    }

    /// Takes the interval out of its task without destroying it.
    pub fn unhook_interval(&mut self, interval: IntervalKey) {
        let Some(task) = self.intervals.get_mut(interval).and_then(|v| v.parent.take()) else {
            return;
        };
        if let Some(v) = self.intervals.get_mut(interval) {
            v.running = false;
        }
        let project = self.tasks.get_mut(task).and_then(|t| {
            t.intervals.retain(|v| *v != interval);
            t.parent
        });
        if let Some(project) = project {
            self.refresh_time(project);
        }
    }

    /// Puts the interval at the front of the task, behind a running head if there is one.
    pub fn add_interval(&mut self, task: TaskKey, interval: IntervalKey) {
        let head_running = self.head_interval(task).is_some_and(|v| v.running);
        self.insert_interval(task, interval, if head_running { 1 } else { 0 });
    }

    /// Puts the interval at the end of the task.
    pub fn append_interval(&mut self, task: TaskKey, interval: IntervalKey) {
        self.insert_interval(task, interval, usize::MAX);
    }

    fn insert_interval(&mut self, task: TaskKey, interval: IntervalKey, index: usize) {
        if !self.tasks.contains(task) || !self.intervals.contains(interval) {
            warn!("Can't add interval {interval:?} to task {task:?}");
            return;
        }
        self.unhook_interval(interval);
        let Some(t) = self.tasks.get_mut(task) else {
            return;
        };
        let index = index.min(t.intervals.len());
        t.intervals.insert(index, interval);
        let project = t.parent;
        if let Some(v) = self.intervals.get_mut(interval) {
            v.parent = Some(task);
            if v.running && index != 0 {
                warn!("Only the head interval may run, clearing the running flag of {interval:?}");
                v.running = false;
            }
        }
        if let Some(project) = project {
            self.refresh_time(project);
        }
    }

    /// Clones the interval into the same list position, pushing the original one place down.
    /// The clone never runs. Totals are not refreshed.
    pub fn new_interval_insert_after(&mut self, interval: IntervalKey) -> Option<IntervalKey> {
        let ivl = self.intervals.get(interval)?;
        let task = ivl.parent?;
        let running = ivl.running;
        let copy = Interval {
            running: false,
            ..ivl.clone()
        };
        let index = self
            .tasks
            .get(task)?
            .intervals
            .iter()
            .position(|v| *v == interval)?;
        let key = self.intervals.insert(copy);
        if let Some(t) = self.tasks.get_mut(task) {
            t.intervals.insert(if running { index + 1 } else { index }, key);
        }
        Some(key)
    }

    /// Moves `start`, pulling `stop` along when needed. Returns the interval's handle after the
    /// scrub this triggers.
    pub fn set_interval_start(
        &mut self,
        interval: IntervalKey,
        start: DateTime<Utc>,
    ) -> Option<IntervalKey> {
        let ivl = self.intervals.get_mut(interval)?;
        ivl.start = start;
        ivl.stop = ivl.stop.max(start);
        self.interval_changed(interval)
    }

    /// Moves `stop`, pulling `start` along when needed.
    pub fn set_interval_stop(
        &mut self,
        interval: IntervalKey,
        stop: DateTime<Utc>,
    ) -> Option<IntervalKey> {
        let ivl = self.intervals.get_mut(interval)?;
        ivl.stop = stop;
        ivl.start = ivl.start.min(stop);
        self.interval_changed(interval)
    }

    fn interval_changed(&mut self, interval: IntervalKey) -> Option<IntervalKey> {
        let Some(task) = self.intervals.get(interval).and_then(|v| v.parent) else {
            return Some(interval);
        };
        let Some(project) = self.tasks.get(task).and_then(|t| t.parent) else {
            return Some(interval);
        };
        if self.projects.get(project).is_some_and(|p| p.frozen) {
            self.refresh_time(project);
            return Some(interval);
        }
        let handle = self.scrub_intervals(task, Some(interval));
        self.refresh_time(project);
        handle
    }

    pub fn set_interval_fuzz(&mut self, interval: IntervalKey, fuzz: chrono::Duration) {
        let Some(ivl) = self.intervals.get_mut(interval) else {
            return;
        };
        ivl.fuzz = fuzz.max(chrono::Duration::zero());
        if let Some(project) = self.owning_project(interval) {
            self.modified(project);
        }
    }

    /// Only the head interval of a task may be flagged running.
    pub fn set_interval_running(&mut self, interval: IntervalKey, running: bool) {
        if running && !self.is_first_interval(interval) {
            warn!("Interval {interval:?} isn't at the head of its task and can't run");
            return;
        }
        let Some(ivl) = self.intervals.get_mut(interval) else {
            return;
        };
        ivl.running = running;
        if let Some(project) = self.owning_project(interval) {
            self.modified(project);
        }
    }

    pub fn is_first_interval(&self, interval: IntervalKey) -> bool {
        self.interval_position(interval)
            .is_some_and(|(index, _)| index == 0)
    }

    pub fn is_last_interval(&self, interval: IntervalKey) -> bool {
        self.interval_position(interval)
            .is_some_and(|(index, len)| index + 1 == len)
    }

    fn interval_position(&self, interval: IntervalKey) -> Option<(usize, usize)> {
        let task = self.intervals.get(interval)?.parent?;
        let list = &self.tasks.get(task)?.intervals;
        Some((list.iter().position(|v| *v == interval)?, list.len()))
    }

    pub(crate) fn head_interval(&self, task: TaskKey) -> Option<&Interval> {
        let key = *self.tasks.get(task)?.intervals.first()?;
        self.intervals.get(key)
    }

    /// Moves `interval` and every interval listed after it into `new_task`, which is placed
    /// right after the interval's task.
    pub fn split_intervals(&mut self, interval: IntervalKey, new_task: TaskKey) -> Option<TaskKey> {
        let task = self.intervals.get(interval)?.parent?;
        let project = self.tasks.get(task)?.parent?;
        if task == new_task || !self.tasks.contains(new_task) {
            warn!("Can't split task {task:?} into {new_task:?}");
            return None;
        }
        let index = self.interval_position(interval)?.0;

        self.freeze_project(project);
        let moved = self
            .tasks
            .get_mut(task)
            .map(|t| t.intervals.split_off(index))
            .unwrap_or_default();
        for key in &moved {
            if let Some(v) = self.intervals.get_mut(*key) {
                v.parent = Some(new_task);
            }
        }
        if let Some(t) = self.tasks.get_mut(new_task) {
            t.intervals.extend(moved);
        }
        self.normalize_order(new_task);

        self.remove_task(new_task);
        let after = self.task_position(task).map(|(index, _)| index + 1);
        self.place_task(project, new_task, after, false);
        self.thaw_project(project);
        Some(new_task)
    }
}

#[cfg(test)]
mod tree_tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::{
        config::{TrackerConfig, Zone},
        tracker::{Forest, Node, SortKey},
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING},
    };

    fn forest() -> Forest {
        *TEST_LOGGING;
        let config = TrackerConfig {
            zone: Zone::utc(),
            ..TrackerConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 18, 0, 0).unwrap();
        Forest::with_clock(config, Box::new(ManualClock::at(now)))
    }

    #[test]
    fn ids_are_sequential_and_reclaimed_at_the_frontier() {
        let mut forest = forest();
        let a = forest.new_project();
        let b = forest.new_project();
        assert_eq!(forest.project(a).unwrap().id(), 1);
        assert_eq!(forest.project(b).unwrap().id(), 2);

        // b held the frontier id, so the counter steps back before jumping past 10.
        assert_eq!(forest.set_project_id(b, 10), None);
        let c = forest.new_project();
        assert_eq!(forest.project(c).unwrap().id(), 11);

        // a is not at the frontier, nothing is reclaimed; the id conflicts with c.
        assert_eq!(forest.set_project_id(a, 11), Some(c));
        assert_eq!(forest.project(a).unwrap().id(), 11);
        let d = forest.new_project();
        assert_eq!(forest.project(d).unwrap().id(), 12);
        assert_eq!(forest.locate_by_id(2), None);
    }

    #[test]
    fn duplicate_copies_subprojects_but_not_tasks() {
        let mut forest = forest();
        let root = forest.new_project_with("root", "top");
        let child = forest.new_project_with("child", "");
        forest.append_project(None, root);
        forest.append_project(Some(root), child);
        let task = forest.new_task();
        forest.append_task(root, task);

        let copy = forest.duplicate_project(root).unwrap();
        let p = forest.project(copy).unwrap();
        assert_eq!(p.title(), "root");
        assert_eq!(p.desc(), "top");
        assert!(p.tasks().is_empty());
        assert_ne!(p.guid(), forest.project(root).unwrap().guid());
        assert_eq!(p.children().len(), 1);
        let child_copy = p.children()[0];
        assert_ne!(child_copy, child);
        assert_eq!(forest.project(child_copy).unwrap().title(), "child");
        assert_eq!(forest.project(child_copy).unwrap().parent(), Some(copy));
        // The copy is detached.
        assert_eq!(forest.roots(), &[root]);
    }

    #[test]
    fn destroy_cascades() {
        let mut forest = forest();
        let root = forest.new_project();
        let child = forest.new_project();
        forest.append_project(None, root);
        forest.append_project(Some(root), child);
        let task = forest.new_task();
        forest.append_task(child, task);
        let ivl = forest.new_interval_at(forest.now() - Duration::hours(1), forest.now());
        forest.add_interval(task, ivl);

        forest.destroy_project(root);
        assert!(forest.roots().is_empty());
        assert!(forest.project(child).is_none());
        assert!(forest.task(task).is_none());
        assert!(forest.interval(ivl).is_none());
        assert_eq!(forest.project_count(), 0);
        assert_eq!(forest.interval_count(), 0);
    }

    #[test]
    fn sibling_insertion_and_cycle_guard() {
        let mut forest = forest();
        let a = forest.new_project_with("a", "");
        let b = forest.new_project_with("b", "");
        let c = forest.new_project_with("c", "");
        forest.append_project(None, a);
        forest.insert_project_before(b, Some(a));
        forest.insert_project_after(c, Some(b));
        assert_eq!(forest.roots(), &[b, c, a]);

        forest.reparent_project(a, Some(b), 5);
        assert_eq!(forest.roots(), &[b, c]);
        assert_eq!(forest.project(a).unwrap().parent(), Some(b));

        // b can't become a child of its own child.
        forest.append_project(Some(a), b);
        assert_eq!(forest.roots(), &[b, c]);
        assert_eq!(forest.project(b).unwrap().parent(), None);

        forest.insert_project_after(a, None);
        assert_eq!(forest.roots(), &[a, b, c]);
        assert!(forest.project(b).unwrap().children().is_empty());
        assert_eq!(forest.forest_project_count(), 3);
    }

    #[test]
    fn removing_current_task_falls_back_to_first() {
        let mut forest = forest();
        let project = forest.new_project();
        let first = forest.new_task();
        let second = forest.new_task();
        forest.append_task(project, first);
        forest.append_task(project, second);
        assert_eq!(forest.current_task(project), Some(first));

        forest.set_current_task(second);
        assert_eq!(forest.current_task(project), Some(second));
        forest.remove_task(second);
        assert_eq!(forest.current_task(project), Some(first));
        assert!(forest.task(second).is_some());
        assert_eq!(forest.task(second).unwrap().parent(), None);
    }

    #[test]
    fn moving_a_running_task_keeps_its_time() {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 4, 10, 18, 0, 0).unwrap());
        let config = TrackerConfig {
            zone: Zone::utc(),
            ..TrackerConfig::default()
        };
        let mut forest = Forest::with_clock(config, Box::new(clock.clone()));
        let from = forest.new_project();
        let to = forest.new_project();
        let task = forest.new_task();
        forest.append_task(from, task);
        forest.start_timer(from);
        clock.advance(Duration::minutes(10));

        forest.append_task(to, task);
        assert_eq!(forest.project(from).unwrap().secs_day(), Duration::zero());
        assert_eq!(forest.project(to).unwrap().secs_day(), Duration::minutes(10));
        assert!(forest.is_timer_running(to));
        assert!(!forest.is_timer_running(from));

        clock.advance(Duration::minutes(5));
        forest.update_timer(to);
        assert_eq!(forest.project(to).unwrap().secs_day(), Duration::minutes(15));
    }

    #[test]
    fn new_task_insert_inherits_billing_and_becomes_current() {
        let mut forest = forest();
        let project = forest.new_project();
        let old = forest.new_task();
        forest.append_task(project, old);
        forest.set_task_memo(old, "old work");
        let mut billing = forest.task(old).unwrap().billing().clone();
        billing.bill_unit = Duration::minutes(30);
        forest.set_task_billing(old, billing.clone());

        let new = forest.new_task_insert(old).unwrap();
        assert_eq!(forest.project(project).unwrap().tasks(), &[new, old]);
        assert_eq!(forest.current_task(project), Some(new));
        assert_eq!(forest.task(new).unwrap().billing(), &billing);
        assert_eq!(forest.task(new).unwrap().memo(), "New Diary Entry");
        assert!(forest.is_first_task(new));
        assert!(forest.is_last_task(old));
    }

    #[test]
    fn merge_task_up_and_split_intervals() {
        let mut forest = forest();
        let project = forest.new_project();
        let upper = forest.new_task();
        let lower = forest.new_task();
        forest.append_task(project, upper);
        forest.append_task(project, lower);
        let now = forest.now();
        let a = forest.new_interval_at(now - Duration::hours(5), now - Duration::hours(4));
        let b = forest.new_interval_at(now - Duration::hours(3), now - Duration::hours(2));
        forest.add_interval(upper, a);
        forest.add_interval(lower, b);

        assert_eq!(forest.merge_task_up(lower), Some(upper));
        assert!(forest.task(lower).is_none());
        assert_eq!(forest.task(upper).unwrap().intervals(), &[b, a]);
        assert_eq!(forest.project(project).unwrap().secs_ever(), Duration::hours(2));

        let split = forest.new_task();
        assert_eq!(forest.split_intervals(a, split), Some(split));
        assert_eq!(forest.project(project).unwrap().tasks(), &[upper, split]);
        assert_eq!(forest.task(upper).unwrap().intervals(), &[b]);
        assert_eq!(forest.task(split).unwrap().intervals(), &[a]);
        assert_eq!(forest.project(project).unwrap().secs_ever(), Duration::hours(2));
    }

    #[test]
    fn interval_setters_clamp_and_keep_order() {
        let mut forest = forest();
        let project = forest.new_project();
        let task = forest.new_task();
        forest.append_task(project, task);
        let now = forest.now();
        let ivl = forest.new_interval_at(now - Duration::hours(2), now - Duration::hours(1));
        forest.add_interval(task, ivl);

        let shorter = forest.set_interval_stop(ivl, now - Duration::minutes(90));
        assert_eq!(shorter, Some(ivl));
        assert_eq!(forest.project(project).unwrap().secs_day(), Duration::minutes(30));

        // While frozen nothing is scrubbed, so the clamped zero length interval survives.
        forest.freeze_interval(ivl);
        assert_eq!(forest.set_interval_start(ivl, now), Some(ivl));
        let v = forest.interval(ivl).unwrap();
        assert_eq!((v.start(), v.stop()), (now, now));

        // Thawing scrubs it away and there is nothing left to hand back.
        assert_eq!(forest.thaw_interval(ivl), None);
        assert!(forest.task(task).unwrap().intervals().is_empty());
        assert_eq!(forest.project(project).unwrap().secs_day(), Duration::zero());
    }

    #[test]
    fn only_the_head_interval_may_run() {
        let mut forest = forest();
        let project = forest.new_project();
        let task = forest.new_task();
        forest.append_task(project, task);
        let now = forest.now();
        let older = forest.new_interval_at(now - Duration::hours(4), now - Duration::hours(3));
        let newer = forest.new_interval_at(now - Duration::hours(2), now - Duration::hours(1));
        forest.add_interval(task, older);
        forest.add_interval(task, newer);

        forest.set_interval_running(older, true);
        assert!(!forest.interval(older).unwrap().is_running());
        forest.set_interval_running(newer, true);
        assert!(forest.interval(newer).unwrap().is_running());

        let clone = forest.new_interval_insert_after(newer).unwrap();
        assert_eq!(forest.task(task).unwrap().intervals(), &[newer, clone, older]);
        assert!(!forest.interval(clone).unwrap().is_running());
        assert!(forest.is_first_interval(newer));
        assert!(forest.is_last_interval(older));
    }

    #[test]
    fn walk_visits_project_tasks_intervals_then_children() {
        let mut forest = forest();
        let root = forest.new_project_with("root", "");
        let child = forest.new_project_with("child", "");
        forest.append_project(None, root);
        forest.append_project(Some(root), child);
        let task = forest.new_task();
        forest.append_task(root, task);
        let now = forest.now();
        let ivl = forest.new_interval_at(now - Duration::hours(1), now);
        forest.add_interval(task, ivl);

        let mut seen = vec![];
        forest.walk(|node| {
            seen.push(match node {
                Node::Project { project, depth, .. } => format!("p{depth}:{}", project.title()),
                Node::Task { task, .. } => format!("t:{}", task.memo()),
                Node::Interval { interval, .. } => {
                    format!("i:{}", interval.duration().num_minutes())
                }
            });
            true
        });
        assert_eq!(seen, vec!["p0:root", "t:New Diary Entry", "i:60", "p1:child"]);
    }

    #[test]
    fn sorting_by_day_total_and_title() {
        let mut forest = forest();
        let now = forest.now();
        let make = |forest: &mut Forest, title: &str, hours: i64| {
            let project = forest.new_project_with(title, "");
            forest.append_project(None, project);
            let task = forest.new_task();
            forest.append_task(project, task);
            let ivl = forest.new_interval_at(now - Duration::hours(hours), now);
            forest.add_interval(task, ivl);
            project
        };
        let a = make(&mut forest, "alpha", 1);
        let b = make(&mut forest, "beta", 3);
        let c = make(&mut forest, "gamma", 2);

        forest.sort_projects(SortKey::Day);
        assert_eq!(forest.roots(), &[b, c, a]);
        forest.sort_projects(SortKey::Title);
        assert_eq!(forest.roots(), &[a, b, c]);
    }

    #[test]
    fn percent_complete_is_clamped() {
        let mut forest = forest();
        let project = forest.new_project();
        forest.set_percent_complete(project, 250);
        assert_eq!(forest.project(project).unwrap().schedule().percent_complete, 100);
    }
}
