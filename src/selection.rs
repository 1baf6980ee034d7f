//! Which project and module the board is looking at.
//!
//! A [`Selection`] is reconciled against every freshly loaded snapshot by the pure
//! reducer [`Selection::reconcile`], so ids that disappeared fall back to something
//! that still exists.

use std::collections::HashSet;

use tracing::debug;

use crate::db::Database;
use crate::fields::PROJECT_TASKS_LABEL;
use crate::model::{Module, Project, Stage, Task, Workflow};

/// Board scope inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// Project tasks that belong to no module.
    #[default]
    ProjectTasks,
    Module(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub project_id: Option<String>,
    pub scope: Scope,
}

impl Selection {
    pub fn new(project_id: Option<String>, scope: Scope) -> Self {
        Selection { project_id, scope }
    }

    /// Reconcile against a snapshot.
    ///
    /// A vanished project falls back to the first project. A module that is not in
    /// the (possibly new) project falls back to the project's first module, or to
    /// project tasks when it has none. Project tasks stay project tasks.
    pub fn reconcile(&self, db: &Database) -> Selection {
        let project_id = self
            .project_id
            .as_deref()
            .filter(|id| db.project(id).is_some())
            .or_else(|| db.projects.first().map(|p| p.id.as_str()))
            .map(str::to_string);

        let modules: Vec<&Module> = project_id.as_deref().map(|p| db.modules_of(p)).unwrap_or_default();
        let scope = match &self.scope {
            Scope::ProjectTasks => Scope::ProjectTasks,
            Scope::Module(id) if modules.iter().any(|m| &m.id == id) => Scope::Module(id.clone()),
            Scope::Module(id) => {
                debug!(module_id = %id, "selected module gone, falling back");
                modules.first().map_or(Scope::ProjectTasks, |m| Scope::Module(m.id.clone()))
            }
        };
        Selection { project_id, scope }
    }

    pub fn project<'a>(&self, db: &'a Database) -> Option<&'a Project> {
        self.project_id.as_deref().and_then(|id| db.project(id))
    }

    pub fn module<'a>(&self, db: &'a Database) -> Option<&'a Module> {
        match &self.scope {
            Scope::ProjectTasks => None,
            Scope::Module(id) => db.module(id),
        }
    }

    /// The module's own workflow, or the project's when the module has none.
    pub fn active_workflow<'a>(&self, db: &'a Database) -> Option<&'a Workflow> {
        let project = self.project(db)?;
        let workflow_id = self
            .module(db)
            .and_then(|m| m.workflow_id.as_deref())
            .unwrap_or(project.workflow_id.as_str());
        db.workflow(workflow_id)
    }

    /// Every task of the selected project.
    pub fn project_tasks<'a>(&self, db: &'a Database) -> Vec<&'a Task> {
        let Some(project_id) = self.project_id.as_deref() else { return Vec::new() };
        db.tasks.iter().filter(|t| t.project_id == project_id).collect()
    }

    /// Tasks shown on the board for the current scope.
    pub fn tasks_in_scope<'a>(&self, db: &'a Database) -> Vec<&'a Task> {
        let project_tasks = self.project_tasks(db);
        match &self.scope {
            Scope::ProjectTasks => project_tasks.into_iter().filter(|t| t.module_id.is_none()).collect(),
            Scope::Module(id) => project_tasks
                .into_iter()
                .filter(|t| t.module_id.as_deref() == Some(id.as_str()))
                .collect(),
        }
    }

    pub fn scope_label(&self, db: &Database) -> String {
        match self.module(db) {
            Some(m) => m.name.clone(),
            None => PROJECT_TASKS_LABEL.to_string(),
        }
    }

    /// The next scope in the cycle: project tasks, then each module of the project.
    pub fn next_scope(&self, db: &Database) -> Selection {
        let modules = self.project_id.as_deref().map(|p| db.modules_of(p)).unwrap_or_default();
        let scope = match &self.scope {
            Scope::ProjectTasks => modules.first().map_or(Scope::ProjectTasks, |m| Scope::Module(m.id.clone())),
            Scope::Module(id) => {
                let pos = modules.iter().position(|m| &m.id == id);
                match pos.and_then(|i| modules.get(i + 1)) {
                    Some(m) => Scope::Module(m.id.clone()),
                    None => Scope::ProjectTasks,
                }
            }
        };
        Selection { project_id: self.project_id.clone(), scope }
    }
}

/// Workflow stage order with ids of deleted stages dropped.
pub fn stage_order(db: &Database, workflow: Option<&Workflow>) -> Vec<String> {
    workflow
        .map(|w| w.stage_ids.iter().filter(|id| db.stage(id).is_some()).cloned().collect())
        .unwrap_or_default()
}

/// Stages offered when creating a task: the workflow's stages in order, then
/// every other stage in table order.
pub fn stage_options<'a>(db: &'a Database, workflow: Option<&Workflow>) -> Vec<&'a Stage> {
    let order = stage_order(db, workflow);
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<&Stage> = Vec::with_capacity(db.stages.len());
    for id in &order {
        if let Some(stage) = db.stage(id) {
            if seen.insert(stage.id.as_str()) {
                out.push(stage);
            }
        }
    }
    out.extend(db.stages.iter().filter(|s| !seen.contains(s.id.as_str())));
    out
}
