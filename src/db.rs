//! Entity store and the utility functions around it.
//!
//! The whole snapshot (stages, task types, workflows, projects, modules, tasks)
//! lives in one JSON file. Mutations validate everything up front and only then
//! touch the data; [`Database::commit`] applies them to a draft copy and persists
//! it with an atomic write, so a failed operation leaves both the file and the
//! in-memory snapshot as they were.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cascade::collect_subtree;
use crate::error::{FlowError, Result};
use crate::model::*;

/// In-memory snapshot of every entity.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub task_types: Vec<TaskType>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Task fields after validation, ready to be written.
struct CheckedTask {
    module_id: Option<String>,
    stage_id: String,
    task_type_id: Option<String>,
    name: String,
    description: String,
    priority: String,
    status: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    parent_task_id: Option<String>,
    parent_stage_task_id: Option<String>,
    work_logs: Vec<(NaiveDateTime, String)>,
}

impl Database {
    /// Load the snapshot, starting empty if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot yet, starting empty");
            return Ok(Database::default());
        }
        let mut buf = String::new();
        File::open(path)?.read_to_string(&mut buf)?;
        if buf.trim().is_empty() {
            return Ok(Database::default());
        }
        Ok(serde_json::from_str(&buf)?)
    }

    /// Save the snapshot using an atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(self)?;
        let mut f = File::create(&tmp)?;
        f.write_all(data.as_bytes())?;
        f.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    /// Run one mutation as a transaction: apply `op` to a draft, persist the draft,
    /// then adopt it. Any error leaves `self` and the file unchanged.
    pub fn commit<T>(&mut self, path: &Path, op: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut draft = self.clone();
        let out = op(&mut draft)?;
        draft.save(path)?;
        *self = draft;
        Ok(out)
    }

    // ---- lookups -------------------------------------------------------------

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Find a stage template task by id, together with its owning stage.
    pub fn template(&self, id: &str) -> Option<(&Stage, &StageTaskTemplate)> {
        self.stages
            .iter()
            .find_map(|s| s.tasks.iter().find(|t| t.id == id).map(|t| (s, t)))
    }

    pub fn task_type(&self, id: &str) -> Option<&TaskType> {
        self.task_types.iter().find(|t| t.id == id)
    }

    pub fn workflow(&self, id: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.id == id)
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Modules of a project, in creation order.
    pub fn modules_of(&self, project_id: &str) -> Vec<&Module> {
        self.modules.iter().filter(|m| m.project_id == project_id).collect()
    }

    // ---- stages --------------------------------------------------------------

    pub fn list_stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn create_stage(&mut self, name: &str, templates: &[StageTaskInput]) -> Result<Stage> {
        let name = required(name, "Stage name is required")?;
        let id = new_id();
        let stage = Stage { tasks: normalise_templates(&id, templates), id, name };
        info!(stage_id = %stage.id, templates = stage.tasks.len(), "created stage");
        self.stages.push(stage.clone());
        Ok(stage)
    }

    /// Rename a stage and replace all of its templates with fresh ones.
    ///
    /// Template ids are regenerated, so tasks attached to the old templates
    /// surface as stage roots afterwards.
    pub fn replace_stage(&mut self, id: &str, name: &str, templates: &[StageTaskInput]) -> Result<Stage> {
        let name = required(name, "Stage name is required")?;
        let stage = self
            .stages
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| FlowError::not_found("stage", id))?;
        stage.name = name;
        stage.tasks = normalise_templates(id, templates);
        info!(stage_id = %id, templates = stage.tasks.len(), "replaced stage");
        Ok(stage.clone())
    }

    /// Rename a stage, keeping its templates (and their ids) as they are.
    pub fn rename_stage(&mut self, id: &str, name: &str) -> Result<Stage> {
        let name = required(name, "Stage name is required")?;
        let stage = self
            .stages
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| FlowError::not_found("stage", id))?;
        stage.name = name;
        Ok(stage.clone())
    }

    // ---- task types ----------------------------------------------------------

    pub fn list_task_types(&self) -> &[TaskType] {
        &self.task_types
    }

    pub fn create_task_type(&mut self, name: &str) -> Result<TaskType> {
        let name = required(name, "Task type name is required")?;
        let task_type = TaskType { id: new_id(), name };
        info!(task_type_id = %task_type.id, "created task type");
        self.task_types.push(task_type.clone());
        Ok(task_type)
    }

    pub fn rename_task_type(&mut self, id: &str, name: &str) -> Result<TaskType> {
        let name = required(name, "Task type name is required")?;
        let task_type = self
            .task_types
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| FlowError::not_found("task type", id))?;
        task_type.name = name;
        Ok(task_type.clone())
    }

    // ---- workflows -----------------------------------------------------------

    pub fn list_workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    pub fn create_workflow(&mut self, name: &str, stage_ids: &[String]) -> Result<Workflow> {
        let name = required(name, "Workflow name is required")?;
        let stage_ids = self.checked_stage_order(stage_ids)?;
        let workflow = Workflow { id: new_id(), name, stage_ids };
        info!(workflow_id = %workflow.id, stages = workflow.stage_ids.len(), "created workflow");
        self.workflows.push(workflow.clone());
        Ok(workflow)
    }

    pub fn update_workflow(&mut self, id: &str, name: &str, stage_ids: &[String]) -> Result<Workflow> {
        let name = required(name, "Workflow name is required")?;
        if self.workflow(id).is_none() {
            return Err(FlowError::not_found("workflow", id));
        }
        let stage_ids = self.checked_stage_order(stage_ids)?;
        let workflow = self
            .workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| FlowError::not_found("workflow", id))?;
        workflow.name = name;
        workflow.stage_ids = stage_ids;
        Ok(workflow.clone())
    }

    /// Every id must name a stage; repeats keep their first position.
    fn checked_stage_order(&self, stage_ids: &[String]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(stage_ids.len());
        for sid in stage_ids {
            let sid = sid.trim();
            if self.stage(sid).is_none() {
                return Err(FlowError::validation(format!("Stage not found: {sid}")));
            }
            if seen.insert(sid) {
                out.push(sid.to_string());
            }
        }
        Ok(out)
    }

    // ---- projects & modules --------------------------------------------------

    pub fn list_projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn create_project(&mut self, name: &str, workflow_id: &str) -> Result<Project> {
        let name = required(name, "Project name is required")?;
        let workflow_id = self.checked_workflow(workflow_id)?;
        let project = Project { id: new_id(), name, workflow_id };
        info!(project_id = %project.id, "created project");
        self.projects.push(project.clone());
        Ok(project)
    }

    pub fn update_project(&mut self, id: &str, name: &str, workflow_id: &str) -> Result<Project> {
        let name = required(name, "Project name is required")?;
        if self.project(id).is_none() {
            return Err(FlowError::not_found("project", id));
        }
        let workflow_id = self.checked_workflow(workflow_id)?;
        let project = self
            .projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| FlowError::not_found("project", id))?;
        project.name = name;
        project.workflow_id = workflow_id;
        Ok(project.clone())
    }

    /// All modules, or those of one project.
    pub fn list_modules(&self, project_id: Option<&str>) -> Vec<&Module> {
        self.modules.iter().filter(|m| project_id.map_or(true, |p| m.project_id == p)).collect()
    }

    pub fn create_module(&mut self, project_id: &str, name: &str, workflow_id: Option<&str>) -> Result<Module> {
        let name = required(name, "Module name is required")?;
        let project_id = self.checked_project(project_id)?;
        let workflow_id = workflow_id.map(|w| self.checked_workflow(w)).transpose()?;
        let module = Module { id: new_id(), project_id, name, workflow_id };
        info!(module_id = %module.id, project_id = %module.project_id, "created module");
        self.modules.push(module.clone());
        Ok(module)
    }

    /// Update a module. Moving a module that still has tasks to another project is
    /// rejected, since those tasks would no longer match their module's project.
    pub fn update_module(
        &mut self,
        id: &str,
        project_id: &str,
        name: &str,
        workflow_id: Option<&str>,
    ) -> Result<Module> {
        let name = required(name, "Module name is required")?;
        let current = self.module(id).ok_or_else(|| FlowError::not_found("module", id))?;
        let project_id = self.checked_project(project_id)?;
        if current.project_id != project_id
            && self.tasks.iter().any(|t| t.module_id.as_deref() == Some(id))
        {
            return Err(FlowError::validation(
                "Module still has tasks and cannot move to another project",
            ));
        }
        let workflow_id = workflow_id.map(|w| self.checked_workflow(w)).transpose()?;
        let module = self
            .modules
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| FlowError::not_found("module", id))?;
        module.project_id = project_id;
        module.name = name;
        module.workflow_id = workflow_id;
        Ok(module.clone())
    }

    fn checked_workflow(&self, workflow_id: &str) -> Result<String> {
        let workflow_id = required(workflow_id, "Workflow is required")?;
        if self.workflow(&workflow_id).is_none() {
            return Err(FlowError::validation("Workflow not found"));
        }
        Ok(workflow_id)
    }

    fn checked_project(&self, project_id: &str) -> Result<String> {
        let project_id = required(project_id, "Project is required")?;
        if self.project(&project_id).is_none() {
            return Err(FlowError::validation("Project not found"));
        }
        Ok(project_id)
    }

    // ---- tasks ---------------------------------------------------------------

    pub fn list_tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Create a task. The store assigns the id.
    pub fn create_task(&mut self, fields: &TaskFields) -> Result<Task> {
        let project_id = self.checked_project(&fields.project_id)?;
        let checked = self.check_task(fields, &project_id, None)?;
        let id = new_id();
        let task = build_task(id, project_id, checked);
        info!(task_id = %task.id, stage_id = %task.stage_id, "created task");
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Update every field of a task except its id and project. Work logs are
    /// replaced wholesale.
    pub fn update_task(&mut self, id: &str, fields: &TaskFields) -> Result<Task> {
        let project_id = self
            .get(id)
            .map(|t| t.project_id.clone())
            .ok_or_else(|| FlowError::not_found("task", id))?;
        let checked = self.check_task(fields, &project_id, Some(id))?;
        let updated = build_task(id.to_string(), project_id, checked);
        let slot = self.get_mut(id).ok_or_else(|| FlowError::not_found("task", id))?;
        *slot = updated.clone();
        info!(task_id = %id, "updated task");
        Ok(updated)
    }

    /// Delete a task together with every descendant reachable through
    /// `parent_task_id`. Returns the removed ids, target first.
    pub fn delete_task(&mut self, id: &str) -> Result<Vec<String>> {
        let removed = collect_subtree(&self.tasks, id)?;
        let ids: HashSet<&str> = removed.iter().map(String::as_str).collect();
        self.tasks.retain(|t| !ids.contains(t.id.as_str()));
        info!(task_id = %id, removed = removed.len(), "deleted task subtree");
        Ok(removed)
    }

    fn check_task(&self, fields: &TaskFields, project_id: &str, self_id: Option<&str>) -> Result<CheckedTask> {
        let stage_id = required(&fields.stage_id, "Stage is required")?;
        let name = required(&fields.name, "Task name is required")?;
        let priority = required(&fields.priority, "Task priority is required")?;
        let status = required(&fields.status, "Task status is required")?;

        let parent_task_id = normalise_ref(fields.parent_task_id.as_deref());
        let parent_stage_task_id = normalise_ref(fields.parent_stage_task_id.as_deref());
        if parent_task_id.is_some() && parent_stage_task_id.is_some() {
            return Err(FlowError::validation(
                "Task cannot have both parent task and parent stage task",
            ));
        }

        if self.stage(&stage_id).is_none() {
            return Err(FlowError::validation("Stage not found"));
        }

        if let Some(tmpl) = parent_stage_task_id.as_deref() {
            let (owner, _) = self
                .template(tmpl)
                .ok_or_else(|| FlowError::validation("Parent stage task not found"))?;
            if owner.id != stage_id {
                return Err(FlowError::validation("Parent stage task belongs to a different stage"));
            }
        }

        let module_id = normalise_ref(fields.module_id.as_deref());
        if let Some(mid) = module_id.as_deref() {
            let module = self
                .module(mid)
                .ok_or_else(|| FlowError::validation("Module not found"))?;
            if module.project_id != project_id {
                return Err(FlowError::validation("Module does not belong to the selected project"));
            }
        }

        let task_type_id = normalise_ref(fields.task_type_id.as_deref());
        if let Some(tid) = task_type_id.as_deref() {
            if self.task_type(tid).is_none() {
                return Err(FlowError::validation("Task type not found"));
            }
        }

        if let Some(pid) = parent_task_id.as_deref() {
            self.check_parent_task(pid, self_id)?;
        }

        let start_date = parse_date(fields.start_date.as_deref().unwrap_or(""))?;
        let end_date = parse_date(fields.end_date.as_deref().unwrap_or(""))?;

        let mut work_logs = Vec::with_capacity(fields.work_logs.len());
        for log in &fields.work_logs {
            let content = log.content.trim();
            let time = log.work_time.trim();
            if content.is_empty() && time.is_empty() {
                continue;
            }
            if time.is_empty() {
                return Err(FlowError::validation("Work log time is required"));
            }
            work_logs.push((parse_work_time(time)?, content.to_string()));
        }
        work_logs.sort_by_key(|(time, _)| *time);

        Ok(CheckedTask {
            module_id,
            stage_id,
            task_type_id,
            name,
            description: fields.description.trim().to_string(),
            priority,
            status,
            start_date,
            end_date,
            parent_task_id,
            parent_stage_task_id,
            work_logs,
        })
    }

    /// The parent must exist, must not be the task itself, and must not sit below it.
    fn check_parent_task(&self, parent_id: &str, self_id: Option<&str>) -> Result<()> {
        if self.get(parent_id).is_none() {
            return Err(FlowError::validation("Parent task not found"));
        }
        let Some(self_id) = self_id else { return Ok(()) };
        if parent_id == self_id {
            return Err(FlowError::validation("Parent cannot equal child"));
        }
        let mut cur = Some(parent_id);
        let mut hops = 0;
        while let Some(p) = cur {
            if p == self_id {
                return Err(FlowError::validation("Setting parent would create a cycle"));
            }
            cur = self.get(p).and_then(|t| t.parent_task_id.as_deref());
            hops += 1;
            if hops > self.tasks.len() {
                break;
            }
        }
        Ok(())
    }

    // ---- identifier resolution -----------------------------------------------

    pub fn resolve_stage(&self, identifier: &str) -> Result<String> {
        resolve_identifier("stage", identifier, self.stages.iter().map(|s| (s.id.as_str(), s.name.as_str())))
    }

    pub fn resolve_task_type(&self, identifier: &str) -> Result<String> {
        resolve_identifier(
            "task type",
            identifier,
            self.task_types.iter().map(|t| (t.id.as_str(), t.name.as_str())),
        )
    }

    pub fn resolve_workflow(&self, identifier: &str) -> Result<String> {
        resolve_identifier(
            "workflow",
            identifier,
            self.workflows.iter().map(|w| (w.id.as_str(), w.name.as_str())),
        )
    }

    pub fn resolve_project(&self, identifier: &str) -> Result<String> {
        resolve_identifier(
            "project",
            identifier,
            self.projects.iter().map(|p| (p.id.as_str(), p.name.as_str())),
        )
    }

    /// Resolve a module, optionally only among the modules of `project_id`.
    pub fn resolve_module(&self, identifier: &str, project_id: Option<&str>) -> Result<String> {
        resolve_identifier(
            "module",
            identifier,
            self.modules
                .iter()
                .filter(|m| project_id.map_or(true, |p| m.project_id == p))
                .map(|m| (m.id.as_str(), m.name.as_str())),
        )
    }

    /// Resolve a template task among the templates of `stage_id`.
    pub fn resolve_template(&self, identifier: &str, stage_id: &str) -> Result<String> {
        let templates = self.stage(stage_id).map(|s| s.tasks.as_slice()).unwrap_or_default();
        resolve_identifier(
            "template task",
            identifier,
            templates.iter().map(|t| (t.id.as_str(), t.name.as_str())),
        )
    }

    pub fn resolve_task(&self, identifier: &str) -> Result<String> {
        resolve_identifier("task", identifier, self.tasks.iter().map(|t| (t.id.as_str(), t.name.as_str())))
    }
}

fn build_task(id: String, project_id: String, c: CheckedTask) -> Task {
    let work_logs = c
        .work_logs
        .into_iter()
        .map(|(work_time, content)| TaskWorkLog { id: new_id(), task_id: id.clone(), work_time, content })
        .collect();
    Task {
        id,
        project_id,
        module_id: c.module_id,
        stage_id: c.stage_id,
        task_type_id: c.task_type_id,
        name: c.name,
        description: c.description,
        priority: c.priority,
        status: c.status,
        start_date: c.start_date,
        end_date: c.end_date,
        parent_task_id: c.parent_task_id,
        parent_stage_task_id: c.parent_stage_task_id,
        work_logs,
    }
}

/// Fresh random id for any entity.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Trim a required field, failing with `msg` when it is blank.
fn required(value: &str, msg: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FlowError::validation(msg));
    }
    Ok(value.to_string())
}

/// Blank references mean "no reference".
pub fn normalise_ref(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Trim template names, drop blank templates and blank subtasks, number the rest.
pub fn normalise_templates(stage_id: &str, inputs: &[StageTaskInput]) -> Vec<StageTaskTemplate> {
    inputs
        .iter()
        .filter(|t| !t.name.trim().is_empty())
        .enumerate()
        .map(|(index, input)| {
            let task_id = new_id();
            let subtasks = input
                .subtasks
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .enumerate()
                .map(|(sub_index, name)| StageSubtaskTemplate {
                    id: new_id(),
                    stage_task_id: task_id.clone(),
                    name: name.to_string(),
                    sort_order: sub_index as i32,
                })
                .collect();
            StageTaskTemplate {
                id: task_id,
                stage_id: stage_id.to_string(),
                name: input.name.trim().to_string(),
                sort_order: index as i32,
                subtasks,
            }
        })
        .collect()
}

/// Parse an ISO calendar date (`YYYY-MM-DD`). Blank input means no date.
pub fn parse_date(s: &str) -> Result<Option<NaiveDate>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| FlowError::validation(format!("Invalid date format: {s}")))
}

const DATE_TIME_FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Parse a work log timestamp: `YYYY-MM-DD HH:MM[:SS]`, with a space or a `T`.
pub fn parse_work_time(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| FlowError::validation(format!("Invalid work time format: {s}")))
}

/// Resolve an identifier (exact id, or case-insensitive unique name) to an id.
pub fn resolve_identifier<'a>(
    entity: &'static str,
    identifier: &str,
    candidates: impl IntoIterator<Item = (&'a str, &'a str)> + Clone,
) -> Result<String> {
    let identifier = identifier.trim();
    if let Some((id, _)) = candidates.clone().into_iter().find(|(id, _)| *id == identifier) {
        return Ok(id.to_string());
    }

    let wanted = identifier.to_lowercase();
    let matches: Vec<(&str, &str)> = candidates
        .into_iter()
        .filter(|(_, name)| name.trim().to_lowercase() == wanted)
        .collect();

    match matches.as_slice() {
        [] => Err(FlowError::not_found(entity, identifier)),
        [(id, _)] => Ok(id.to_string()),
        many => {
            let mut msg = format!("Multiple {entity}s named '{identifier}':\n");
            for (id, name) in many {
                msg.push_str(&format!("  {id}: {name}\n"));
            }
            msg.push_str("Please use the id instead.");
            Err(FlowError::validation(msg))
        }
    }
}

/// Format an optional date for tables.
pub fn format_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
}

/// Truncate a string to a maximum width, adding an ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out = String::new();
        for (i, ch) in s.chars().enumerate() {
            if i + 1 >= width {
                out.push('…');
                break;
            }
            out.push(ch);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: Database,
        stage: String,
        other_stage: String,
        template: String,
        project: String,
        module: String,
    }

    fn fixture() -> Fixture {
        let mut db = Database::default();
        let plan = db
            .create_stage(
                "Plan",
                &[StageTaskInput { name: "Kickoff".into(), subtasks: vec!["Agenda".into()] }],
            )
            .unwrap();
        let build = db.create_stage("Build", &[]).unwrap();
        let wf = db.create_workflow("Default", &[plan.id.clone(), build.id.clone()]).unwrap();
        let project = db.create_project("Apollo", &wf.id).unwrap();
        let module = db.create_module(&project.id, "Engine", None).unwrap();
        Fixture {
            template: plan.tasks[0].id.clone(),
            stage: plan.id,
            other_stage: build.id,
            project: project.id,
            module: module.id,
            db,
        }
    }

    fn fields(f: &Fixture, name: &str) -> TaskFields {
        TaskFields {
            project_id: f.project.clone(),
            stage_id: f.stage.clone(),
            name: name.into(),
            priority: "中".into(),
            status: "未开始".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_task_assigns_id_and_trims() {
        let mut f = fixture();
        let mut input = fields(&f, "  Draft PRD ");
        input.description = "  notes ".into();
        input.start_date = Some("2024-03-01".into());
        let task = f.db.create_task(&input).unwrap();
        assert!(!task.id.is_empty());
        assert_eq!(task.name, "Draft PRD");
        assert_eq!(task.description, "notes");
        assert_eq!(task.start_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(f.db.tasks.len(), 1);
    }

    #[test]
    fn test_both_parents_rejected() {
        let mut f = fixture();
        let parent = f.db.create_task(&fields(&f, "parent")).unwrap();
        let mut input = fields(&f, "child");
        input.parent_task_id = Some(parent.id);
        input.parent_stage_task_id = Some(f.template.clone());
        let err = f.db.create_task(&input).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(f.db.tasks.len(), 1);
    }

    #[test]
    fn test_template_parent_must_match_stage() {
        let mut f = fixture();
        let mut input = fields(&f, "t");
        input.stage_id = f.other_stage.clone();
        input.parent_stage_task_id = Some(f.template.clone());
        let err = f.db.create_task(&input).unwrap_err();
        assert_eq!(err.to_string(), "Parent stage task belongs to a different stage");

        input.parent_stage_task_id = Some("missing".into());
        let err = f.db.create_task(&input).unwrap_err();
        assert_eq!(err.to_string(), "Parent stage task not found");
    }

    #[test]
    fn test_module_must_belong_to_project() {
        let mut f = fixture();
        let wf = f.db.workflows[0].id.clone();
        let other = f.db.create_project("Other", &wf).unwrap();
        let foreign = f.db.create_module(&other.id, "Foreign", None).unwrap();

        let mut input = fields(&f, "t");
        input.module_id = Some(foreign.id);
        let err = f.db.create_task(&input).unwrap_err();
        assert_eq!(err.to_string(), "Module does not belong to the selected project");

        input.module_id = Some(f.module.clone());
        assert!(f.db.create_task(&input).is_ok());
    }

    #[test]
    fn test_missing_project_rejected() {
        let mut f = fixture();
        let mut input = fields(&f, "t");
        input.project_id = "nope".into();
        let err = f.db.create_task(&input).unwrap_err();
        assert_eq!(err.to_string(), "Project not found");
    }

    #[test]
    fn test_blank_required_fields_rejected() {
        let mut f = fixture();
        for (patch, msg) in [
            (TaskFields { name: " ".into(), ..fields(&f, "x") }, "Task name is required"),
            (TaskFields { stage_id: "".into(), ..fields(&f, "x") }, "Stage is required"),
            (TaskFields { priority: "".into(), ..fields(&f, "x") }, "Task priority is required"),
            (TaskFields { status: "\t".into(), ..fields(&f, "x") }, "Task status is required"),
        ] {
            let err = f.db.create_task(&patch).unwrap_err();
            assert_eq!(err.to_string(), msg);
        }
        assert!(f.db.tasks.is_empty());
    }

    #[test]
    fn test_malformed_date_names_value() {
        let mut f = fixture();
        let mut input = fields(&f, "t");
        input.end_date = Some("2024/13/01".into());
        let err = f.db.create_task(&input).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("2024/13/01"));
    }

    #[test]
    fn test_work_logs_sorted_and_blank_entries_dropped() {
        let mut f = fixture();
        let mut input = fields(&f, "t");
        input.work_logs = vec![
            WorkLogInput { work_time: "2024-03-02 09:00".into(), content: "second".into() },
            WorkLogInput { work_time: "".into(), content: "  ".into() },
            WorkLogInput { work_time: "2024-03-01T18:30:00".into(), content: "first".into() },
        ];
        let task = f.db.create_task(&input).unwrap();
        let contents: Vec<_> = task.work_logs.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert!(task.work_logs.iter().all(|l| l.task_id == task.id));

        input.work_logs = vec![WorkLogInput { work_time: "".into(), content: "orphan".into() }];
        assert!(f.db.create_task(&input).unwrap_err().is_validation());
    }

    #[test]
    fn test_update_keeps_project_and_replaces_logs() {
        let mut f = fixture();
        let mut input = fields(&f, "t");
        input.work_logs = vec![WorkLogInput { work_time: "2024-01-01 10:00".into(), content: "a".into() }];
        let task = f.db.create_task(&input).unwrap();

        let mut update = TaskFields::from_task(&task);
        update.project_id = "ignored".into();
        update.status = "进行中".into();
        update.work_logs = vec![WorkLogInput { work_time: "2024-01-02 10:00".into(), content: "b".into() }];
        let updated = f.db.update_task(&task.id, &update).unwrap();

        assert_eq!(updated.project_id, f.project);
        assert_eq!(updated.status, "进行中");
        assert_eq!(updated.work_logs.len(), 1);
        assert_eq!(updated.work_logs[0].content, "b");
        assert_eq!(f.db.get(&task.id), Some(&updated));
    }

    #[test]
    fn test_update_from_task_keeps_untouched_fields() {
        let mut f = fixture();
        let input = TaskFields {
            module_id: Some(f.module.clone()),
            parent_stage_task_id: Some(f.template.clone()),
            description: "scope notes".into(),
            start_date: Some("2024-03-01".into()),
            end_date: Some("2024-03-09".into()),
            work_logs: vec![
                WorkLogInput { work_time: "2024-03-01 18:30:45".into(), content: "draft".into() },
                WorkLogInput { work_time: "2024-03-02T08:05".into(), content: "review".into() },
            ],
            ..fields(&f, "Draft PRD")
        };
        let before = f.db.create_task(&input).unwrap();

        let mut edit = TaskFields::from_task(&before);
        edit.status = "进行中".into();
        let after = f.db.update_task(&before.id, &edit).unwrap();

        assert_eq!(after.status, "进行中");
        let logs = |t: &Task| t.work_logs.iter().map(|l| (l.work_time, l.content.clone())).collect::<Vec<_>>();
        assert_eq!(logs(&after), logs(&before));
        assert_eq!(after.work_logs[0].work_time, parse_work_time("2024-03-01 18:30:45").unwrap());
        assert_eq!(
            (&after.module_id, &after.parent_stage_task_id, &after.description, after.start_date, after.end_date),
            (&before.module_id, &before.parent_stage_task_id, &before.description, before.start_date, before.end_date)
        );
        assert_eq!(TaskFields::from_task(&after), TaskFields { status: "进行中".into(), ..TaskFields::from_task(&before) });
    }

    #[test]
    fn test_update_missing_task_is_not_found() {
        let mut f = fixture();
        let input = fields(&f, "t");
        assert!(f.db.update_task("ghost", &input).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_rejects_parent_cycle() {
        let mut f = fixture();
        let a = f.db.create_task(&fields(&f, "a")).unwrap();
        let mut child = fields(&f, "b");
        child.parent_task_id = Some(a.id.clone());
        let b = f.db.create_task(&child).unwrap();

        let mut update = TaskFields::from_task(&a);
        update.parent_task_id = Some(b.id.clone());
        let err = f.db.update_task(&a.id, &update).unwrap_err();
        assert_eq!(err.to_string(), "Setting parent would create a cycle");

        update.parent_task_id = Some(a.id.clone());
        let err = f.db.update_task(&a.id, &update).unwrap_err();
        assert_eq!(err.to_string(), "Parent cannot equal child");
    }

    #[test]
    fn test_delete_cascades_through_parent_links() {
        let mut f = fixture();
        let a = f.db.create_task(&fields(&f, "A")).unwrap();
        let b = f.db.create_task(&TaskFields { parent_task_id: Some(a.id.clone()), ..fields(&f, "B") }).unwrap();
        let c = f.db.create_task(&TaskFields { parent_task_id: Some(b.id.clone()), ..fields(&f, "C") }).unwrap();
        let t = f
            .db
            .create_task(&TaskFields { parent_stage_task_id: Some(f.template.clone()), ..fields(&f, "T") })
            .unwrap();

        let removed = f.db.delete_task(&b.id).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(f.db.get(&a.id).is_some());
        assert!(f.db.get(&c.id).is_none());

        f.db.delete_task(&a.id).unwrap();
        assert_eq!(f.db.tasks.len(), 1);
        assert_eq!(f.db.tasks[0].id, t.id);
    }

    #[test]
    fn test_delete_missing_task_changes_nothing() {
        let mut f = fixture();
        f.db.create_task(&fields(&f, "A")).unwrap();
        let before = f.db.clone();
        assert!(f.db.delete_task("ghost").unwrap_err().is_not_found());
        assert_eq!(f.db, before);
    }

    #[test]
    fn test_stage_templates_normalised_and_replaced() {
        let mut f = fixture();
        let inputs = vec![
            StageTaskInput { name: " Review ".into(), subtasks: vec!["".into(), " Notes ".into()] },
            StageTaskInput { name: "   ".into(), subtasks: vec!["dropped".into()] },
            StageTaskInput { name: "Ship".into(), subtasks: vec![] },
        ];
        let old_template = f.template.clone();
        let stage = f.db.replace_stage(&f.stage, " Plan v2 ", &inputs).unwrap();
        assert_eq!(stage.name, "Plan v2");
        assert_eq!(stage.tasks.len(), 2);
        assert_eq!(stage.tasks[0].name, "Review");
        assert_eq!(stage.tasks[0].subtasks.len(), 1);
        assert_eq!(stage.tasks[0].subtasks[0].name, "Notes");
        assert_eq!(stage.tasks[0].subtasks[0].stage_task_id, stage.tasks[0].id);
        assert_eq!(stage.tasks[1].sort_order, 1);
        assert!(f.db.template(&old_template).is_none());
        assert!(f.db.replace_stage("ghost", "x", &[]).unwrap_err().is_not_found());

        let kept = stage.tasks[0].id.clone();
        f.db.rename_stage(&f.stage, "Plan v3").unwrap();
        assert!(f.db.template(&kept).is_some());
    }

    #[test]
    fn test_workflow_validates_stage_ids() {
        let mut f = fixture();
        let err = f.db.create_workflow("wf", &["missing".into()]).unwrap_err();
        assert!(err.is_validation());
        let wf = f
            .db
            .create_workflow("wf", &[f.other_stage.clone(), f.stage.clone(), f.other_stage.clone()])
            .unwrap();
        assert_eq!(wf.stage_ids, vec![f.other_stage.clone(), f.stage.clone()]);
    }

    #[test]
    fn test_module_with_tasks_cannot_change_project() {
        let mut f = fixture();
        let wf = f.db.workflows[0].id.clone();
        let other = f.db.create_project("Other", &wf).unwrap();
        f.db
            .create_task(&TaskFields { module_id: Some(f.module.clone()), ..fields(&f, "t") })
            .unwrap();
        let err = f.db.update_module(&f.module, &other.id, "Engine", None).unwrap_err();
        assert!(err.is_validation());
        let renamed = f.db.update_module(&f.module, &f.project, "Motor", Some(wf.as_str())).unwrap();
        assert_eq!(renamed.name, "Motor");
        assert_eq!(renamed.workflow_id.as_deref(), Some(wf.as_str()));
    }

    #[test]
    fn test_resolve_by_id_or_unique_name() {
        let mut f = fixture();
        assert_eq!(f.db.resolve_stage("plan").unwrap(), f.stage);
        assert_eq!(f.db.resolve_stage(&f.stage).unwrap(), f.stage);
        assert!(f.db.resolve_stage("nothing").unwrap_err().is_not_found());

        f.db.create_stage("PLAN", &[]).unwrap();
        let err = f.db.resolve_stage("Plan").unwrap_err();
        assert!(err.to_string().starts_with("Multiple stages named 'Plan'"));

        assert_eq!(f.db.resolve_template("kickoff", &f.stage).unwrap(), f.template);
        assert!(f.db.resolve_template("kickoff", &f.other_stage).is_err());
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        let mut f = fixture();
        f.db.save(&path).unwrap();

        let before = f.db.clone();
        let bad = TaskFields { name: "".into(), ..fields(&f, "x") };
        assert!(f.db.commit(&path, |db| db.create_task(&bad)).is_err());
        assert_eq!(f.db, before);
        assert_eq!(Database::load(&path).unwrap(), before);

        let good = fields(&f, "ok");
        let task = f.db.commit(&path, |db| db.create_task(&good)).unwrap();
        let reloaded = Database::load(&path).unwrap();
        assert_eq!(reloaded.get(&task.id).map(|t| t.name.as_str()), Some("ok"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_empty_and_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.json");
        assert_eq!(Database::load(&path).unwrap(), Database::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Database::load(&path), Err(FlowError::Json(_))));
    }

    #[test]
    fn test_snapshot_uses_camel_case() {
        let mut f = fixture();
        f.db.create_task(&fields(&f, "t")).unwrap();
        let json = serde_json::to_string(&f.db).unwrap();
        assert!(json.contains("\"taskTypes\""));
        assert!(json.contains("\"parentStageTaskId\""));
        assert!(json.contains("\"sortOrder\""));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_date("").unwrap(), None);
        assert!(parse_date("tomorrow").is_err());
        assert!(parse_work_time("2024-05-01 08:15").is_ok());
        assert!(parse_work_time("2024-05-01").is_err());
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(normalise_ref(Some("  ")), None);
    }
}
