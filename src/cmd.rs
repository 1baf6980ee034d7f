//! Command implementations for the CLI interface.
//!
//! Each subcommand resolves its arguments (ids or unique names) against the loaded
//! snapshot, runs the store operation inside [`Database::commit`] when it writes,
//! and prints a short report.

use std::path::Path;

use clap::{Args, Subcommand};
use clap_complete::{generate, Shell};
use tracing::debug;

use crate::aggregate::{aggregate, format_share, DashboardConfig, DashboardOptions};
use crate::db::*;
use crate::error::{FlowError, Result};
use crate::fields::*;
use crate::filter::{filter_group, FilteredRow, TimeFilter};
use crate::model::*;
use crate::selection::{stage_options, stage_order, Scope, Selection};
use crate::tree::{build_board, template_summary, Board};

#[derive(Subcommand)]
pub enum Commands {
    /// Manage stages and their checklist templates.
    Stage {
        #[command(subcommand)]
        action: StageAction,
    },

    /// Manage task types.
    #[command(name = "type")]
    Type {
        #[command(subcommand)]
        action: TypeAction,
    },

    /// Manage workflows (ordered stage lists).
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage modules of a project.
    Module {
        #[command(subcommand)]
        action: ModuleAction,
    },

    /// Manage tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Print the stage board of a module or of the project tasks.
    Board {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Date the time filter looks at: start | end | work.
        #[arg(long, value_enum, default_value_t = TimeField::Start)]
        filter: TimeField,
        /// Lower bound (YYYY-MM-DD or YYYY-MM-DD HH:MM), inclusive.
        #[arg(long)]
        from: Option<String>,
        /// Upper bound (YYYY-MM-DD or YYYY-MM-DD HH:MM), inclusive.
        #[arg(long)]
        to: Option<String>,
    },

    /// Count a project's tasks grouped by stage, type, priority and/or status.
    Dashboard {
        /// Project id or name (defaults to the first project).
        #[arg(long)]
        project: Option<String>,
        /// Modules to count, comma-separated ids or names (default: all).
        #[arg(long, value_delimiter = ',')]
        modules: Vec<String>,
        /// Group by this dimension. May be repeated (default: status).
        #[arg(long = "by", value_enum)]
        by: Vec<Dimension>,
        /// Only count tasks whose DIM equals VALUE, e.g. status=进行中. May be repeated.
        #[arg(long)]
        only: Vec<String>,
        /// Split groups per module (needs at least two selected modules).
        #[arg(long)]
        distinguish_modules: bool,
    },

    /// Print the whole snapshot as JSON.
    Snapshot,

    /// Launch the interactive board.
    Ui {
        /// Project id or name.
        #[arg(long)]
        project: Option<String>,
        /// Module id or name.
        #[arg(long)]
        module: Option<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which part of a project a command looks at.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Project id or name (defaults to the first project).
    #[arg(long)]
    pub project: Option<String>,
    /// Module id or name.
    #[arg(long, conflicts_with = "project_tasks")]
    pub module: Option<String>,
    /// Tasks of the project that belong to no module (default).
    #[arg(long)]
    pub project_tasks: bool,
}

#[derive(Subcommand)]
pub enum StageAction {
    /// List stages with their templates.
    List {
        /// Put this workflow's stages first, in process order.
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Create a stage.
    Add {
        name: String,
        /// Template task as `Name` or `Name:Sub1,Sub2`. May be repeated.
        #[arg(long = "template")]
        templates: Vec<String>,
    },
    /// Rename a stage and/or replace its templates.
    Edit {
        /// Stage id or name.
        stage: String,
        #[arg(long)]
        name: Option<String>,
        /// Replacement template list; template ids are regenerated.
        #[arg(long = "template")]
        templates: Vec<String>,
        /// Remove every template.
        #[arg(long)]
        clear_templates: bool,
    },
}

#[derive(Subcommand)]
pub enum TypeAction {
    /// List task types.
    List,
    /// Create a task type.
    Add { name: String },
    /// Rename a task type.
    Edit {
        /// Task type id or name.
        task_type: String,
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// List workflows with their stage order.
    List,
    /// Create a workflow.
    Add {
        name: String,
        /// Stage id or name, in process order. May be repeated.
        #[arg(long = "stage")]
        stages: Vec<String>,
    },
    /// Rename a workflow and/or replace its stage order.
    Edit {
        /// Workflow id or name.
        workflow: String,
        #[arg(long)]
        name: Option<String>,
        /// New stage order. May be repeated.
        #[arg(long = "stage")]
        stages: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ProjectAction {
    /// List projects.
    List,
    /// Create a project.
    Add {
        name: String,
        /// Workflow id or name.
        #[arg(long)]
        workflow: String,
    },
    /// Rename a project and/or change its workflow.
    Edit {
        /// Project id or name.
        project: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        workflow: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ModuleAction {
    /// List modules, optionally of one project.
    List {
        #[arg(long)]
        project: Option<String>,
    },
    /// Create a module.
    Add {
        name: String,
        /// Project id or name (defaults to the first project).
        #[arg(long)]
        project: Option<String>,
        /// Own workflow; without it the project's workflow applies.
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Edit a module.
    Edit {
        /// Module id or name.
        module: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, conflicts_with = "inherit_workflow")]
        workflow: Option<String>,
        /// Drop the module's own workflow and follow the project's.
        #[arg(long)]
        inherit_workflow: bool,
    },
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// List tasks of a module or of the project tasks.
    List {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Every task of every project, ignoring the scope options.
        #[arg(long)]
        all: bool,
    },
    /// Add a task.
    Add {
        name: String,
        /// Project id or name (defaults to the first project).
        #[arg(long)]
        project: Option<String>,
        /// Module id or name.
        #[arg(long)]
        module: Option<String>,
        /// Stage id or name.
        #[arg(long)]
        stage: String,
        /// Task type id or name.
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        desc: Option<String>,
        /// 低 | 中 | 高, or any other label.
        #[arg(long, default_value = DEFAULT_PRIORITY)]
        priority: String,
        /// 未开始 | 进行中 | 已完成, or any other label.
        #[arg(long, default_value = DEFAULT_STATUS)]
        status: String,
        /// Start date, YYYY-MM-DD.
        #[arg(long)]
        start: Option<String>,
        /// End date, YYYY-MM-DD.
        #[arg(long)]
        end: Option<String>,
        /// Parent task id or name.
        #[arg(long)]
        parent: Option<String>,
        /// Parent template task (of the same stage), id or name.
        #[arg(long)]
        template_parent: Option<String>,
        /// Work log as `YYYY-MM-DD HH:MM=content`. May be repeated.
        #[arg(long = "log")]
        logs: Vec<String>,
    },
    /// Edit a task. Unset options keep their current value.
    Edit {
        /// Task id or name.
        task: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        clear_module: bool,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        clear_type: bool,
        #[arg(long)]
        desc: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        clear_start: bool,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        clear_end: bool,
        /// Parent task id or name.
        #[arg(long)]
        parent: Option<String>,
        /// Parent template task id or name.
        #[arg(long)]
        template_parent: Option<String>,
        /// Detach from any parent.
        #[arg(long)]
        clear_parent: bool,
        /// Append a work log (`YYYY-MM-DD HH:MM=content`). May be repeated.
        #[arg(long = "log")]
        logs: Vec<String>,
        /// Drop existing work logs before appending.
        #[arg(long)]
        clear_logs: bool,
    },
    /// Show one task with its work logs.
    View {
        /// Task id or name.
        task: String,
    },
    /// Delete a task and all of its subtasks.
    Delete {
        /// Task id or name.
        task: String,
    },
    /// List the parents a new task in a stage could hang under.
    Parents {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Stage id or name.
        #[arg(long)]
        stage: String,
    },
}

// ---- argument helpers ------------------------------------------------------------

/// Parse `Name` or `Name:Sub1,Sub2` into a template input. Blank parts are left
/// for the store to drop.
pub fn parse_template_spec(spec: &str) -> StageTaskInput {
    match spec.split_once(':') {
        Some((name, subs)) => StageTaskInput {
            name: name.trim().to_string(),
            subtasks: subs.split(',').map(|s| s.trim().to_string()).collect(),
        },
        None => StageTaskInput { name: spec.trim().to_string(), subtasks: Vec::new() },
    }
}

/// Parse `YYYY-MM-DD HH:MM=content`. The time itself is validated by the store.
pub fn parse_log_spec(spec: &str) -> Result<WorkLogInput> {
    let (time, content) = spec
        .split_once('=')
        .ok_or_else(|| FlowError::validation(format!("Work log must look like 'YYYY-MM-DD HH:MM=content': {spec}")))?;
    Ok(WorkLogInput { work_time: time.trim().to_string(), content: content.trim().to_string() })
}

/// The named project, or the first project when none is named.
pub fn resolve_project_or_first(db: &Database, project: Option<&str>) -> Result<String> {
    match project {
        Some(p) => db.resolve_project(p),
        None => db
            .projects
            .first()
            .map(|p| p.id.clone())
            .ok_or_else(|| FlowError::validation("No project yet; create one with `ft project add`")),
    }
}

/// Build a board selection from scope arguments.
pub fn resolve_selection(db: &Database, scope: &ScopeArgs) -> Result<Selection> {
    let project_id = resolve_project_or_first(db, scope.project.as_deref())?;
    let scope = match scope.module.as_deref() {
        Some(m) => Scope::Module(db.resolve_module(m, Some(project_id.as_str()))?),
        None => Scope::ProjectTasks,
    };
    Ok(Selection::new(Some(project_id), scope))
}

/// Template parent given by exact id anywhere, or by name within the stage. An id
/// from another stage is passed through so the store can reject it.
fn resolve_template_parent(db: &Database, identifier: &str, stage_id: &str) -> Result<String> {
    let identifier = identifier.trim();
    if db.template(identifier).is_some() {
        return Ok(identifier.to_string());
    }
    db.resolve_template(identifier, stage_id)
}

fn name_or_dash<'a>(name: Option<&'a str>) -> &'a str {
    name.filter(|n| !n.trim().is_empty()).unwrap_or("-")
}

// ---- stages, types, workflows, projects, modules ---------------------------------

pub fn cmd_stage(db: &mut Database, db_path: &Path, action: StageAction) -> Result<()> {
    match action {
        StageAction::List { workflow } => {
            let stages: Vec<&Stage> = match workflow {
                Some(w) => {
                    let id = db.resolve_workflow(&w)?;
                    stage_options(db, db.workflow(&id))
                }
                None => db.list_stages().iter().collect(),
            };
            println!("{:<36}  {:<16} Templates", "ID", "Name");
            for stage in stages {
                let summary = template_summary(stage);
                println!(
                    "{:<36}  {:<16} {}",
                    stage.id,
                    truncate(&stage.name, 16),
                    if summary.is_empty() { "-" } else { &summary }
                );
            }
        }
        StageAction::Add { name, templates } => {
            let inputs: Vec<StageTaskInput> = templates.iter().map(|t| parse_template_spec(t)).collect();
            let stage = db.commit(db_path, |db| db.create_stage(&name, &inputs))?;
            println!("Added stage {} ({}) with {} templates.", stage.name, stage.id, stage.tasks.len());
        }
        StageAction::Edit { stage, name, templates, clear_templates } => {
            let id = db.resolve_stage(&stage)?;
            let current = db.stage(&id).ok_or_else(|| FlowError::not_found("stage", &id))?;
            let name = name.unwrap_or_else(|| current.name.clone());
            let stage = if !templates.is_empty() || clear_templates {
                let inputs: Vec<StageTaskInput> = templates.iter().map(|t| parse_template_spec(t)).collect();
                db.commit(db_path, |db| db.replace_stage(&id, &name, &inputs))?
            } else {
                db.commit(db_path, |db| db.rename_stage(&id, &name))?
            };
            println!("Updated stage {} ({}).", stage.name, stage.id);
        }
    }
    Ok(())
}

pub fn cmd_type(db: &mut Database, db_path: &Path, action: TypeAction) -> Result<()> {
    match action {
        TypeAction::List => {
            println!("{:<36}  Name", "ID");
            for t in db.list_task_types() {
                println!("{:<36}  {}", t.id, t.name);
            }
        }
        TypeAction::Add { name } => {
            let t = db.commit(db_path, |db| db.create_task_type(&name))?;
            println!("Added task type {} ({}).", t.name, t.id);
        }
        TypeAction::Edit { task_type, name } => {
            let id = db.resolve_task_type(&task_type)?;
            let t = db.commit(db_path, |db| db.rename_task_type(&id, &name))?;
            println!("Renamed task type to {} ({}).", t.name, t.id);
        }
    }
    Ok(())
}

pub fn cmd_workflow(db: &mut Database, db_path: &Path, action: WorkflowAction) -> Result<()> {
    match action {
        WorkflowAction::List => {
            println!("{:<36}  {:<16} Stages", "ID", "Name");
            for w in db.list_workflows() {
                let stages: Vec<&str> = w
                    .stage_ids
                    .iter()
                    .map(|sid| db.stage(sid).map_or("?", |s| s.name.as_str()))
                    .collect();
                println!("{:<36}  {:<16} {}", w.id, truncate(&w.name, 16), stages.join(" → "));
            }
        }
        WorkflowAction::Add { name, stages } => {
            let ids = stages.iter().map(|s| db.resolve_stage(s)).collect::<Result<Vec<_>>>()?;
            let w = db.commit(db_path, |db| db.create_workflow(&name, &ids))?;
            println!("Added workflow {} ({}) with {} stages.", w.name, w.id, w.stage_ids.len());
        }
        WorkflowAction::Edit { workflow, name, stages } => {
            let id = db.resolve_workflow(&workflow)?;
            let current = db.workflow(&id).ok_or_else(|| FlowError::not_found("workflow", &id))?;
            let name = name.unwrap_or_else(|| current.name.clone());
            let ids = if stages.is_empty() {
                current.stage_ids.clone()
            } else {
                stages.iter().map(|s| db.resolve_stage(s)).collect::<Result<Vec<_>>>()?
            };
            let w = db.commit(db_path, |db| db.update_workflow(&id, &name, &ids))?;
            println!("Updated workflow {} ({}).", w.name, w.id);
        }
    }
    Ok(())
}

pub fn cmd_project(db: &mut Database, db_path: &Path, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::List => {
            println!("{:<36}  {:<20} {:<16} Modules", "ID", "Name", "Workflow");
            for p in db.list_projects() {
                let workflow = db.workflow(&p.workflow_id).map_or("?", |w| w.name.as_str());
                println!(
                    "{:<36}  {:<20} {:<16} {}",
                    p.id,
                    truncate(&p.name, 20),
                    truncate(workflow, 16),
                    db.modules_of(&p.id).len()
                );
            }
        }
        ProjectAction::Add { name, workflow } => {
            let workflow_id = db.resolve_workflow(&workflow)?;
            let p = db.commit(db_path, |db| db.create_project(&name, &workflow_id))?;
            println!("Added project {} ({}).", p.name, p.id);
        }
        ProjectAction::Edit { project, name, workflow } => {
            let id = db.resolve_project(&project)?;
            let current = db.project(&id).ok_or_else(|| FlowError::not_found("project", &id))?;
            let name = name.unwrap_or_else(|| current.name.clone());
            let workflow_id = match workflow {
                Some(w) => db.resolve_workflow(&w)?,
                None => current.workflow_id.clone(),
            };
            let p = db.commit(db_path, |db| db.update_project(&id, &name, &workflow_id))?;
            println!("Updated project {} ({}).", p.name, p.id);
        }
    }
    Ok(())
}

pub fn cmd_module(db: &mut Database, db_path: &Path, action: ModuleAction) -> Result<()> {
    match action {
        ModuleAction::List { project } => {
            let project_id = project.map(|p| db.resolve_project(&p)).transpose()?;
            println!("{:<36}  {:<20} {:<20} Workflow", "ID", "Name", "Project");
            for m in db.list_modules(project_id.as_deref()) {
                let project = db.project(&m.project_id).map_or("?", |p| p.name.as_str());
                let workflow = match m.workflow_id.as_deref() {
                    Some(w) => db.workflow(w).map_or("?", |w| w.name.as_str()),
                    None => "(project)",
                };
                println!("{:<36}  {:<20} {:<20} {}", m.id, truncate(&m.name, 20), truncate(project, 20), workflow);
            }
        }
        ModuleAction::Add { name, project, workflow } => {
            let project_id = resolve_project_or_first(db, project.as_deref())?;
            let workflow_id = workflow.map(|w| db.resolve_workflow(&w)).transpose()?;
            let m = db.commit(db_path, |db| db.create_module(&project_id, &name, workflow_id.as_deref()))?;
            println!("Added module {} ({}).", m.name, m.id);
        }
        ModuleAction::Edit { module, name, project, workflow, inherit_workflow } => {
            let id = db.resolve_module(&module, None)?;
            let current = db.module(&id).ok_or_else(|| FlowError::not_found("module", &id))?;
            let name = name.unwrap_or_else(|| current.name.clone());
            let project_id = match project {
                Some(p) => db.resolve_project(&p)?,
                None => current.project_id.clone(),
            };
            let workflow_id = match (workflow, inherit_workflow) {
                (Some(w), _) => Some(db.resolve_workflow(&w)?),
                (None, true) => None,
                (None, false) => current.workflow_id.clone(),
            };
            let m = db.commit(db_path, |db| db.update_module(&id, &project_id, &name, workflow_id.as_deref()))?;
            println!("Updated module {} ({}).", m.name, m.id);
        }
    }
    Ok(())
}

// ---- tasks -----------------------------------------------------------------------

pub fn cmd_task(db: &mut Database, db_path: &Path, action: TaskAction) -> Result<()> {
    match action {
        TaskAction::List { scope, all } => {
            let tasks: Vec<&Task> = if all {
                db.list_tasks().iter().collect()
            } else {
                resolve_selection(db, &scope)?.tasks_in_scope(db)
            };
            print_task_table(db, &tasks);
        }
        TaskAction::Add {
            name, project, module, stage, task_type, desc, priority, status, start, end,
            parent, template_parent, logs,
        } => {
            let project_id = resolve_project_or_first(db, project.as_deref())?;
            let stage_id = db.resolve_stage(&stage)?;
            let fields = TaskFields {
                module_id: module.map(|m| db.resolve_module(&m, Some(project_id.as_str()))).transpose()?,
                task_type_id: task_type.map(|t| db.resolve_task_type(&t)).transpose()?,
                parent_task_id: parent.map(|p| db.resolve_task(&p)).transpose()?,
                parent_stage_task_id: template_parent
                    .map(|t| resolve_template_parent(db, &t, &stage_id))
                    .transpose()?,
                work_logs: logs.iter().map(|l| parse_log_spec(l)).collect::<Result<Vec<_>>>()?,
                project_id,
                stage_id,
                name,
                description: desc.unwrap_or_default(),
                priority,
                status,
                start_date: start,
                end_date: end,
            };
            let task = db.commit(db_path, |db| db.create_task(&fields))?;
            println!("Added task {} ({}).", task.name, task.id);
        }
        TaskAction::Edit {
            task, name, module, clear_module, stage, task_type, clear_type, desc, priority, status,
            start, clear_start, end, clear_end, parent, template_parent, clear_parent, logs, clear_logs,
        } => {
            let id = db.resolve_task(&task)?;
            let current = db.get(&id).ok_or_else(|| FlowError::not_found("task", &id))?;
            let mut fields = TaskFields::from_task(current);

            if let Some(name) = name {
                fields.name = name;
            }
            if clear_module {
                fields.module_id = None;
            } else if let Some(m) = module {
                fields.module_id = Some(db.resolve_module(&m, Some(current.project_id.as_str()))?);
            }
            if let Some(s) = stage {
                fields.stage_id = db.resolve_stage(&s)?;
            }
            if clear_type {
                fields.task_type_id = None;
            } else if let Some(t) = task_type {
                fields.task_type_id = Some(db.resolve_task_type(&t)?);
            }
            if let Some(d) = desc {
                fields.description = d;
            }
            if let Some(p) = priority {
                fields.priority = p;
            }
            if let Some(s) = status {
                fields.status = s;
            }
            if clear_start {
                fields.start_date = None;
            } else if start.is_some() {
                fields.start_date = start;
            }
            if clear_end {
                fields.end_date = None;
            } else if end.is_some() {
                fields.end_date = end;
            }
            if clear_parent {
                fields.parent_task_id = None;
                fields.parent_stage_task_id = None;
            }
            if let Some(p) = parent {
                fields.parent_task_id = Some(db.resolve_task(&p)?);
                fields.parent_stage_task_id = None;
            }
            if let Some(t) = template_parent {
                fields.parent_stage_task_id = Some(resolve_template_parent(db, &t, &fields.stage_id)?);
                fields.parent_task_id = None;
            }
            if clear_logs {
                fields.work_logs.clear();
            }
            for l in &logs {
                fields.work_logs.push(parse_log_spec(l)?);
            }

            let task = db.commit(db_path, |db| db.update_task(&id, &fields))?;
            println!("Updated task {} ({}).", task.name, task.id);
        }
        TaskAction::View { task } => {
            let id = db.resolve_task(&task)?;
            let task = db.get(&id).ok_or_else(|| FlowError::not_found("task", &id))?;
            print_task_detail(db, task);
        }
        TaskAction::Delete { task } => {
            let id = db.resolve_task(&task)?;
            let removed = db.commit(db_path, |db| db.delete_task(&id))?;
            println!("Deleted task {} and {} subtasks.", id, removed.len().saturating_sub(1));
        }
        TaskAction::Parents { scope, stage } => {
            let selection = resolve_selection(db, &scope)?;
            let stage_id = db.resolve_stage(&stage)?;
            let tasks = selection.tasks_in_scope(db);
            let board = build_board(tasks.iter().copied(), &db.stages, &[]);
            let rows = board.parent_options(&stage_id);
            if rows.is_empty() {
                println!("No parent candidates in this stage.");
            }
            for row in rows {
                let node = board.node(row.node);
                println!("{}{} {}  ({})", "  ".repeat(row.depth), kind_marker(node.kind), node.name, node.id);
            }
        }
    }
    Ok(())
}

fn print_task_table(db: &Database, tasks: &[&Task]) {
    println!(
        "{:<36}  {:<14} {:<10} {:<4} {:<6} {:<10} {:<10} Name",
        "ID", "Stage", "Type", "Pri", "Status", "Start", "End"
    );
    for t in tasks {
        let stage = db.stage(&t.stage_id).map_or(t.stage_id.as_str(), |s| s.name.as_str());
        let task_type = name_or_dash(t.task_type_id.as_deref().and_then(|id| db.task_type(id)).map(|t| t.name.as_str()));
        println!(
            "{:<36}  {:<14} {:<10} {:<4} {:<6} {:<10} {:<10} {}",
            t.id,
            truncate(stage, 14),
            truncate(task_type, 10),
            t.priority,
            t.status,
            format_date(t.start_date),
            format_date(t.end_date),
            t.name
        );
    }
}

fn print_task_detail(db: &Database, task: &Task) {
    let project = db.project(&task.project_id).map(|p| p.name.as_str());
    let module = task.module_id.as_deref().and_then(|m| db.module(m)).map(|m| m.name.as_str());
    let stage = db.stage(&task.stage_id).map(|s| s.name.as_str());
    let task_type = task.task_type_id.as_deref().and_then(|t| db.task_type(t)).map(|t| t.name.as_str());
    let parent = match (task.parent_task_id.as_deref(), task.parent_stage_task_id.as_deref()) {
        (Some(p), _) => db.get(p).map_or_else(|| format!("{p} (missing)"), |t| t.name.clone()),
        (None, Some(t)) => db.template(t).map_or_else(|| format!("{t} (missing template)"), |(_, tmpl)| format!("{} (template)", tmpl.name)),
        (None, None) => "-".into(),
    };
    println!("ID:           {}", task.id);
    println!("Name:         {}", task.name);
    println!("Project:      {}", name_or_dash(project));
    println!("Module:       {}", module.unwrap_or(PROJECT_TASKS_LABEL));
    println!("Stage:        {}", stage.unwrap_or(task.stage_id.as_str()));
    println!("Type:         {}", name_or_dash(task_type));
    println!("Priority:     {}", task.priority);
    println!("Status:       {}", task.status);
    println!("Start:        {}", format_date(task.start_date));
    println!("End:          {}", format_date(task.end_date));
    println!("Parent:       {}", parent);
    println!("Description:\n{}\n", if task.description.is_empty() { "-" } else { &task.description });
    if task.work_logs.is_empty() {
        println!("Work logs: -");
    } else {
        println!("Work logs:");
        for log in &task.work_logs {
            println!("  {}  {}", log.work_time.format(WORK_TIME_FORMAT), log.content);
        }
    }
}

// ---- board -----------------------------------------------------------------------

pub fn kind_marker(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Task => "•",
        NodeKind::TemplateTask => "◇",
        NodeKind::TemplateSubtask => "·",
    }
}

pub fn cmd_board(db: &Database, scope: ScopeArgs, filter: TimeField, from: Option<String>, to: Option<String>) -> Result<()> {
    let selection = resolve_selection(db, &scope)?;
    let time_filter = TimeFilter::parse(filter, from.as_deref(), to.as_deref())?;
    let workflow = selection
        .active_workflow(db)
        .ok_or_else(|| FlowError::validation("Selected project has no valid workflow"))?;
    let order = stage_order(db, Some(workflow));
    let tasks = selection.tasks_in_scope(db);
    let board = build_board(tasks.iter().copied(), &db.stages, &order);

    let project = selection.project(db).map_or("-", |p| p.name.as_str());
    println!("{} / {}  [{}]", project, selection.scope_label(db), workflow.name);
    debug!(tasks = board.task_count(), groups = board.groups.len(), "board built");

    for group in &board.groups {
        println!();
        println!("== {} ==", group.name);
        if let Some(stage) = group.stage_id.and_then(|sid| db.stage(sid)) {
            let summary = template_summary(stage);
            if !summary.is_empty() && !time_filter.is_active() {
                println!("模板：{summary}");
            }
        }
        let rows = filter_group(&board, group, &time_filter);
        if rows.is_empty() {
            println!(
                "  {}",
                if time_filter.is_active() { "(no tasks match the filter)" } else { "(no tasks)" }
            );
            continue;
        }
        print_board_rows(db, &board, &rows, time_filter.field == TimeField::Work && time_filter.is_active());
    }
    Ok(())
}

fn print_board_rows(db: &Database, board: &Board<'_>, rows: &[FilteredRow<'_>], show_logs: bool) {
    for r in rows {
        let node = board.node(r.row.node);
        let indent = "  ".repeat(r.row.depth);
        let title = format!("{indent}{} {}", kind_marker(node.kind), node.name);
        match node.task {
            Some(t) => {
                let task_type =
                    name_or_dash(t.task_type_id.as_deref().and_then(|id| db.task_type(id)).map(|t| t.name.as_str()));
                println!(
                    "  {:<40} {:<10} {:<4} {:<6} {:<10} {:<10} {}",
                    truncate(&title, 40),
                    truncate(task_type, 10),
                    t.priority,
                    t.status,
                    format_date(t.start_date),
                    format_date(t.end_date),
                    t.id
                );
                if show_logs {
                    for log in &r.logs {
                        println!("  {indent}    {}  {}", log.work_time.format(WORK_TIME_FORMAT), log.content);
                    }
                }
            }
            None => println!("  {:<40} {:<10} {:<4} {:<6} {:<10} {:<10}", truncate(&title, 40), "-", "-", "-", "-", "-"),
        }
    }
}

// ---- dashboard -------------------------------------------------------------------

/// Match an `--only` value against a dimension's options by key or label.
fn match_option_key(options: &DashboardOptions, dim: Dimension, value: &str) -> Result<String> {
    let wanted = value.trim().to_lowercase();
    options
        .of(dim)
        .iter()
        .find(|o| o.key.to_lowercase() == wanted || o.label.to_lowercase() == wanted)
        .map(|o| o.key.clone())
        .ok_or_else(|| FlowError::validation(format!("Unknown {} value: {value}", dim.label())))
}

/// Build the dashboard state from command-line toggles. Dimensions named in
/// `--only` are enabled as well.
pub fn dashboard_config(
    db: &Database,
    project_id: &str,
    options: &DashboardOptions,
    modules: &[String],
    by: &[Dimension],
    only: &[String],
    distinguish_modules: bool,
) -> Result<DashboardConfig> {
    let mut config = DashboardConfig::new(options);

    let mut filters: Vec<(Dimension, Vec<String>)> = Vec::new();
    for spec in only {
        let (dim, value) = spec
            .split_once('=')
            .ok_or_else(|| FlowError::validation(format!("--only expects DIM=VALUE: {spec}")))?;
        let dim = Dimension::from_key(dim).ok_or_else(|| FlowError::validation(format!("Unknown dimension: {dim}")))?;
        let key = match_option_key(options, dim, value)?;
        match filters.iter_mut().find(|(d, _)| *d == dim) {
            Some((_, keys)) => keys.push(key),
            None => filters.push((dim, vec![key])),
        }
    }

    if !by.is_empty() || !filters.is_empty() {
        for dim in Dimension::ALL {
            let wanted = by.contains(&dim) || filters.iter().any(|(d, _)| *d == dim);
            config.set_enabled(dim, wanted);
        }
        if by.is_empty() {
            config.set_enabled(Dimension::Status, true);
        }
    }
    for (dim, keys) in &filters {
        config.select_only(*dim, keys);
    }

    if !modules.is_empty() {
        let keys = modules
            .iter()
            .map(|m| {
                let m = m.trim();
                if m == UNASSIGNED_MODULE_KEY || m == UNASSIGNED_MODULE_LABEL {
                    Ok(UNASSIGNED_MODULE_KEY.to_string())
                } else {
                    db.resolve_module(m, Some(project_id))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        config.select_modules(options, &keys);
    }

    config.module_distinction = distinguish_modules;
    if distinguish_modules && !config.module_distinction_allowed() {
        return Err(FlowError::validation("Distinguishing modules needs at least two selected modules"));
    }
    Ok(config)
}

pub fn cmd_dashboard(
    db: &Database,
    project: Option<String>,
    modules: Vec<String>,
    by: Vec<Dimension>,
    only: Vec<String>,
    distinguish_modules: bool,
) -> Result<()> {
    let project_id = resolve_project_or_first(db, project.as_deref())?;
    let selection = Selection::new(Some(project_id.clone()), Scope::ProjectTasks);
    let tasks = selection.project_tasks(db);
    let project_modules = db.modules_of(&project_id);
    let options = DashboardOptions::build(&db.stages, &db.task_types, &project_modules, &tasks);
    let config = dashboard_config(db, &project_id, &options, &modules, &by, &only, distinguish_modules)?;
    let dash = aggregate(&tasks, &db.stages, &db.task_types, &project_modules, &config);

    let project = selection.project(db).map_or("-", |p| p.name.as_str());
    println!("项目“{project}”的任务分布概览  ({} tasks)", dash.total);
    if dash.groups.is_empty() {
        println!("  (no tasks match)");
        return Ok(());
    }
    println!("  {:>5}  {:>6}  Group", "Count", "Share");
    for g in &dash.groups {
        println!("  {:>5}  {:>6}  {}", g.count, format_share(g.count, dash.total), g.label);
    }
    Ok(())
}

// ---- misc ------------------------------------------------------------------------

pub fn cmd_snapshot(db: &Database) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(db)?);
    Ok(())
}

pub fn cmd_ui(db_path: &Path, project: Option<String>, module: Option<String>) -> Result<()> {
    let db = Database::load(db_path)?;
    let scope = ScopeArgs { project, module, project_tasks: false };
    let selection = if db.projects.is_empty() { Selection::default() } else { resolve_selection(&db, &scope)? };
    crate::tui::run::run_board(db_path, selection)
}

pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;
    use crate::cli::Cli;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Database, String) {
        let mut db = Database::default();
        let plan = db.create_stage("Plan", &[parse_template_spec("Kickoff:Agenda")]).unwrap();
        let wf = db.create_workflow("Default", &[plan.id.clone()]).unwrap();
        let p = db.create_project("Apollo", &wf.id).unwrap();
        db.create_module(&p.id, "Engine", None).unwrap();
        db.create_module(&p.id, "Body", None).unwrap();
        (db, p.id)
    }

    #[test]
    fn test_parse_template_spec() {
        let t = parse_template_spec(" Kickoff : Agenda, Notes ,");
        assert_eq!(t.name, "Kickoff");
        assert_eq!(t.subtasks, vec!["Agenda", "Notes", ""]);
        assert!(parse_template_spec("Review").subtasks.is_empty());
    }

    #[test]
    fn test_parse_log_spec() {
        let log = parse_log_spec("2024-03-01 09:00 = wrote draft").unwrap();
        assert_eq!(log.work_time, "2024-03-01 09:00");
        assert_eq!(log.content, "wrote draft");
        assert!(parse_log_spec("no separator").unwrap_err().is_validation());
    }

    #[test]
    fn test_resolve_selection_defaults_to_first_project() {
        let (db, project) = seeded();
        let sel = resolve_selection(&db, &ScopeArgs::default()).unwrap();
        assert_eq!(sel, Selection::new(Some(project.clone()), Scope::ProjectTasks));

        let scope = ScopeArgs { module: Some("body".into()), ..Default::default() };
        let sel = resolve_selection(&db, &scope).unwrap();
        assert_eq!(sel.scope, Scope::Module(db.modules[1].id.clone()));

        assert!(resolve_selection(&Database::default(), &ScopeArgs::default()).is_err());
    }

    #[test]
    fn test_template_parent_from_other_stage_passes_through() {
        let (mut db, _) = seeded();
        let build = db.create_stage("Build", &[]).unwrap();
        let tmpl = db.stages[0].tasks[0].id.clone();
        assert_eq!(resolve_template_parent(&db, &tmpl, &build.id).unwrap(), tmpl);
        assert!(resolve_template_parent(&db, "Kickoff", &build.id).is_err());
    }

    #[test]
    fn test_dashboard_config_from_flags() {
        let (db, project) = seeded();
        let tasks: Vec<&Task> = Vec::new();
        let modules = db.modules_of(&project);
        let options = DashboardOptions::build(&db.stages, &db.task_types, &modules, &tasks);

        let config = dashboard_config(&db, &project, &options, &[], &[Dimension::Stage], &["priority=高".into()], true)
            .unwrap();
        assert_eq!(config.active_dimensions(), vec![Dimension::Stage, Dimension::Priority]);
        assert_eq!(config.dimensions[&Dimension::Priority].selected, vec!["高".to_string()]);
        assert!(config.module_distinction_active());

        let err = dashboard_config(&db, &project, &options, &["Engine".into()], &[], &[], true).unwrap_err();
        assert!(err.is_validation());

        let err = dashboard_config(&db, &project, &options, &[], &[], &["colour=red".into()], false).unwrap_err();
        assert!(err.to_string().contains("Unknown dimension"));
    }

    #[test]
    fn test_only_without_by_keeps_status_grouping() {
        let (db, project) = seeded();
        let tasks: Vec<&Task> = Vec::new();
        let modules = db.modules_of(&project);
        let options = DashboardOptions::build(&db.stages, &db.task_types, &modules, &tasks);
        let config = dashboard_config(&db, &project, &options, &[], &[], &["stage=plan".into()], false).unwrap();
        assert_eq!(config.active_dimensions(), vec![Dimension::Stage, Dimension::Status]);
        assert_eq!(config.dimensions[&Dimension::Stage].selected, vec![db.stages[0].id.clone()]);
    }
}
