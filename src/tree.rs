//! Stage board construction.
//!
//! Real tasks and stage templates are merged into one forest per stage. Nodes live
//! in a flat arena ([`Board::nodes`]) and refer to their children by index, so the
//! structure has no back-references and can be walked without recursion hazards.
//!
//! Per stage the forest is: the stage's real root tasks, then its template tasks.
//! A template task lists its template subtasks first and then any real tasks
//! attached to it through `parent_stage_task_id`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::fields::{NodeKind, OTHER_STAGES_LABEL};
use crate::model::{Stage, Task};

pub type NodeId = usize;

/// One node of the board forest: either a real task or a template placeholder.
#[derive(Debug, Clone)]
pub struct TreeNode<'a> {
    pub kind: NodeKind,
    pub id: &'a str,
    pub name: &'a str,
    pub stage_id: &'a str,
    /// Set for `NodeKind::Task` only; templates carry no task fields.
    pub task: Option<&'a Task>,
    pub children: Vec<NodeId>,
}

/// A section of the board. `stage_id == None` marks the synthetic "other stages" group.
#[derive(Debug, Clone)]
pub struct StageGroup<'a> {
    pub stage_id: Option<&'a str>,
    pub name: String,
    pub roots: Vec<NodeId>,
    pub include_templates: bool,
}

/// A node visited by a pre-order flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatRow {
    pub node: NodeId,
    pub depth: usize,
    pub is_template: bool,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub struct Board<'a> {
    pub nodes: Vec<TreeNode<'a>>,
    pub groups: Vec<StageGroup<'a>>,
    stage_roots: HashMap<&'a str, Vec<NodeId>>,
    template_roots: HashMap<&'a str, Vec<NodeId>>,
}

impl<'a> Board<'a> {
    pub fn node(&self, id: NodeId) -> &TreeNode<'a> {
        &self.nodes[id]
    }

    /// Pre-order flattening of `roots`.
    ///
    /// With `include_templates == false` template nodes are not emitted, but their
    /// real children still are, at the depth the template would have had.
    pub fn flatten(&self, roots: &[NodeId], include_templates: bool) -> Vec<FlatRow> {
        let mut out = Vec::new();
        self.flatten_into(roots, 0, include_templates, &mut out);
        out
    }

    fn flatten_into(&self, ids: &[NodeId], depth: usize, include_templates: bool, out: &mut Vec<FlatRow>) {
        for &id in ids {
            let node = &self.nodes[id];
            let is_template = node.kind.is_template();
            if include_templates || !is_template {
                out.push(FlatRow { node: id, depth, is_template, kind: node.kind });
                self.flatten_into(&node.children, depth + 1, include_templates, out);
            } else {
                self.flatten_into(&node.children, depth, include_templates, out);
            }
        }
    }

    /// Rows of one board section, honouring the group's template policy.
    pub fn group_rows(&self, group: &StageGroup<'a>) -> Vec<FlatRow> {
        self.flatten(&group.roots, group.include_templates)
    }

    /// Candidate parents for a new task in `stage_id`: the stage's template forest
    /// followed by its real task forest.
    pub fn parent_options(&self, stage_id: &str) -> Vec<FlatRow> {
        let mut roots: Vec<NodeId> = self.template_roots.get(stage_id).cloned().unwrap_or_default();
        if let Some(real) = self.stage_roots.get(stage_id) {
            roots.extend(real.iter().copied());
        }
        self.flatten(&roots, true)
    }

    /// Number of real tasks placed on the board.
    pub fn task_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Task).count()
    }
}

/// Build the stage board for `tasks` under the workflow order `stage_order`.
///
/// Ordered stages come first, each with templates shown. Stages that tasks use but
/// the workflow does not list are gathered into a trailing "other stages" group in
/// which templates are transparent. Stage ids in `stage_order` that do not exist
/// in `stages` are treated as removed from the workflow.
///
/// Never fails: unresolvable parents degrade to stage roots.
pub fn build_board<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    stages: &'a [Stage],
    stage_order: &[String],
) -> Board<'a> {
    let mut nodes: Vec<TreeNode<'a>> = Vec::new();
    let mut index: HashMap<&'a str, NodeId> = HashMap::new();

    for t in tasks {
        if index.contains_key(t.id.as_str()) {
            debug!(task_id = %t.id, "duplicate task id ignored");
            continue;
        }
        index.insert(t.id.as_str(), nodes.len());
        nodes.push(TreeNode {
            kind: NodeKind::Task,
            id: t.id.as_str(),
            name: t.name.as_str(),
            stage_id: t.stage_id.as_str(),
            task: Some(t),
            children: Vec::new(),
        });
    }
    let task_node_count = nodes.len();

    // Attach real children to real parents.
    let mut parent_of: Vec<Option<NodeId>> = vec![None; task_node_count];
    for child in 0..task_node_count {
        let Some(task) = nodes[child].task else { continue };
        let Some(pid) = task.parent_task_id.as_deref() else { continue };
        match index.get(pid) {
            Some(&parent) if parent != child => {
                nodes[parent].children.push(child);
                parent_of[child] = Some(parent);
            }
            _ => debug!(task_id = %task.id, parent = pid, "parent task unresolved, treating as root"),
        }
    }

    break_cycles(&mut nodes, &mut parent_of);

    // File real roots under their template or their stage.
    let template_stage: HashMap<&'a str, &'a str> = stages
        .iter()
        .flat_map(|s| s.tasks.iter().map(move |tmpl| (tmpl.id.as_str(), s.id.as_str())))
        .collect();

    let mut template_children: HashMap<&'a str, Vec<NodeId>> = HashMap::new();
    let mut stage_roots: HashMap<&'a str, Vec<NodeId>> = HashMap::new();
    let mut stage_first_seen: Vec<&'a str> = Vec::new();

    for id in 0..task_node_count {
        if parent_of[id].is_some() {
            continue;
        }
        let node = &nodes[id];
        let Some(task) = node.task else { continue };
        if let Some(tmpl) = task.parent_stage_task_id.as_deref() {
            if let Some(&owner) = template_stage.get(tmpl) {
                debug!(task_id = %task.id, template = tmpl, stage = owner, "attached to template");
                template_children.entry(tmpl).or_default().push(id);
                continue;
            }
            debug!(task_id = %task.id, template = tmpl, "template parent unresolved, treating as root");
        }
        let stage = node.stage_id;
        if !stage_roots.contains_key(stage) {
            stage_first_seen.push(stage);
        }
        stage_roots.entry(stage).or_default().push(id);
    }

    // Template forests for every stage.
    let mut template_roots: HashMap<&'a str, Vec<NodeId>> = HashMap::new();
    for stage in stages {
        let mut templates: Vec<_> = stage.tasks.iter().collect();
        templates.sort_by_key(|t| t.sort_order);
        let mut roots = Vec::with_capacity(templates.len());
        for tmpl in templates {
            let mut subtasks: Vec<_> = tmpl.subtasks.iter().collect();
            subtasks.sort_by_key(|s| s.sort_order);
            let mut children = Vec::with_capacity(subtasks.len());
            for sub in subtasks {
                children.push(nodes.len());
                nodes.push(TreeNode {
                    kind: NodeKind::TemplateSubtask,
                    id: sub.id.as_str(),
                    name: sub.name.as_str(),
                    stage_id: stage.id.as_str(),
                    task: None,
                    children: Vec::new(),
                });
            }
            if let Some(attached) = template_children.get(tmpl.id.as_str()) {
                children.extend(attached.iter().copied());
            }
            roots.push(nodes.len());
            nodes.push(TreeNode {
                kind: NodeKind::TemplateTask,
                id: tmpl.id.as_str(),
                name: tmpl.name.as_str(),
                stage_id: stage.id.as_str(),
                task: None,
                children,
            });
        }
        template_roots.insert(stage.id.as_str(), roots);
    }

    // Ordered stages.
    let stage_by_id: HashMap<&str, &'a Stage> = stages.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut ordered: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();
    for sid in stage_order {
        let Some(stage) = stage_by_id.get(sid.as_str()).copied() else {
            debug!(stage_id = %sid, "workflow references a missing stage, skipping");
            continue;
        };
        if !ordered.insert(stage.id.as_str()) {
            continue;
        }
        let mut roots = stage_roots.get(stage.id.as_str()).cloned().unwrap_or_default();
        roots.extend(template_roots.get(stage.id.as_str()).into_iter().flatten().copied());
        groups.push(StageGroup {
            stage_id: Some(stage.id.as_str()),
            name: stage.name.clone(),
            roots,
            include_templates: true,
        });
    }

    // Everything the workflow does not list.
    let mut other_roots = Vec::new();
    let mut other_stage_ids: Vec<&'a str> = stages
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| !ordered.contains(id))
        .collect();
    for sid in stage_first_seen {
        if !ordered.contains(sid) && !stage_by_id.contains_key(sid) {
            other_stage_ids.push(sid);
        }
    }
    for sid in other_stage_ids {
        if let Some(real) = stage_roots.get(sid) {
            other_roots.extend(real.iter().copied());
        }
        if let Some(tmpls) = template_roots.get(sid) {
            other_roots.extend(tmpls.iter().copied());
        }
    }

    let mut board = Board { nodes, groups, stage_roots, template_roots };
    if !board.flatten(&other_roots, false).is_empty() {
        board.groups.push(StageGroup {
            stage_id: None,
            name: OTHER_STAGES_LABEL.to_string(),
            roots: other_roots,
            include_templates: false,
        });
    }
    board
}

/// Promote tasks caught in a `parent_task_id` cycle to roots.
///
/// A cycle has no member without a parent, so none of its tasks would be reachable
/// from a root. The first unreachable task in input order is detached from its
/// parent, which opens the cycle; repeat until everything is reachable.
fn break_cycles(nodes: &mut [TreeNode<'_>], parent_of: &mut [Option<NodeId>]) {
    let count = parent_of.len();
    let mut reached = vec![false; count];
    let mut stack: Vec<NodeId> = (0..count).filter(|&i| parent_of[i].is_none()).collect();
    mark(nodes, &mut reached, &mut stack);

    for id in 0..count {
        if reached[id] {
            continue;
        }
        if let Some(parent) = parent_of[id].take() {
            nodes[parent].children.retain(|&c| c != id);
            debug!(task_id = %nodes[id].id, "parent cycle broken");
        }
        stack.push(id);
        mark(nodes, &mut reached, &mut stack);
    }
}

fn mark(nodes: &[TreeNode<'_>], reached: &mut [bool], stack: &mut Vec<NodeId>) {
    while let Some(id) = stack.pop() {
        if reached[id] {
            continue;
        }
        reached[id] = true;
        stack.extend(nodes[id].children.iter().copied());
    }
}

/// One-line summary of a stage's templates: `Kickoff（Agenda、Notes）；Review`.
/// Empty when the stage has no templates.
pub fn template_summary(stage: &Stage) -> String {
    let mut templates: Vec<_> = stage.tasks.iter().collect();
    templates.sort_by_key(|t| t.sort_order);
    templates
        .into_iter()
        .filter(|t| !t.name.trim().is_empty())
        .map(|t| {
            let subs: Vec<&str> = t
                .subtasks
                .iter()
                .map(|s| s.name.trim())
                .filter(|s| !s.is_empty())
                .collect();
            if subs.is_empty() {
                t.name.trim().to_string()
            } else {
                format!("{}（{}）", t.name.trim(), subs.join("、"))
            }
        })
        .collect::<Vec<_>>()
        .join("；")
}
