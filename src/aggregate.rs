//! Dashboard aggregation: group a project's tasks by the enabled dimensions and
//! count them.
//!
//! Everything here is pure. The dashboard state ([`DashboardConfig`]) is kept
//! explicit and reconciled against fresh value options after every reload.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::trace;

use crate::fields::{Dimension, PRIORITIES, STATUSES, UNASSIGNED_MODULE_KEY, UNASSIGNED_MODULE_LABEL};
use crate::model::{Module, Stage, Task, TaskType};

/// A selectable value of a dimension (or a module).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueOption {
    pub key: String,
    pub label: String,
}

impl ValueOption {
    fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        ValueOption { key: key.into(), label: label.into() }
    }
}

/// Per-dimension toggle and value filter.
///
/// `available` remembers the options the selection was made against, so a
/// "select all" survives new values appearing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionSelection {
    pub enabled: bool,
    pub selected: Vec<String>,
    pub available: Vec<String>,
}

impl DimensionSelection {
    fn all(enabled: bool, options: &[ValueOption]) -> Self {
        let keys: Vec<String> = options.iter().map(|o| o.key.clone()).collect();
        DimensionSelection { enabled, selected: keys.clone(), available: keys }
    }

    pub fn is_full(&self) -> bool {
        !self.selected.is_empty()
            && self.selected.len() == self.available.len()
            && self.available.iter().all(|k| self.selected.contains(k))
    }

    /// Value filter in effect, `None` when every value passes.
    fn filter(&self) -> Option<HashSet<&str>> {
        if !self.enabled || self.available.is_empty() || self.selected.len() == self.available.len() {
            return None;
        }
        Some(self.selected.iter().map(String::as_str).collect())
    }
}

/// Value options for every dimension plus the module list of the project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardOptions {
    pub modules: Vec<ValueOption>,
    pub dimensions: BTreeMap<Dimension, Vec<ValueOption>>,
}

impl DashboardOptions {
    pub fn build(stages: &[Stage], task_types: &[TaskType], modules: &[&Module], tasks: &[&Task]) -> Self {
        let mut module_opts: Vec<ValueOption> =
            modules.iter().map(|m| ValueOption::new(m.id.as_str(), m.name.as_str())).collect();
        if tasks.iter().any(|t| t.module_id.is_none()) {
            module_opts.push(ValueOption::new(UNASSIGNED_MODULE_KEY, UNASSIGNED_MODULE_LABEL));
        }

        let dimensions = Dimension::ALL
            .into_iter()
            .map(|d| (d, dimension_options(d, stages, task_types, tasks)))
            .collect();
        DashboardOptions { modules: module_opts, dimensions }
    }

    pub fn of(&self, dim: Dimension) -> &[ValueOption] {
        self.dimensions.get(&dim).map(Vec::as_slice).unwrap_or_default()
    }

    fn module_keys(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.key.clone()).collect()
    }
}

/// Value options of one dimension: the "missing" sentinel, then known values,
/// then values only seen on tasks.
pub fn dimension_options(dim: Dimension, stages: &[Stage], task_types: &[TaskType], tasks: &[&Task]) -> Vec<ValueOption> {
    let mut out = vec![ValueOption::new(dim.missing_key(), dim.missing_label())];
    match dim {
        Dimension::Stage => {
            let known: HashSet<&str> = stages.iter().map(|s| s.id.as_str()).collect();
            out.extend(stages.iter().map(|s| ValueOption::new(s.id.as_str(), stage_name(s))));
            let mut extra = HashSet::new();
            for t in tasks {
                let sid = t.stage_id.as_str();
                if !sid.is_empty() && !known.contains(sid) && extra.insert(sid) {
                    out.push(ValueOption::new(sid, format!("未知阶段({sid})")));
                }
            }
        }
        Dimension::TaskType => {
            let known: HashSet<&str> = task_types.iter().map(|t| t.id.as_str()).collect();
            out.extend(task_types.iter().map(|t| ValueOption::new(t.id.as_str(), type_name(t))));
            let mut extra = HashSet::new();
            for tid in tasks.iter().filter_map(|t| t.task_type_id.as_deref()) {
                if !known.contains(tid) && extra.insert(tid) {
                    out.push(ValueOption::new(tid, format!("未知类型({tid})")));
                }
            }
        }
        Dimension::Priority => push_vocabulary(&mut out, &PRIORITIES, tasks.iter().map(|t| t.priority.as_str())),
        Dimension::Status => push_vocabulary(&mut out, &STATUSES, tasks.iter().map(|t| t.status.as_str())),
    }
    out
}

fn push_vocabulary<'a>(out: &mut Vec<ValueOption>, vocab: &[&'a str], seen_on_tasks: impl Iterator<Item = &'a str>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for value in vocab.iter().copied().chain(seen_on_tasks) {
        let value = value.trim();
        if !value.is_empty() && seen.insert(value) {
            out.push(ValueOption::new(value, value));
        }
    }
}

fn stage_name(s: &Stage) -> &str {
    if s.name.trim().is_empty() { "未命名阶段" } else { &s.name }
}

fn type_name(t: &TaskType) -> &str {
    if t.name.trim().is_empty() { "未命名类型" } else { &t.name }
}

/// Dashboard toggles: which dimensions group, which values pass, which modules count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub dimensions: BTreeMap<Dimension, DimensionSelection>,
    pub selected_modules: Vec<String>,
    pub module_distinction: bool,
}

impl DashboardConfig {
    /// Initial state: only `status` enabled, everything selected.
    pub fn new(options: &DashboardOptions) -> Self {
        let dimensions = Dimension::ALL
            .into_iter()
            .map(|d| (d, DimensionSelection::all(d == Dimension::Status, options.of(d))))
            .collect();
        DashboardConfig { dimensions, selected_modules: options.module_keys(), module_distinction: false }
    }

    /// Reconcile the selections with freshly computed options.
    ///
    /// A dimension whose selection covered every value keeps covering every value.
    /// Otherwise it keeps the still-existing values. Modules keep the surviving
    /// selection and pick up newly appeared modules; an empty result selects all.
    pub fn resync(&mut self, options: &DashboardOptions) {
        for dim in Dimension::ALL {
            let keys: Vec<String> = options.of(dim).iter().map(|o| o.key.clone()).collect();
            let entry = self
                .dimensions
                .entry(dim)
                .or_insert_with(|| DimensionSelection::all(dim == Dimension::Status, options.of(dim)));
            let selected = if entry.is_full() {
                keys.clone()
            } else {
                keys.iter().filter(|k| entry.selected.contains(k)).cloned().collect()
            };
            entry.selected = selected;
            entry.available = keys;
        }

        let module_keys = options.module_keys();
        let mut next: Vec<String> = module_keys.iter().filter(|k| self.selected_modules.contains(k)).cloned().collect();
        next.extend(module_keys.iter().filter(|k| !self.selected_modules.contains(k)).cloned());
        self.selected_modules = if next.is_empty() { module_keys } else { next };

        if !self.module_distinction_allowed() {
            self.module_distinction = false;
        }
    }

    pub fn module_distinction_allowed(&self) -> bool {
        self.selected_modules.iter().filter(|m| !m.is_empty()).count() > 1
    }

    /// Distinction is effective only with at least two selected modules.
    pub fn module_distinction_active(&self) -> bool {
        self.module_distinction && self.module_distinction_allowed()
    }

    /// Enabled dimensions in fixed order; `status` alone when none is enabled.
    pub fn active_dimensions(&self) -> Vec<Dimension> {
        let active: Vec<Dimension> = Dimension::ALL
            .into_iter()
            .filter(|d| self.dimensions.get(d).is_some_and(|s| s.enabled))
            .collect();
        if active.is_empty() { vec![Dimension::Status] } else { active }
    }

    pub fn set_enabled(&mut self, dim: Dimension, enabled: bool) {
        if let Some(entry) = self.dimensions.get_mut(&dim) {
            entry.enabled = enabled;
        }
    }

    /// Restrict a dimension to the given value keys (unknown keys are ignored).
    pub fn select_only(&mut self, dim: Dimension, keys: &[String]) {
        if let Some(entry) = self.dimensions.get_mut(&dim) {
            entry.selected = entry.available.iter().filter(|k| keys.contains(k)).cloned().collect();
        }
    }

    /// Restrict the counted modules, keeping the option order.
    pub fn select_modules(&mut self, options: &DashboardOptions, keys: &[String]) {
        self.selected_modules = options.modules.iter().filter(|m| keys.contains(&m.key)).map(|m| m.key.clone()).collect();
        if !self.module_distinction_allowed() {
            self.module_distinction = false;
        }
    }
}

/// One counted group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCount {
    /// Composite key: module key (when distinguishing) then one key per active dimension.
    pub key: String,
    pub label: String,
    pub count: usize,
    pub module_key: Option<String>,
    /// Value key per active dimension, in dimension order.
    pub values: Vec<(Dimension, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dashboard {
    pub groups: Vec<GroupCount>,
    /// Tasks that passed the filters; equals the sum of group counts.
    pub total: usize,
}

/// Resolved key of a task in one dimension, sentinel when missing.
pub fn value_key(task: &Task, dim: Dimension) -> &str {
    let raw = match dim {
        Dimension::Stage => Some(task.stage_id.as_str()),
        Dimension::TaskType => task.task_type_id.as_deref(),
        Dimension::Priority => Some(task.priority.trim()),
        Dimension::Status => Some(task.status.trim()),
    };
    raw.filter(|v| !v.is_empty()).unwrap_or(dim.missing_key())
}

struct Names<'a> {
    stages: HashMap<&'a str, &'a str>,
    types: HashMap<&'a str, &'a str>,
    modules: HashMap<&'a str, &'a str>,
}

impl Names<'_> {
    fn value_label(&self, task: &Task, dim: Dimension) -> String {
        let key = value_key(task, dim);
        if key == dim.missing_key() {
            return dim.missing_label().to_string();
        }
        match dim {
            Dimension::Stage => self.stages.get(key).map_or_else(|| format!("未知阶段({key})"), |n| n.to_string()),
            Dimension::TaskType => self.types.get(key).map_or_else(|| format!("未知类型({key})"), |n| n.to_string()),
            Dimension::Priority | Dimension::Status => key.to_string(),
        }
    }

    fn module_label(&self, key: &str) -> &str {
        self.modules.get(key).copied().unwrap_or(UNASSIGNED_MODULE_LABEL)
    }
}

/// Group and count `tasks` under `config`.
pub fn aggregate(
    tasks: &[&Task],
    stages: &[Stage],
    task_types: &[TaskType],
    modules: &[&Module],
    config: &DashboardConfig,
) -> Dashboard {
    let names = Names {
        stages: stages.iter().map(|s| (s.id.as_str(), stage_name(s))).collect(),
        types: task_types.iter().map(|t| (t.id.as_str(), type_name(t))).collect(),
        modules: modules.iter().map(|m| (m.id.as_str(), m.name.as_str())).collect(),
    };
    let active = config.active_dimensions();
    let distinguish = config.module_distinction_active();
    let selected_modules: HashSet<&str> = config.selected_modules.iter().map(String::as_str).collect();
    let filters: Vec<(Dimension, HashSet<&str>)> = config
        .dimensions
        .iter()
        .filter_map(|(d, sel)| sel.filter().map(|f| (*d, f)))
        .collect();

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<GroupCount> = Vec::new();
    let mut total = 0;

    for task in tasks {
        let module_key = task.module_id.as_deref().unwrap_or(UNASSIGNED_MODULE_KEY);
        if !selected_modules.contains(module_key) {
            continue;
        }
        if !filters.iter().all(|(d, allowed)| allowed.contains(value_key(task, *d))) {
            continue;
        }
        total += 1;

        let mut key_parts: Vec<&str> = Vec::with_capacity(active.len() + 1);
        if distinguish {
            key_parts.push(module_key);
        }
        key_parts.extend(active.iter().map(|d| value_key(task, *d)));
        let key = key_parts.join("|");

        if let Some(&i) = index.get(&key) {
            groups[i].count += 1;
            continue;
        }

        let mut label_parts = Vec::with_capacity(active.len() + 1);
        if distinguish {
            label_parts.push(format!("模块：{}", names.module_label(module_key)));
        }
        for d in &active {
            label_parts.push(format!("{}：{}", d.label(), names.value_label(task, *d)));
        }
        trace!(key = %key, "new dashboard group");
        index.insert(key.clone(), groups.len());
        groups.push(GroupCount {
            key,
            label: label_parts.join(" / "),
            count: 1,
            module_key: distinguish.then(|| module_key.to_string()),
            values: active.iter().map(|d| (*d, value_key(task, *d).to_string())).collect(),
        });
    }

    groups.sort_by(|a, b| collate(&a.label, &b.label).then_with(|| a.key.cmp(&b.key)));
    Dashboard { groups, total }
}

/// Deterministic case-folded ordering of labels.
fn collate(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Share of `count` in `total` as a percentage, without a trailing `.0`.
pub fn format_share(count: usize, total: usize) -> String {
    if total == 0 {
        return "0%".into();
    }
    let pct = format!("{:.1}", count as f64 * 100.0 / total as f64);
    format!("{}%", pct.strip_suffix(".0").unwrap_or(&pct))
}
