//! Removal-set computation for cascading task deletion.
//!
//! Only `parent_task_id` links are followed. A task hanging off a stage template
//! is never reached through the template, because templates are not tasks.

use std::collections::{BTreeMap, HashSet};

use crate::error::{FlowError, Result};
use crate::model::Task;

/// Map each parent task id to the ids of its direct children, in task order.
pub fn build_children_map(tasks: &[Task]) -> BTreeMap<&str, Vec<&str>> {
    let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for t in tasks {
        if let Some(p) = t.parent_task_id.as_deref() {
            map.entry(p).or_default().push(t.id.as_str());
        }
    }
    map
}

/// Collect `root` and every task transitively reachable from it through
/// `parent_task_id`. The root must exist.
///
/// The result is a reachability closure: visiting order does not change the set.
/// The returned vector starts with `root`.
pub fn collect_subtree(tasks: &[Task], root: &str) -> Result<Vec<String>> {
    if !tasks.iter().any(|t| t.id == root) {
        return Err(FlowError::not_found("task", root));
    }

    let child_map = build_children_map(tasks);
    let mut seen: HashSet<&str> = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![root];

    while let Some(current) = stack.pop() {
        // Hand-edited data may contain cycles.
        if !seen.insert(current) {
            continue;
        }
        order.push(current.to_string());
        if let Some(children) = child_map.get(current) {
            // Reverse so the first child is visited first.
            stack.extend(children.iter().rev().copied());
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, parent: Option<&str>) -> Task {
        Task {
            id: id.into(),
            project_id: "p".into(),
            module_id: None,
            stage_id: "s".into(),
            task_type_id: None,
            name: id.to_uppercase(),
            description: String::new(),
            priority: "中".into(),
            status: "未开始".into(),
            start_date: None,
            end_date: None,
            parent_task_id: parent.map(Into::into),
            parent_stage_task_id: None,
            work_logs: Vec::new(),
        }
    }

    fn as_set(ids: Vec<String>) -> HashSet<String> {
        ids.into_iter().collect()
    }

    #[test]
    fn test_delete_root_takes_whole_chain() {
        let tasks = vec![task("a", None), task("b", Some("a")), task("c", Some("b"))];
        let ids = collect_subtree(&tasks, "a").unwrap();
        assert_eq!(ids[0], "a");
        assert_eq!(as_set(ids), as_set(vec!["a".into(), "b".into(), "c".into()]));
    }

    #[test]
    fn test_delete_middle_keeps_ancestor() {
        let tasks = vec![task("a", None), task("b", Some("a")), task("c", Some("b"))];
        let ids = as_set(collect_subtree(&tasks, "b").unwrap());
        assert!(ids.contains("b") && ids.contains("c"));
        assert!(!ids.contains("a"));
    }

    #[test]
    fn test_template_links_are_not_followed() {
        let mut attached = task("t", None);
        attached.parent_stage_task_id = Some("tmpl".into());
        let tasks = vec![task("a", None), task("b", Some("a")), attached];
        let ids = as_set(collect_subtree(&tasks, "a").unwrap());
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains("t"));
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let tasks = vec![task("a", None)];
        let err = collect_subtree(&tasks, "zzz").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cycle_terminates() {
        let tasks = vec![task("a", Some("b")), task("b", Some("a"))];
        let ids = as_set(collect_subtree(&tasks, "a").unwrap());
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_wide_fanout() {
        let mut tasks = vec![task("root", None)];
        for i in 0..50 {
            tasks.push(task(&format!("c{i}"), Some("root")));
            tasks.push(task(&format!("g{i}"), Some(format!("c{i}").as_str())));
        }
        tasks.push(task("other", None));
        let ids = collect_subtree(&tasks, "root").unwrap();
        assert_eq!(ids.len(), 101);
        assert!(!ids.iter().any(|id| id == "other"));
    }
}
