//! Time-range filtering of board rows.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::db::{parse_date, parse_work_time};
use crate::error::{FlowError, Result};
use crate::fields::TimeField;
use crate::model::TaskWorkLog;
use crate::tree::{Board, FlatRow, StageGroup};

/// Time given to a date-only upper bound.
const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_opt(23, 59, 59) {
    Some(t) => t,
    None => panic!("23:59:59 is a valid time"),
};

/// Inclusive time window over one of the task's dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeFilter {
    pub field: TimeField,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

/// A board row that survived filtering, with the work logs to display.
#[derive(Debug, Clone)]
pub struct FilteredRow<'a> {
    pub row: FlatRow,
    pub logs: Vec<&'a TaskWorkLog>,
}

impl TimeFilter {
    /// Build a filter from user bounds. A bound may be a date or a date-time; a
    /// date upper bound covers the whole day.
    pub fn parse(field: TimeField, from: Option<&str>, to: Option<&str>) -> Result<Self> {
        let from = from.map(|s| parse_bound(s, NaiveTime::MIN)).transpose()?.flatten();
        let to = to.map(|s| parse_bound(s, END_OF_DAY)).transpose()?.flatten();
        if let (Some(f), Some(t)) = (from, to) {
            if f > t {
                return Err(FlowError::validation("Filter start is after filter end"));
            }
        }
        Ok(TimeFilter { field, from, to })
    }

    /// With no bound set every row passes and templates stay visible.
    pub fn is_active(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.from.map_or(true, |f| at >= f) && self.to.map_or(true, |t| at <= t)
    }

    fn contains_date(&self, date: Option<NaiveDate>) -> bool {
        date.is_some_and(|d| self.contains(d.and_time(NaiveTime::MIN)))
    }
}

fn parse_bound(s: &str, day_time: NaiveTime) -> Result<Option<NaiveDateTime>> {
    if s.trim().is_empty() {
        return Ok(None);
    }
    if let Ok(at) = parse_work_time(s) {
        return Ok(Some(at));
    }
    Ok(parse_date(s)?.map(|d| d.and_time(day_time)))
}

/// Filtered rows of one board section.
///
/// While the filter is active the section is flattened without templates, so
/// tasks hanging off a template move up to the template's depth.
pub fn filter_group<'a>(board: &Board<'a>, group: &StageGroup<'a>, filter: &TimeFilter) -> Vec<FilteredRow<'a>> {
    let rows = if filter.is_active() { board.flatten(&group.roots, false) } else { board.group_rows(group) };
    filter_rows(board, &rows, filter)
}

/// Apply `filter` to flattened rows.
///
/// While the filter is active, template rows are dropped and a task row stays when
/// its chosen date lies in the window; in work mode only the matching work logs are
/// kept and a task needs at least one of them.
pub fn filter_rows<'a>(board: &Board<'a>, rows: &[FlatRow], filter: &TimeFilter) -> Vec<FilteredRow<'a>> {
    let active = filter.is_active();
    rows.iter()
        .filter_map(|row| {
            let node = board.node(row.node);
            let Some(task) = node.task else {
                return (!active).then(|| FilteredRow { row: *row, logs: Vec::new() });
            };
            let mut logs: Vec<&'a TaskWorkLog> = task.work_logs.iter().collect();
            logs.sort_by_key(|l| l.work_time);
            if !active {
                return Some(FilteredRow { row: *row, logs });
            }
            let keep = match filter.field {
                TimeField::Start => filter.contains_date(task.start_date),
                TimeField::End => filter.contains_date(task.end_date),
                TimeField::Work => {
                    logs.retain(|l| filter.contains(l.work_time));
                    !logs.is_empty()
                }
            };
            keep.then_some(FilteredRow { row: *row, logs })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Stage, StageTaskTemplate, Task};
    use crate::tree::build_board;

    fn at(s: &str) -> NaiveDateTime {
        parse_work_time(s).unwrap()
    }

    fn task(id: &str, start: Option<&str>, end: Option<&str>, logs: &[&str]) -> Task {
        Task {
            id: id.into(),
            project_id: "p".into(),
            module_id: None,
            stage_id: "s".into(),
            task_type_id: None,
            name: id.into(),
            description: String::new(),
            priority: "中".into(),
            status: "未开始".into(),
            start_date: start.and_then(|d| parse_date(d).unwrap()),
            end_date: end.and_then(|d| parse_date(d).unwrap()),
            parent_task_id: None,
            parent_stage_task_id: None,
            work_logs: logs
                .iter()
                .enumerate()
                .map(|(i, t)| TaskWorkLog {
                    id: format!("{id}-log{i}"),
                    task_id: id.into(),
                    work_time: at(t),
                    content: format!("log {i}"),
                })
                .collect(),
        }
    }

    fn stages() -> Vec<Stage> {
        vec![Stage {
            id: "s".into(),
            name: "S".into(),
            tasks: vec![StageTaskTemplate {
                id: "tmpl".into(),
                stage_id: "s".into(),
                name: "Checklist".into(),
                sort_order: 0,
                subtasks: Vec::new(),
            }],
        }]
    }

    fn names(rows: &[FilteredRow<'_>], board: &Board<'_>) -> Vec<String> {
        rows.iter().map(|r| board.node(r.row.node).name.to_string()).collect()
    }

    #[test]
    fn test_inactive_filter_keeps_everything() {
        let tasks = vec![task("a", None, None, &[])];
        let stages = stages();
        let board = build_board(&tasks, &stages, &["s".to_string()]);
        let rows = board.group_rows(&board.groups[0]);
        let kept = filter_rows(&board, &rows, &TimeFilter::default());
        assert_eq!(names(&kept, &board), vec!["a", "Checklist"]);
    }

    #[test]
    fn test_start_filter_inclusive_and_hides_templates() {
        let tasks = vec![
            task("early", Some("2024-02-28"), None, &[]),
            task("edge", Some("2024-03-01"), None, &[]),
            task("last", Some("2024-03-31"), None, &[]),
            task("undated", None, None, &[]),
        ];
        let stages = stages();
        let board = build_board(&tasks, &stages, &["s".to_string()]);
        let rows = board.group_rows(&board.groups[0]);
        let filter = TimeFilter::parse(TimeField::Start, Some("2024-03-01"), Some("2024-03-31")).unwrap();
        let kept = filter_rows(&board, &rows, &filter);
        assert_eq!(names(&kept, &board), vec!["edge", "last"]);
    }

    #[test]
    fn test_filtered_section_lifts_template_children() {
        let mut draft = task("Draft PRD", Some("2024-03-02"), None, &[]);
        draft.parent_stage_task_id = Some("tmpl".into());
        let mut note = task("note", Some("2024-03-03"), None, &[]);
        note.parent_task_id = Some("Draft PRD".into());
        let tasks = vec![draft, note];
        let stages = stages();
        let board = build_board(&tasks, &stages, &["s".to_string()]);
        let group = &board.groups[0];

        let unfiltered = filter_group(&board, group, &TimeFilter::default());
        let depths: Vec<usize> = unfiltered.iter().map(|r| r.row.depth).collect();
        assert_eq!(names(&unfiltered, &board), vec!["Checklist", "Draft PRD", "note"]);
        assert_eq!(depths, vec![0, 1, 2]);

        let filter = TimeFilter::parse(TimeField::Start, Some("2024-03-01"), None).unwrap();
        let kept = filter_group(&board, group, &filter);
        let depths: Vec<usize> = kept.iter().map(|r| r.row.depth).collect();
        assert_eq!(names(&kept, &board), vec!["Draft PRD", "note"]);
        assert_eq!(depths, vec![0, 1]);
    }

    #[test]
    fn test_end_filter_open_lower_bound() {
        let tasks = vec![task("a", None, Some("2024-01-10"), &[]), task("b", None, Some("2024-05-10"), &[])];
        let stages = stages();
        let board = build_board(&tasks, &stages, &["s".to_string()]);
        let rows = board.group_rows(&board.groups[0]);
        let filter = TimeFilter::parse(TimeField::End, None, Some("2024-02-01")).unwrap();
        assert_eq!(names(&filter_rows(&board, &rows, &filter), &board), vec!["a"]);
    }

    #[test]
    fn test_work_filter_keeps_matching_logs_only() {
        let tasks = vec![
            task("busy", None, None, &["2024-03-05 18:00", "2024-03-01 09:00", "2024-04-01 09:00"]),
            task("idle", None, None, &["2024-01-01 09:00"]),
        ];
        let stages = stages();
        let board = build_board(&tasks, &stages, &["s".to_string()]);
        let rows = board.group_rows(&board.groups[0]);
        let filter = TimeFilter::parse(TimeField::Work, Some("2024-03-01"), Some("2024-03-05")).unwrap();
        let kept = filter_rows(&board, &rows, &filter);
        assert_eq!(names(&kept, &board), vec!["busy"]);
        let times: Vec<NaiveDateTime> = kept[0].logs.iter().map(|l| l.work_time).collect();
        assert_eq!(times, vec![at("2024-03-01 09:00"), at("2024-03-05 18:00")]);
    }

    #[test]
    fn test_bounds_validated() {
        assert!(TimeFilter::parse(TimeField::Start, Some("soon"), None).is_err());
        assert!(TimeFilter::parse(TimeField::Start, Some("2024-03-02"), Some("2024-03-01")).is_err());
        let f = TimeFilter::parse(TimeField::Work, Some("2024-03-01T08:30"), Some("")).unwrap();
        assert_eq!(f.from, Some(at("2024-03-01 08:30")));
        assert_eq!(f.to, None);

        let f = TimeFilter::parse(TimeField::End, None, Some("2024-03-05")).unwrap();
        assert_eq!(f.to, Some(at("2024-03-05 23:59:59")));
        assert!(f.contains(at("2024-03-05 23:59")));
    }
}
