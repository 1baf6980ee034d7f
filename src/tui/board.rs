//! Interactive stage board.
//!
//! Shows the selected module (or the project tasks) as stage sections with
//! indented task rows, with a detail popup, a dashboard bar chart and a few write
//! actions. Every write goes through [`Database::commit`] and is followed by a
//! reload from disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Bar, BarChart, BarGroup, Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tracing::{info, warn};

use crate::aggregate::{aggregate, format_share, Dashboard, DashboardConfig, DashboardOptions};
use crate::db::{format_date, truncate, Database};
use crate::error::Result;
use crate::fields::{NodeKind, STATUSES, WORK_TIME_FORMAT};
use crate::model::TaskFields;
use crate::selection::{stage_order, Selection};
use crate::tree::{build_board, template_summary};
use crate::tui::colors::{group_colors, status_color, STAGE_HEADER, TEMPLATE_SUBTASK, TEMPLATE_TASK};

/// One printable line of the board, detached from the snapshot it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardLine {
    Stage { name: String, summary: String },
    Node { kind: NodeKind, depth: usize, name: String, task_id: Option<String>, status: String, detail: String },
    Empty,
}

/// Short bar label: the value of every part of a group label, without the
/// dimension names (`阶段：Plan / 状态：进行中` gives `Plan/进行中`).
fn bar_label(label: &str) -> String {
    label
        .split(" / ")
        .map(|part| part.split_once('：').map_or(part, |(_, value)| value))
        .collect::<Vec<_>>()
        .join("/")
}

/// Pending cascade delete awaiting confirmation.
#[derive(Debug, Clone, PartialEq)]
struct PendingDelete {
    task_id: String,
    name: String,
    descendants: usize,
}

pub struct BoardApp {
    db: Database,
    db_path: PathBuf,
    selection: Selection,
    lines: Vec<BoardLine>,
    list_state: ListState,
    status_message: String,
    show_detail: bool,
    show_dashboard: bool,
    dashboard_config: Option<DashboardConfig>,
    dashboard: Dashboard,
    pending_delete: Option<PendingDelete>,
}

impl BoardApp {
    pub fn new(db_path: &Path, selection: Selection) -> Result<Self> {
        let db = Database::load(db_path)?;
        let mut app = BoardApp {
            db,
            db_path: db_path.to_path_buf(),
            selection,
            lines: Vec::new(),
            list_state: ListState::default(),
            status_message: String::new(),
            show_detail: false,
            show_dashboard: false,
            dashboard_config: None,
            dashboard: Dashboard::default(),
            pending_delete: None,
        };
        app.refresh();
        Ok(app)
    }

    /// Re-read the snapshot from disk and rebuild the view.
    fn reload(&mut self) {
        match Database::load(&self.db_path) {
            Ok(db) => self.db = db,
            Err(e) => {
                warn!(error = %e, "reload failed, keeping previous snapshot");
                self.set_status_message(format!("Reload failed: {e}"));
            }
        }
        self.refresh();
    }

    /// Rebuild lines and dashboard from the in-memory snapshot.
    fn refresh(&mut self) {
        self.selection = self.selection.reconcile(&self.db);
        self.lines = self.build_lines();
        self.refresh_dashboard();
        self.clamp_selection();
    }

    fn build_lines(&self) -> Vec<BoardLine> {
        let db = &self.db;
        let order = stage_order(db, self.selection.active_workflow(db));
        let tasks = self.selection.tasks_in_scope(db);
        let board = build_board(tasks.iter().copied(), &db.stages, &order);

        let mut lines = Vec::new();
        for group in &board.groups {
            let summary = group.stage_id.and_then(|sid| db.stage(sid)).map(template_summary).unwrap_or_default();
            lines.push(BoardLine::Stage { name: group.name.clone(), summary });
            let rows = board.group_rows(group);
            if rows.is_empty() {
                lines.push(BoardLine::Empty);
            }
            for row in rows {
                let node = board.node(row.node);
                let (status, detail) = match node.task {
                    Some(t) => (
                        t.status.clone(),
                        format!("{}  {}  {} → {}", t.priority, t.status, format_date(t.start_date), format_date(t.end_date)),
                    ),
                    None => (String::new(), String::new()),
                };
                lines.push(BoardLine::Node {
                    kind: node.kind,
                    depth: row.depth,
                    name: node.name.to_string(),
                    task_id: node.task.map(|t| t.id.clone()),
                    status,
                    detail,
                });
            }
        }
        lines
    }

    fn refresh_dashboard(&mut self) {
        let Some(project) = self.selection.project(&self.db) else {
            self.dashboard = Dashboard::default();
            return;
        };
        let tasks = self.selection.project_tasks(&self.db);
        let modules = self.db.modules_of(&project.id);
        let options = DashboardOptions::build(&self.db.stages, &self.db.task_types, &modules, &tasks);
        let config = match self.dashboard_config.take() {
            Some(mut config) => {
                config.resync(&options);
                config
            }
            None => DashboardConfig::new(&options),
        };
        self.dashboard = aggregate(&tasks, &self.db.stages, &self.db.task_types, &modules, &config);
        self.dashboard_config = Some(config);
    }

    fn selected_index(&self) -> usize {
        self.list_state.selected().unwrap_or(0)
    }

    fn selected_task_id(&self) -> Option<&str> {
        match self.lines.get(self.selected_index()) {
            Some(BoardLine::Node { task_id: Some(id), .. }) => Some(id.as_str()),
            _ => None,
        }
    }

    fn is_selectable(line: &BoardLine) -> bool {
        matches!(line, BoardLine::Node { .. })
    }

    /// Keep the cursor on a node line, preferring the current position.
    fn clamp_selection(&mut self) {
        if self.lines.is_empty() {
            self.list_state.select(None);
            return;
        }
        let current = self.selected_index().min(self.lines.len() - 1);
        let target = (current..self.lines.len())
            .chain((0..current).rev())
            .find(|&i| Self::is_selectable(&self.lines[i]))
            .unwrap_or(current);
        self.list_state.select(Some(target));
    }

    fn move_selection(&mut self, down: bool) {
        let current = self.selected_index();
        let next = if down {
            (current + 1..self.lines.len()).find(|&i| Self::is_selectable(&self.lines[i]))
        } else {
            (0..current).rev().find(|&i| Self::is_selectable(&self.lines[i]))
        };
        if let Some(i) = next {
            self.list_state.select(Some(i));
        }
    }

    fn set_status_message(&mut self, msg: String) {
        self.status_message = msg;
    }

    fn clear_status_message(&mut self) {
        self.status_message.clear();
    }

    /// Advance the selected task's status through the vocabulary.
    fn cycle_status(&mut self) {
        let Some(id) = self.selected_task_id().map(str::to_string) else {
            self.set_status_message("Select a task to change its status".to_string());
            return;
        };
        let Some(task) = self.db.get(&id) else { return };
        let next = STATUSES
            .iter()
            .position(|s| *s == task.status)
            .map_or(STATUSES[0], |i| STATUSES[(i + 1) % STATUSES.len()]);
        let mut fields = TaskFields::from_task(task);
        fields.status = next.to_string();

        match self.db.commit(&self.db_path, |db| db.update_task(&id, &fields)) {
            Ok(t) => {
                info!(task_id = %id, status = next, "status changed from board");
                self.set_status_message(format!("{} → {}", t.name, t.status));
            }
            Err(e) => self.set_status_message(format!("Error: {e}")),
        }
        self.reload();
    }

    fn request_delete(&mut self) {
        let Some(id) = self.selected_task_id().map(str::to_string) else {
            self.set_status_message("Templates cannot be deleted from the board".to_string());
            return;
        };
        let Some(task) = self.db.get(&id) else { return };
        let descendants = crate::cascade::collect_subtree(&self.db.tasks, &id)
            .map(|ids| ids.len().saturating_sub(1))
            .unwrap_or(0);
        self.pending_delete = Some(PendingDelete { task_id: id, name: task.name.clone(), descendants });
    }

    fn confirm_delete(&mut self) {
        let Some(pending) = self.pending_delete.take() else { return };
        match self.db.commit(&self.db_path, |db| db.delete_task(&pending.task_id)) {
            Ok(removed) => self.set_status_message(format!("Deleted {} ({} tasks)", pending.name, removed.len())),
            Err(e) => self.set_status_message(format!("Error: {e}")),
        }
        self.reload();
    }

    fn next_scope(&mut self) {
        self.selection = self.selection.next_scope(&self.db);
        self.list_state.select(Some(0));
        self.show_detail = false;
        self.refresh();
        let label = self.selection.scope_label(&self.db);
        self.set_status_message(format!("Showing {label}"));
    }

    /// Apply one key press. Returns `true` when the board should close.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if self.pending_delete.is_some() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => self.confirm_delete(),
                _ => {
                    self.pending_delete = None;
                    self.set_status_message("Delete cancelled".to_string());
                }
            }
            return false;
        }

        self.clear_status_message();
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Char('q') => return true,
            KeyCode::Esc => {
                if self.show_detail {
                    self.show_detail = false;
                } else {
                    return true;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(false),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(true),
            KeyCode::Enter => {
                if self.selected_task_id().is_some() {
                    self.show_detail = !self.show_detail;
                }
            }
            KeyCode::Char('s') => self.cycle_status(),
            KeyCode::Char('x') | KeyCode::Delete => self.request_delete(),
            KeyCode::Char('m') => self.next_scope(),
            KeyCode::Char('g') => self.show_dashboard = !self.show_dashboard,
            KeyCode::Char('r') => {
                self.reload();
                self.set_status_message("Reloaded".to_string());
            }
            KeyCode::Char('h') => self.set_status_message(
                "Enter: Details | s: Cycle status | x: Delete | m: Next module | g: Dashboard | r: Reload | q: Quit"
                    .to_string(),
            ),
            _ => {}
        }
        false
    }

    fn handle_input(&mut self) -> io::Result<bool> {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(self.handle_key(key));
                }
            }
        }
        Ok(false)
    }

    fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Board
                Constraint::Length(1), // Status bar
            ])
            .split(f.area());

        self.render_header(f, chunks[0]);
        if self.show_dashboard {
            let body = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[1]);
            self.render_board(f, body[0]);
            self.render_dashboard(f, body[1]);
        } else {
            self.render_board(f, chunks[1]);
        }
        self.render_status_bar(f, chunks[2]);

        if self.show_detail {
            self.render_detail_popup(f);
        }
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let project = self.selection.project(&self.db).map_or("-", |p| p.name.as_str());
        let workflow = self.selection.active_workflow(&self.db).map_or("-", |w| w.name.as_str());
        let context = format!(
            "Project: {}  Scope: {}  Workflow: {}",
            project,
            self.selection.scope_label(&self.db),
            workflow
        );
        let header = Paragraph::new(Line::from(vec![
            Span::styled("STAGE BOARD", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            Span::styled(context, Style::default().fg(Color::Cyan).add_modifier(Modifier::ITALIC)),
        ]))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
        f.render_widget(header, area);
    }

    fn render_board(&mut self, f: &mut Frame, area: Rect) {
        let name_width = (area.width as usize).saturating_sub(34).max(12);
        let items: Vec<ListItem> = self
            .lines
            .iter()
            .map(|line| match line {
                BoardLine::Stage { name, summary } => {
                    let mut spans = vec![Span::styled(
                        format!("▌{name}"),
                        Style::default().fg(STAGE_HEADER).add_modifier(Modifier::BOLD),
                    )];
                    if !summary.is_empty() {
                        spans.push(Span::styled(format!("  模板：{summary}"), Style::default().fg(Color::DarkGray)));
                    }
                    ListItem::new(Line::from(spans))
                }
                BoardLine::Empty => ListItem::new(Line::from(Span::styled(
                    "  (no tasks)",
                    Style::default().fg(Color::DarkGray),
                ))),
                BoardLine::Node { kind, depth, name, status, detail, .. } => {
                    let indent = "  ".repeat(*depth + 1);
                    let (marker, style) = match kind {
                        NodeKind::Task => ("•", Style::default().fg(status_color(status))),
                        NodeKind::TemplateTask => ("◇", Style::default().fg(TEMPLATE_TASK)),
                        NodeKind::TemplateSubtask => ("·", Style::default().fg(TEMPLATE_SUBTASK)),
                    };
                    let title = truncate(&format!("{indent}{marker} {name}"), name_width);
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{title:<name_width$}"), style),
                        Span::raw(" "),
                        Span::styled(detail.clone(), Style::default().fg(Color::Gray)),
                    ]))
                }
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Stages"))
            .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));
        f.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_dashboard(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("Dashboard ({} tasks)", self.dashboard.total));
        if self.dashboard.groups.is_empty() {
            f.render_widget(Paragraph::new("No tasks").block(block), area);
            return;
        }

        let module_ids: Vec<&str> = self
            .selection
            .project_id
            .as_deref()
            .map(|p| self.db.modules_of(p).into_iter().map(|m| m.id.as_str()).collect())
            .unwrap_or_default();
        let colors = group_colors(&self.dashboard.groups, &module_ids);
        let bars: Vec<Bar> = self
            .dashboard
            .groups
            .iter()
            .zip(colors)
            .map(|(g, color)| {
                let label = bar_label(&g.label);
                Bar::default()
                    .value(g.count as u64)
                    .label(Line::from(label))
                    .text_value(format!("{} ({})", g.count, format_share(g.count, self.dashboard.total)))
                    .style(Style::default().fg(color))
            })
            .collect();

        let chart = BarChart::default()
            .block(block)
            .direction(Direction::Horizontal)
            .bar_width(1)
            .bar_gap(1)
            .data(BarGroup::default().bars(&bars));
        f.render_widget(chart, area);
    }

    fn render_status_bar(&self, f: &mut Frame, area: Rect) {
        let text = if let Some(p) = &self.pending_delete {
            format!("Delete \"{}\" and {} subtasks? (y/n)", p.name, p.descendants)
        } else if !self.status_message.is_empty() {
            self.status_message.clone()
        } else {
            let tasks = self.lines.iter().filter(|l| matches!(l, BoardLine::Node { task_id: Some(_), .. })).count();
            format!("Tasks: {tasks} | Enter: Details | s: Status | x: Delete | m: Module | g: Dashboard | h: Help")
        };
        let style = if self.pending_delete.is_some() {
            Style::default().bg(Color::Red).fg(Color::White)
        } else {
            Style::default().bg(STAGE_HEADER).fg(Color::Black)
        };
        f.render_widget(Paragraph::new(text).style(style), area);
    }

    fn render_detail_popup(&self, f: &mut Frame) {
        let Some(task) = self.selected_task_id().and_then(|id| self.db.get(id)) else { return };
        let area = f.area();
        let popup = Rect::new(area.width / 10, area.height / 10, area.width * 8 / 10, area.height * 8 / 10);
        f.render_widget(Clear, popup);

        let db = &self.db;
        let stage = db.stage(&task.stage_id).map_or(task.stage_id.as_str(), |s| s.name.as_str());
        let task_type = task.task_type_id.as_deref().and_then(|t| db.task_type(t)).map_or("-", |t| t.name.as_str());
        let parent = match (task.parent_task_id.as_deref(), task.parent_stage_task_id.as_deref()) {
            (Some(p), _) => db.get(p).map_or(p.to_string(), |t| t.name.clone()),
            (None, Some(t)) => db.template(t).map_or(t.to_string(), |(_, tmpl)| format!("{} (template)", tmpl.name)),
            (None, None) => "-".to_string(),
        };

        let mut lines = vec![
            Line::from(Span::styled(task.name.clone(), Style::default().add_modifier(Modifier::BOLD))),
            Line::from(""),
            Line::from(format!("Stage:     {stage}")),
            Line::from(format!("Type:      {task_type}")),
            Line::from(format!("Priority:  {}", task.priority)),
            Line::from(vec![
                Span::raw("Status:    "),
                Span::styled(task.status.clone(), Style::default().fg(status_color(&task.status))),
            ]),
            Line::from(format!("Start:     {}", format_date(task.start_date))),
            Line::from(format!("End:       {}", format_date(task.end_date))),
            Line::from(format!("Parent:    {parent}")),
            Line::from(""),
            Line::from("Description:"),
            Line::from(if task.description.is_empty() { "-".to_string() } else { task.description.clone() }),
            Line::from(""),
            Line::from("Work logs:"),
        ];
        if task.work_logs.is_empty() {
            lines.push(Line::from("  -"));
        }
        for log in &task.work_logs {
            lines.push(Line::from(format!("  {}  {}", log.work_time.format(WORK_TIME_FORMAT), log.content)));
        }

        let block = Block::default()
            .borders(Borders::ALL)
            .title("Task Details (Enter to close)")
            .title_alignment(Alignment::Center)
            .border_style(Style::default().fg(STAGE_HEADER).add_modifier(Modifier::BOLD));
        f.render_widget(
            Paragraph::new(lines).block(block).wrap(Wrap { trim: true }).style(Style::default().bg(Color::Black)),
            popup,
        );
    }

    /// Main event loop
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            terminal.draw(|f| self.render(f))?;

            if self.handle_input()? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageTaskInput;
    use crate::selection::Scope;
    use ratatui::backend::TestBackend;

    fn key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    /// Snapshot with one project, a Plan stage (Kickoff template) and a parent/child pair.
    fn seeded(dir: &tempfile::TempDir) -> (PathBuf, Selection) {
        let path = dir.path().join("flow.json");
        let mut db = Database::default();
        let plan = db
            .create_stage("Plan", &[StageTaskInput { name: "Kickoff".into(), subtasks: vec!["Agenda".into()] }])
            .unwrap();
        let wf = db.create_workflow("Default", &[plan.id.clone()]).unwrap();
        let project = db.create_project("Apollo", &wf.id).unwrap();
        db.create_module(&project.id, "Engine", None).unwrap();
        let base = TaskFields {
            project_id: project.id.clone(),
            stage_id: plan.id.clone(),
            name: "Parent".into(),
            priority: "中".into(),
            status: "未开始".into(),
            ..Default::default()
        };
        let parent = db.create_task(&base).unwrap();
        db.create_task(&TaskFields { name: "Child".into(), parent_task_id: Some(parent.id), ..base }).unwrap();
        db.save(&path).unwrap();
        (path, Selection::new(Some(project.id), Scope::ProjectTasks))
    }

    #[test]
    fn test_lines_follow_board_order() {
        let dir = tempfile::tempdir().unwrap();
        let (path, selection) = seeded(&dir);
        let app = BoardApp::new(&path, selection).unwrap();
        let names: Vec<(&str, usize)> = app
            .lines
            .iter()
            .filter_map(|l| match l {
                BoardLine::Node { name, depth, .. } => Some((name.as_str(), *depth)),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec![("Parent", 0), ("Child", 1), ("Kickoff", 0), ("Agenda", 1)]);
        assert!(matches!(&app.lines[0], BoardLine::Stage { name, .. } if name == "Plan"));
        assert_eq!(app.selected_index(), 1);
    }

    #[test]
    fn test_cycle_status_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (path, selection) = seeded(&dir);
        let mut app = BoardApp::new(&path, selection).unwrap();
        assert!(!app.handle_key(key('s')));
        let on_disk = Database::load(&path).unwrap();
        let parent = on_disk.tasks.iter().find(|t| t.name == "Parent").unwrap();
        assert_eq!(parent.status, "进行中");
    }

    #[test]
    fn test_delete_needs_confirmation_and_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let (path, selection) = seeded(&dir);
        let mut app = BoardApp::new(&path, selection).unwrap();

        app.handle_key(key('x'));
        assert_eq!(app.pending_delete.as_ref().map(|p| p.descendants), Some(1));
        app.handle_key(key('n'));
        assert!(app.pending_delete.is_none());
        assert_eq!(Database::load(&path).unwrap().tasks.len(), 2);

        app.handle_key(key('x'));
        app.handle_key(key('y'));
        assert!(Database::load(&path).unwrap().tasks.is_empty());
        assert!(app.lines.iter().all(|l| !matches!(l, BoardLine::Node { task_id: Some(_), .. })));
    }

    #[test]
    fn test_templates_are_not_deletable() {
        let dir = tempfile::tempdir().unwrap();
        let (path, selection) = seeded(&dir);
        let mut app = BoardApp::new(&path, selection).unwrap();
        for _ in 0..2 {
            app.handle_key(KeyEvent::new(KeyCode::Down, KeyModifiers::NONE));
        }
        app.handle_key(key('x'));
        assert!(app.pending_delete.is_none());
        assert_eq!(app.status_message, "Templates cannot be deleted from the board");
    }

    #[test]
    fn test_module_cycle_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let (path, selection) = seeded(&dir);
        let mut app = BoardApp::new(&path, selection).unwrap();
        app.handle_key(key('m'));
        assert!(matches!(app.selection.scope, Scope::Module(_)));
        assert_eq!(app.status_message, "Showing Engine");
        assert!(app.handle_key(key('q')));
    }

    #[test]
    fn test_bar_labels_keep_every_value() {
        assert_eq!(bar_label("状态：进行中"), "进行中");
        assert_eq!(bar_label("阶段：Plan / 状态：进行中"), "Plan/进行中");
        assert_eq!(bar_label("模块：Engine / 阶段：Plan / 状态：已完成"), "Engine/Plan/已完成");
        assert_ne!(bar_label("阶段：Plan / 状态：进行中"), bar_label("阶段：Build / 状态：进行中"));
    }

    #[test]
    fn test_renders_with_dashboard_and_popup() {
        let dir = tempfile::tempdir().unwrap();
        let (path, selection) = seeded(&dir);
        let mut app = BoardApp::new(&path, selection).unwrap();
        app.handle_key(key('g'));
        app.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        assert!(app.show_detail);

        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| app.render(f)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("STAGE BOARD"));
        assert!(text.contains("Task Details"));
        assert_eq!(app.dashboard.total, 2);
    }
}
