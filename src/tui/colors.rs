//! Color constants and palettes for the terminal user interface.

use ratatui::style::Color;

use crate::aggregate::GroupCount;
use crate::fields::{Dimension, UNASSIGNED_MODULE_KEY};

/// Used for stage template tasks
pub const TEMPLATE_TASK: Color = Color::Rgb(99, 102, 241);
/// Used for stage template subtasks
pub const TEMPLATE_SUBTASK: Color = Color::Rgb(139, 92, 246);
/// Stage section headers
pub const STAGE_HEADER: Color = Color::Rgb(20, 184, 166);

/// 未开始, and any status outside the vocabulary
pub const STATUS_NOT_STARTED: Color = Color::Rgb(148, 163, 184);
/// 进行中
pub const STATUS_IN_PROGRESS: Color = Color::Rgb(96, 165, 250);
/// 已完成
pub const STATUS_DONE: Color = Color::Rgb(52, 211, 153);

/// Base colours handed out to modules (and to groups, by index).
pub const PALETTE: [Color; 8] = [
    Color::Rgb(99, 102, 241),
    Color::Rgb(236, 72, 153),
    Color::Rgb(20, 184, 166),
    Color::Rgb(249, 115, 22),
    Color::Rgb(139, 92, 246),
    Color::Rgb(34, 211, 238),
    Color::Rgb(245, 158, 11),
    Color::Rgb(16, 185, 129),
];

/// Shade steps applied to successive groups of the same module.
const SHADE_STEPS: [f32; 4] = [-0.18, 0.02, 0.18, 0.3];

pub fn status_color(status: &str) -> Color {
    match status {
        "进行中" => STATUS_IN_PROGRESS,
        "已完成" => STATUS_DONE,
        _ => STATUS_NOT_STARTED,
    }
}

/// Darken (negative `amount`) or lighten (positive) an RGB colour.
pub fn shade(color: Color, amount: f32) -> Color {
    let Color::Rgb(r, g, b) = color else { return color };
    let step = |c: u8| -> u8 {
        let c = f32::from(c);
        let v = if amount < 0.0 { c * (1.0 + amount) } else { c + (255.0 - c) * amount };
        v.round().clamp(0.0, 255.0) as u8
    };
    Color::Rgb(step(r), step(g), step(b))
}

/// Base colour of a module, by its position among the project's modules.
/// Unassigned tasks take the slot after the last module.
pub fn module_color(module_ids: &[&str], key: &str) -> Color {
    let index = if key == UNASSIGNED_MODULE_KEY {
        module_ids.len()
    } else {
        module_ids.iter().position(|m| *m == key).unwrap_or(0)
    };
    PALETTE[index % PALETTE.len()]
}

/// One colour per dashboard group.
///
/// With module distinction each group gets a shade of its module's colour. A
/// status-only grouping uses the status colours. Otherwise colours follow the
/// group index through the palette.
pub fn group_colors(groups: &[GroupCount], module_ids: &[&str]) -> Vec<Color> {
    let mut per_module: Vec<(&str, usize)> = Vec::new();
    groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            if let Some(module) = g.module_key.as_deref() {
                let seen = match per_module.iter_mut().find(|(m, _)| *m == module) {
                    Some((_, n)) => {
                        *n += 1;
                        *n - 1
                    }
                    None => {
                        per_module.push((module, 1));
                        0
                    }
                };
                return shade(module_color(module_ids, module), SHADE_STEPS[seen % SHADE_STEPS.len()]);
            }
            match g.values.as_slice() {
                [(Dimension::Status, status)] => status_color(status),
                _ => PALETTE[i % PALETTE.len()],
            }
        })
        .collect()
}
