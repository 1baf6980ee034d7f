//! Board TUI entry point and terminal setup.

use std::{io, path::Path};

use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{prelude::CrosstermBackend, Terminal};
use tracing::debug;

use crate::error::Result;
use crate::selection::Selection;
use crate::tui::board::BoardApp;

/// Initialise and run the stage board for `selection`.
///
/// The snapshot is loaded before the terminal is touched, so a bad file is
/// reported on a normal screen.
pub fn run_board(db_path: &Path, selection: Selection) -> Result<()> {
    let mut app = BoardApp::new(db_path, selection)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    debug!(path = %db_path.display(), "board started");

    let result = app.run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result?;
    Ok(())
}
