use crate::model::PlayerState;
use anyhow::Result;
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use std::io::{Stdout, stdout};

pub const PAGE_SIZE: usize = 4;
pub const MAX_LABEL_CHARS: usize = 18;
const PROGRESS_WIDTH: usize = 14;

const TEXT: Color = Color::Rgb(214, 228, 248);
const MUTED: Color = Color::Rgb(149, 173, 204);
const ACCENT: Color = Color::Rgb(100, 203, 184);
const BORDER: Color = Color::Rgb(69, 121, 176);
const PANEL_BG: Color = Color::Rgb(10, 15, 24);

/// Everything a display needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub header: String,
    pub body: ScreenBody,
    pub status: StatusGlyphs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenBody {
    Menu {
        items: Vec<String>,
        selected: usize,
        editing: bool,
    },
    NowPlaying {
        title: String,
        artist: String,
        album: String,
        elapsed: String,
        remaining: Option<String>,
        progress: u8,
    },
    Info(Vec<String>),
    Message(String),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGlyphs {
    pub state: PlayerState,
    pub shuffle: bool,
}

impl StatusGlyphs {
    pub fn text(self) -> String {
        let state = match self.state {
            PlayerState::Playing => ">",
            PlayerState::Paused => "||",
            PlayerState::Stopped | PlayerState::Ended => "[]",
            PlayerState::Unknown => "?",
        };
        if self.shuffle {
            format!("S {state}")
        } else {
            state.to_string()
        }
    }
}

pub trait Renderer {
    fn render(&mut self, screen: &Screen) -> Result<()>;
    fn set_backlight(&mut self, on: bool);
}

/// Draws into the terminal's alternate screen; restores the terminal on drop.
pub struct TerminalRenderer {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    backlight: bool,
}

impl TerminalRenderer {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut out = stdout();
        execute!(out, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(out))?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(Self {
            terminal,
            backlight: true,
        })
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, screen: &Screen) -> Result<()> {
        let backlight = self.backlight;
        self.terminal.draw(|frame| draw(frame, screen, backlight))?;
        Ok(())
    }

    fn set_backlight(&mut self, on: bool) {
        self.backlight = on;
    }
}

impl Drop for TerminalRenderer {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            log::warn!("failed to leave raw mode: {err}");
        }
        if let Err(err) = execute!(self.terminal.backend_mut(), LeaveAlternateScreen) {
            log::warn!("failed to leave alternate screen: {err}");
        }
        if let Err(err) = self.terminal.show_cursor() {
            log::warn!("failed to restore cursor: {err}");
        }
    }
}

/// Discards frames. Used when no terminal is attached.
#[derive(Debug, Default)]
pub struct NullRenderer {
    pub frames: usize,
    pub backlight: bool,
}

impl Renderer for NullRenderer {
    fn render(&mut self, _screen: &Screen) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn set_backlight(&mut self, on: bool) {
        self.backlight = on;
    }
}

pub fn draw(frame: &mut Frame, screen: &Screen, backlight: bool) {
    let area = frame.area();
    frame.render_widget(
        Block::default().style(Style::default().bg(Color::Black)),
        area,
    );
    if !backlight {
        return;
    }

    let outer = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {} ", truncate(&screen.header, MAX_LABEL_CHARS)),
            Style::default().fg(TEXT).add_modifier(Modifier::BOLD),
        ))
        .title_top(
            Line::from(Span::styled(
                format!(" {} ", screen.status.text()),
                Style::default().fg(ACCENT),
            ))
            .right_aligned(),
        )
        .border_style(Style::default().fg(BORDER))
        .style(Style::default().bg(PANEL_BG));
    let inner = outer.inner(area);
    frame.render_widget(outer, area);

    let paragraph = Paragraph::new(body_lines(&screen.body)).style(Style::default().fg(TEXT));
    let paragraph = match screen.body {
        ScreenBody::Message(_) => paragraph.centered().wrap(Wrap { trim: true }),
        _ => paragraph,
    };
    frame.render_widget(paragraph, inner);
}

fn body_lines(body: &ScreenBody) -> Vec<Line<'static>> {
    match body {
        ScreenBody::Menu {
            items,
            selected,
            editing,
        } => menu_lines(items, *selected, *editing)
            .into_iter()
            .enumerate()
            .map(|(row, text)| {
                let highlighted = row == selected % PAGE_SIZE;
                let style = if highlighted {
                    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(TEXT)
                };
                Line::from(Span::styled(text, style))
            })
            .collect(),
        ScreenBody::NowPlaying {
            title,
            artist,
            album,
            elapsed,
            remaining,
            progress,
        } => vec![
            Line::from(Span::styled(
                truncate(title, MAX_LABEL_CHARS),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(truncate(artist, MAX_LABEL_CHARS)),
            Line::from(Span::styled(
                truncate(album, MAX_LABEL_CHARS),
                Style::default().fg(MUTED),
            )),
            Line::from(progress_bar(*progress, PROGRESS_WIDTH)),
            Line::from(Span::styled(
                format!("{elapsed} {}", remaining.as_deref().unwrap_or("")),
                Style::default().fg(MUTED),
            )),
        ],
        ScreenBody::Info(lines) => lines
            .iter()
            .map(|line| Line::from(truncate(line, MAX_LABEL_CHARS + 2)))
            .collect(),
        ScreenBody::Message(text) => vec![
            Line::default(),
            Line::from(Span::styled(
                text.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
        ],
        ScreenBody::Empty => Vec::new(),
    }
}

/// Rows of the page holding `selected`, with the cursor marker applied.
pub fn menu_lines(items: &[String], selected: usize, editing: bool) -> Vec<String> {
    if items.is_empty() {
        return Vec::new();
    }
    let selected = selected.min(items.len() - 1);
    let start = (selected / PAGE_SIZE) * PAGE_SIZE;
    items
        .iter()
        .enumerate()
        .skip(start)
        .take(PAGE_SIZE)
        .map(|(index, item)| {
            let marker = match (index == selected, editing) {
                (true, true) => "X ",
                (true, false) => "> ",
                _ => "  ",
            };
            format!("{marker}{}", truncate(item, MAX_LABEL_CHARS))
        })
        .collect()
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn progress_bar(percent: u8, width: usize) -> String {
    let filled = (usize::from(percent.min(100)) * width + 50) / 100;
    format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    )
}
