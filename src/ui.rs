use crate::error::AppError;
use crate::models::{EmailSummary, UploadState, UploadStatus};
use crate::page::{AuthState, Page, Route};
use chrono::{DateTime, Local};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
};
use tui_textarea::TextArea;

pub enum UIMode {
    Browsing,
    EnteringPaths,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingState {
    Idle,
    Loading,
    Loaded,
    Failed(String),
}

pub struct UIState<'a> {
    pub page: Page,
    pub mode: UIMode,
    pub label_name: String,
    pub auth_url: Option<String>,
    /// Upload statuses, one inner list per batch in submission order.
    pub batches: Vec<Vec<UploadStatus>>,
    pub emails: Vec<EmailSummary>,
    pub listing: ListingState,
    /// Tag of the most recently started listing; older results are stale.
    listing_generation: u64,
    pub selected_email_index: usize,
    pub emails_list_state: ListState,
    pub path_input: TextArea<'a>,
    pub status_message: Option<String>,
}

impl<'a> UIState<'a> {
    pub fn new(page: Page, label_name: impl Into<String>) -> Self {
        Self {
            page,
            mode: UIMode::Browsing,
            label_name: label_name.into(),
            auth_url: None,
            batches: Vec::new(),
            emails: Vec::new(),
            listing: ListingState::Idle,
            listing_generation: 0,
            selected_email_index: 0,
            emails_list_state: ListState::default(),
            path_input: new_path_input(),
            status_message: None,
        }
    }

    /// Records a status change reported by an upload task.
    pub fn apply_upload_status(&mut self, batch: usize, index: usize, status: UploadStatus) {
        while self.batches.len() <= batch {
            self.batches.push(Vec::new());
        }
        let entries = &mut self.batches[batch];
        if index < entries.len() {
            entries[index] = status;
        } else {
            entries.push(status);
        }
    }

    pub fn upload_statuses(&self) -> impl Iterator<Item = &UploadStatus> {
        self.batches.iter().flatten()
    }

    /// Marks a new listing as loading and returns its tag.
    pub fn begin_listing(&mut self) -> u64 {
        self.listing_generation += 1;
        self.listing = ListingState::Loading;
        self.listing_generation
    }

    /// Forgets the current list; listings still in flight become stale.
    pub fn cancel_listing(&mut self) {
        self.listing_generation += 1;
        self.listing = ListingState::Idle;
        self.emails.clear();
    }

    /// Applies a finished listing. Stale results are dropped, except that a
    /// rejected credential always sends the page back to login.
    pub fn apply_listing(&mut self, generation: u64, result: Result<Vec<EmailSummary>, AppError>) {
        match result {
            Err(err) if err.is_credential() => {
                self.cancel_listing();
                self.page.credential_invalidated(err.to_string());
            }
            _ if generation != self.listing_generation => {
                tracing::debug!("Dropping stale listing #{}", generation);
            }
            Ok(emails) => self.set_emails(emails),
            Err(err) => self.listing = ListingState::Failed(err.to_string()),
        }
    }

    pub fn set_emails(&mut self, emails: Vec<EmailSummary>) {
        self.emails = emails;
        self.listing = ListingState::Loaded;
        if self.selected_email_index >= self.emails.len() {
            self.selected_email_index = self.emails.len().saturating_sub(1);
        }
    }

    pub fn reset_path_input(&mut self) {
        self.path_input = new_path_input();
    }

    /// Paths typed into the upload prompt, whitespace separated.
    pub fn entered_paths(&self) -> Vec<String> {
        self.path_input
            .lines()
            .iter()
            .flat_map(|line| line.split_whitespace())
            .map(str::to_string)
            .collect()
    }
}

fn new_path_input<'a>() -> TextArea<'a> {
    let mut input = TextArea::default();
    input.set_cursor_line_style(Style::default());
    input.set_placeholder_text("/path/to/sample.eml /path/to/other.eml");
    input
}

pub fn render(f: &mut Frame, state: &mut UIState<'_>) {
    match state.page.route() {
        Route::Login => render_login(f, state),
        Route::Mailbox => render_mailbox(f, state),
    }
}

fn render_login(f: &mut Frame, state: &mut UIState<'_>) {
    let area = centered_rect(50, 30, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Gmail Sample Uploader ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(inner);

    f.render_widget(Paragraph::new("Sign in with Google"), chunks[0]);

    if let Some(error) = state.page.error() {
        let error_p = Paragraph::new(error.to_string())
            .style(Style::default().fg(Color::Red))
            .wrap(ratatui::widgets::Wrap { trim: true });
        f.render_widget(error_p, chunks[1]);
    }

    let button = if state.page.state() == AuthState::Authenticating {
        Paragraph::new("Loading...").style(Style::default().fg(Color::DarkGray))
    } else {
        Paragraph::new("[l] Login with Google   [q] Quit")
            .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    };
    f.render_widget(button, chunks[2]);

    if state.page.state() == AuthState::Authenticating && state.auth_url.is_some() {
        render_authentication(f, state);
    }
}

fn render_mailbox(f: &mut Frame, state: &mut UIState<'_>) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(f.area());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40), // Upload statuses
            Constraint::Percentage(60), // Uploaded samples
        ])
        .split(rows[0]);

    // Panel 1: Upload Emails
    let status_items: Vec<ListItem> = state
        .upload_statuses()
        .map(|s| {
            let (color, text) = match &s.state {
                UploadState::Pending => (Color::Gray, format!("{}  {}", s.file_name, s.state.label())),
                UploadState::Uploading => (Color::Blue, format!("{}  {}", s.file_name, s.state.label())),
                UploadState::Success => (Color::Green, format!("{}  {}", s.file_name, s.state.label())),
                UploadState::Error(msg) => (
                    Color::Red,
                    format!("{}  {}\n  {}", s.file_name, s.state.label(), msg),
                ),
            };
            ListItem::new(text).style(Style::default().fg(color))
        })
        .collect();

    let upload_block = Block::default()
        .borders(Borders::ALL)
        .title(" Upload Emails [u] ");

    if status_items.is_empty() {
        let hint = Paragraph::new("Press 'u' and enter the paths of .eml files to upload.")
            .block(upload_block)
            .style(Style::default().fg(Color::DarkGray))
            .wrap(ratatui::widgets::Wrap { trim: true });
        f.render_widget(hint, columns[0]);
    } else {
        f.render_widget(List::new(status_items).block(upload_block), columns[0]);
    }

    // Panel 2: Uploaded Samples
    let samples_title = format!(" Uploaded Samples - {} ", state.label_name);
    let samples_block = Block::default()
        .borders(Borders::ALL)
        .title(samples_title)
        .border_style(Style::default().fg(Color::Yellow));

    match &state.listing {
        ListingState::Idle | ListingState::Loading => {
            let loading = Paragraph::new("Loading emails...")
                .block(samples_block)
                .style(Style::default().fg(Color::Yellow));
            f.render_widget(loading, columns[1]);
        }
        ListingState::Failed(error) => {
            let failed = Paragraph::new(error.clone())
                .block(samples_block)
                .style(Style::default().fg(Color::Red))
                .wrap(ratatui::widgets::Wrap { trim: true });
            f.render_widget(failed, columns[1]);
        }
        ListingState::Loaded if state.emails.is_empty() => {
            let empty = Paragraph::new("No uploaded samples found.")
                .block(samples_block)
                .style(Style::default().fg(Color::DarkGray));
            f.render_widget(empty, columns[1]);
        }
        ListingState::Loaded => {
            let items: Vec<ListItem> = state
                .emails
                .iter()
                .enumerate()
                .map(|(i, email)| {
                    let style = if i == state.selected_email_index {
                        Style::default().fg(Color::Yellow)
                    } else {
                        Style::default()
                    };
                    ListItem::new(format!(
                        " {}\n {}\n {}",
                        email.subject,
                        email.from,
                        format_date(&email.date)
                    ))
                    .style(style)
                })
                .collect();

            state.emails_list_state.select(Some(state.selected_email_index));
            let list = List::new(items)
                .block(samples_block)
                .highlight_style(Style::default().add_modifier(Modifier::BOLD));
            f.render_stateful_widget(list, columns[1], &mut state.emails_list_state);
        }
    }

    // Footer: page-level errors take precedence over the key help.
    let (footer_text, footer_style) = if let Some(error) = state.page.error() {
        (error.to_string(), Style::default().fg(Color::Red))
    } else if let Some(status) = &state.status_message {
        (status.clone(), Style::default().fg(Color::Gray))
    } else {
        (
            "[u] Upload  [r] Refresh  [j/k] Move  [o] Logout  [q] Quit".to_string(),
            Style::default().fg(Color::Gray),
        )
    };
    let footer = Paragraph::new(footer_text)
        .style(footer_style)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, rows[1]);

    if let UIMode::EnteringPaths = state.mode {
        let area = centered_rect(70, 20, f.area());
        f.render_widget(Clear, area);
        state.path_input.set_block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Files to upload [Enter to Upload, Esc to Cancel] ")
                .border_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        );
        f.render_widget(&state.path_input, area);
    }
}

fn render_authentication(f: &mut Frame, state: &mut UIState<'_>) {
    let area = centered_rect(60, 40, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Authentication Required ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(4),
            Constraint::Min(0),
        ])
        .split(inner);

    let msg = Paragraph::new("To upload samples to your Gmail account, visit the following URL in your browser and authorize the application:")
        .wrap(ratatui::widgets::Wrap { trim: true });
    f.render_widget(msg, chunks[0]);

    if let Some(url) = &state.auth_url {
        let url_p = Paragraph::new(url.as_str())
            .style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::UNDERLINED),
            )
            .block(Block::default().borders(Borders::ALL).title(" URL "))
            .wrap(ratatui::widgets::Wrap { trim: false });
        f.render_widget(url_p, chunks[1]);
    }

    let footer = Paragraph::new("Your default browser should have opened automatically. If not, copy the URL above.\n\nThe application will proceed automatically once complete.")
        .style(Style::default().fg(Color::Gray))
        .wrap(ratatui::widgets::Wrap { trim: true });
    f.render_widget(footer, chunks[2]);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Short local rendering of an RFC 2822 `Date` header. Unparseable values
/// are shown as they are.
pub fn format_date(raw: &str) -> String {
    match DateTime::parse_from_rfc2822(raw.trim()) {
        Ok(date) => date
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}
