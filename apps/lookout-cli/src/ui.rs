use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use lookout_ops::{Notification, NotificationCenter, NotificationKind};
use lookout_types::{
    events::{EventPayload, PushEvent, SystemStats},
    instance::{Instance, InstanceAction},
};
use lookout_viewer::ViewerState;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Map, MapResolution, Points},
        Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, TableState,
    },
    Frame, Terminal,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::map;

const MAX_LOG_ENTRIES: usize = 120;

pub enum UiMessage {
    Instances(Vec<Instance>),
    InstancesFailed(String),
    Viewer(ViewerState),
    Event(PushEvent),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Refresh,
    Action { name: String, action: InstanceAction },
    Delete { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Dashboard,
    Camera,
}

struct App {
    tab: Tab,
    instances: Vec<Instance>,
    instances_error: Option<String>,
    table: TableState,
    viewer: ViewerState,
    stats: SystemStats,
    logs: VecDeque<String>,
    pending_delete: Option<String>,
}

impl App {
    fn new() -> Self {
        Self {
            tab: Tab::Dashboard,
            instances: Vec::new(),
            instances_error: None,
            table: TableState::default(),
            viewer: ViewerState::default(),
            stats: SystemStats::default(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            pending_delete: None,
        }
    }

    fn selected(&self) -> Option<&Instance> {
        self.table.selected().and_then(|idx| self.instances.get(idx))
    }

    fn set_instances(&mut self, instances: Vec<Instance>) {
        let previous = self.selected().map(|i| i.name.clone());
        self.instances = instances;
        self.instances_error = None;
        let idx = previous
            .and_then(|name| self.instances.iter().position(|i| i.name == name))
            .or(if self.instances.is_empty() { None } else { Some(0) });
        self.table.select(idx);
    }

    fn move_selection(&mut self, delta: isize) {
        if self.instances.is_empty() {
            return;
        }
        let len = self.instances.len() as isize;
        let current = self.table.selected().unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len);
        self.table.select(Some(next as usize));
    }

    fn log(&mut self, entry: String) {
        if self.logs.len() == MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }
}

pub fn run(
    receiver: Receiver<UiMessage>,
    commands: UnboundedSender<UiCommand>,
    notifications: NotificationCenter,
    summary: String,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(
        &mut terminal,
        receiver,
        commands,
        &notifications,
        summary.as_str(),
    );

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    commands: UnboundedSender<UiCommand>,
    notifications: &NotificationCenter,
    summary: &str,
) -> Result<()> {
    let mut app = App::new();

    loop {
        loop {
            match receiver.try_recv() {
                Ok(UiMessage::Instances(instances)) => app.set_instances(instances),
                Ok(UiMessage::InstancesFailed(message)) => app.instances_error = Some(message),
                Ok(UiMessage::Viewer(state)) => app.viewer = state,
                Ok(UiMessage::Event(event)) => {
                    if let EventPayload::Stats(stats) = &event.payload {
                        app.stats = *stats;
                    } else {
                        app.log(format_event(&event));
                    }
                }
                Ok(UiMessage::Shutdown) | Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => break,
            }
        }

        let active = notifications.active();
        terminal.draw(|f| draw(f, &mut app, &active, summary))?;

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(name) = app.pending_delete.take() {
                    if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                        let _ = commands.send(UiCommand::Delete { name });
                    }
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Tab => {
                        app.tab = match app.tab {
                            Tab::Dashboard => Tab::Camera,
                            Tab::Camera => Tab::Dashboard,
                        }
                    }
                    KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
                    KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
                    KeyCode::Char('r') => {
                        let _ = commands.send(UiCommand::Refresh);
                    }
                    KeyCode::Char('s') | KeyCode::Char('x') => {
                        let action = if key.code == KeyCode::Char('s') {
                            InstanceAction::Start
                        } else {
                            InstanceAction::Stop
                        };
                        if let Some(instance) = app.selected() {
                            let _ = commands.send(UiCommand::Action {
                                name: instance.name.clone(),
                                action,
                            });
                        }
                    }
                    KeyCode::Char('d') => {
                        app.pending_delete = app.selected().map(|i| i.name.clone());
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

fn draw(f: &mut Frame, app: &mut App, notifications: &[Notification], summary: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(notifications.len().min(4) as u16 + 2),
            ]
            .as_ref(),
        )
        .split(f.size());

    draw_header(f, chunks[0], app, summary);
    match app.tab {
        Tab::Dashboard => draw_dashboard(f, chunks[1], app),
        Tab::Camera => draw_camera(f, chunks[1], app),
    }
    draw_notifications(f, chunks[2], notifications);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App, summary: &str) {
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Lookout",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled("CPU", Style::default().fg(Color::Magenta)),
        Span::raw(format!(" {:.0}%  ", app.stats.cpu)),
        Span::styled("Net", Style::default().fg(Color::Magenta)),
        Span::raw(format!(
            " up {:.0} MB / down {:.0} MB  ",
            app.stats.network_sent, app.stats.network_recv
        )),
        Span::raw(summary.to_string()),
        Span::raw("  "),
        Span::styled("tab", Style::default().fg(Color::Yellow)),
        Span::raw(" view  "),
        Span::styled("s/x", Style::default().fg(Color::Yellow)),
        Span::raw(" start/stop  "),
        Span::styled("d", Style::default().fg(Color::Yellow)),
        Span::raw(" delete  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(" quit"),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Summary"));
    f.render_widget(header, area);
}

fn status_color(instance: &Instance) -> Color {
    if instance.is_running() {
        Color::Green
    } else {
        Color::Red
    }
}

fn draw_dashboard(f: &mut Frame, area: Rect, app: &mut App) {
    let rows_area = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(area);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)].as_ref())
        .split(rows_area[1]);

    let rows: Vec<Row> = app
        .instances
        .iter()
        .map(|instance| {
            Row::new(vec![
                Cell::from(instance.status.label())
                    .style(Style::default().fg(status_color(instance))),
                Cell::from(instance.name.clone()),
                Cell::from(instance.frequency.to_string()),
                Cell::from(instance.source.label()),
                Cell::from(instance.link_text()),
            ])
        })
        .collect();
    let title = match &app.instances_error {
        Some(err) => format!("Instances (error: {err})"),
        None => "Instances".to_string(),
    };
    let table = Table::new(
        rows,
        [
            Constraint::Length(9),
            Constraint::Min(12),
            Constraint::Length(14),
            Constraint::Length(8),
            Constraint::Length(30),
        ],
    )
    .header(
        Row::new(vec!["Status", "Name", "Frequency (s)", "Type", "Link"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title(title))
    .highlight_style(Style::default().fg(Color::Yellow))
    .highlight_symbol("> ");
    f.render_stateful_widget(table, rows_area[0], &mut app.table);

    let markers = map::markers(&app.instances);
    let (x_bounds, y_bounds) = map::bounds(&markers);
    let canvas = Canvas::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Instance Locations"),
        )
        .x_bounds(x_bounds)
        .y_bounds(y_bounds)
        .paint(|ctx| {
            ctx.draw(&Map {
                resolution: MapResolution::High,
                color: Color::DarkGray,
            });
            ctx.layer();
            for marker in &markers {
                let color = if marker.running {
                    Color::Green
                } else {
                    Color::Red
                };
                ctx.draw(&Points {
                    coords: &[(marker.longitude, marker.latitude)],
                    color,
                });
                ctx.print(
                    marker.longitude,
                    marker.latitude,
                    Span::styled(format!(" {}", marker.name), Style::default().fg(color)),
                );
            }
        });
    f.render_widget(canvas, bottom[0]);

    let mut details: Vec<ListItem> = Vec::new();
    if let Some(selected) = app.selected() {
        if let Some(marker) = markers.iter().find(|m| m.name == selected.name) {
            details.extend(marker.popup.iter().cloned().map(ListItem::new));
        } else {
            details.push(ListItem::new(format!("{} has no location", selected.name)));
        }
        details.push(ListItem::new(""));
    }
    if let Some(name) = &app.pending_delete {
        details.push(ListItem::new(Line::from(Span::styled(
            format!("Delete '{name}'? press y to confirm"),
            Style::default().fg(Color::Red),
        ))));
    }
    details.extend(app.logs.iter().rev().map(|entry| ListItem::new(entry.clone())));
    let list = List::new(details).block(Block::default().borders(Borders::ALL).title("Details"));
    f.render_widget(list, bottom[1]);
}

fn draw_camera(f: &mut Frame, area: Rect, app: &App) {
    let mut items: Vec<ListItem> = Vec::new();
    for joined in &app.viewer.images {
        let header = Line::from(vec![
            Span::styled(
                joined.image.source.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("  {}  {}", joined.image.timestamp, joined.image.url)),
            Span::styled(
                joined
                    .detections
                    .as_ref()
                    .and_then(|d| d.best_score())
                    .map(|score| format!("  best {:.0}%", score * 100.0))
                    .unwrap_or_default(),
                Style::default().fg(Color::Yellow),
            ),
        ]);
        items.push(ListItem::new(header));
        match &joined.detections {
            None => items.push(ListItem::new("    no detections available")),
            Some(result) if result.results.is_empty() => {
                items.push(ListItem::new("    no objects detected"))
            }
            Some(result) => {
                for detection in &result.results {
                    let rect = detection.overlay();
                    items.push(ListItem::new(Line::from(Span::styled(
                        format!(
                            "    {:>5.1}%  at {:.1}%, {:.1}%  size {:.1}% x {:.1}%",
                            detection.score * 100.0,
                            rect.left,
                            rect.top,
                            rect.width,
                            rect.height
                        ),
                        Style::default().fg(Color::Red),
                    ))));
                }
            }
        }
    }
    let updated = app
        .viewer
        .updated_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".into());
    let title = format!(
        "Camera View ({} images, {} with detections, updated {})",
        app.viewer.images.len(),
        app.viewer.annotated_count(),
        updated
    );
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(list, area);
}

fn draw_notifications(f: &mut Frame, area: Rect, notifications: &[Notification]) {
    let items: Vec<ListItem> = notifications
        .iter()
        .rev()
        .take(4)
        .map(|n| {
            let color = match n.kind {
                NotificationKind::Success => Color::Green,
                NotificationKind::Error => Color::Red,
                NotificationKind::Info => Color::Blue,
            };
            ListItem::new(Line::from(Span::styled(
                n.message.clone(),
                Style::default().fg(color),
            )))
        })
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Notifications"));
    f.render_widget(list, area);
}

fn format_event(event: &PushEvent) -> String {
    let timestamp = event.received_at.format("%H:%M:%S");
    match &event.payload {
        EventPayload::Connected => format!("[{}] push channel connected", timestamp),
        EventPayload::Stats(stats) => format!("[{}] cpu {:.0}%", timestamp, stats.cpu),
        EventPayload::InstanceAdded(instance) => {
            format!("[{}] instance added: {}", timestamp, instance.name)
        }
        EventPayload::InstanceUpdated { name } => {
            format!("[{}] instance updated: {}", timestamp, name)
        }
        EventPayload::InstanceDeleted { name } => {
            format!("[{}] instance deleted: {}", timestamp, name)
        }
        EventPayload::InstanceStatusChanged { name, status } => {
            format!("[{}] {} is now {}", timestamp, name, status.as_str())
        }
        EventPayload::Unknown { event: name, data } => {
            format!("[{}] {} {}", timestamp, name, data)
        }
    }
}
