use std::{
    cmp, io, thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use busboard_core::{
    bootstrap::Surroundings,
    config::AppConfig,
    models::{ArrivalInfo, DisplayStop, FavoriteBus, RouteDetails, StopSearchResult},
    reconcile::{CycleOutcome, ReconcileEngine},
    scheduler::RefreshTrigger,
    search::{build_saved_stop, rank_stops, FavoriteSelection, ToggleOutcome, MIN_QUERY_CHARS},
    storage::FileStorage,
    store::{CommitStatus, FavoriteRemoval, StopStore, StoreError},
};
use chrono::{DateTime, Local};
use crossterm::{
    event::{
        self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::block_font;

const TICK_RATE: Duration = Duration::from_millis(250);
const MAX_QUERY_LEN: usize = 40;
const HOURLY_CELL_WIDTH: u16 = 16;

#[derive(Debug, Clone)]
struct Theme {
    primary_fg: Color,
    accent: Color,
    muted: Color,
    selection_bg: Color,
    success: Color,
    warning: Color,
    danger: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary_fg: Color::White,
            accent: Color::Cyan,
            muted: Color::DarkGray,
            selection_bg: Color::DarkGray,
            success: Color::Green,
            warning: Color::Yellow,
            danger: Color::Red,
        }
    }
}

enum AppEvent {
    Input(Event),
    Tick,
    NearbyLoaded(Vec<StopSearchResult>),
    RoutesLoaded {
        stop_id: String,
        routes: Vec<FavoriteBus>,
    },
    RouteLoaded {
        route_id: String,
        details: RouteDetails,
    },
}

/// One selectable line of the stop list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Row {
    Stop(usize),
    Arrival(usize, usize),
}

impl Row {
    fn stop_index(self) -> usize {
        match self {
            Row::Stop(stop) | Row::Arrival(stop, _) => stop,
        }
    }
}

fn dashboard_rows(stops: &[DisplayStop]) -> Vec<Row> {
    stops
        .iter()
        .enumerate()
        .flat_map(|(stop_idx, entry)| {
            std::iter::once(Row::Stop(stop_idx))
                .chain((0..entry.arrivals.len()).map(move |idx| Row::Arrival(stop_idx, idx)))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddStep {
    Search,
    SelectRoutes,
}

struct AddStopFlow {
    step: AddStep,
    query: String,
    nearby: Vec<StopSearchResult>,
    searching: bool,
    cursor: usize,
    stop: Option<StopSearchResult>,
    routes: Vec<FavoriteBus>,
    loading_routes: bool,
    selection: FavoriteSelection,
    max_favorites: u8,
}

impl AddStopFlow {
    fn new(max_favorites: u8) -> Self {
        Self {
            step: AddStep::Search,
            query: String::new(),
            nearby: Vec::new(),
            searching: true,
            cursor: 0,
            stop: None,
            routes: Vec::new(),
            loading_routes: false,
            selection: FavoriteSelection::new(max_favorites),
            max_favorites,
        }
    }

    fn results(&self) -> Vec<&StopSearchResult> {
        rank_stops(&self.nearby, &self.query)
    }

    fn visible_len(&self) -> usize {
        match self.step {
            AddStep::Search => self.results().len(),
            AddStep::SelectRoutes => self.routes.len(),
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.visible_len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        let next = self.cursor as isize + delta;
        self.cursor = next.clamp(0, len as isize - 1) as usize;
    }

    fn back_to_search(&mut self) {
        self.step = AddStep::Search;
        self.stop = None;
        self.routes.clear();
        self.loading_routes = false;
        self.selection = FavoriteSelection::new(self.max_favorites);
        self.cursor = 0;
    }
}

struct RouteView {
    route_id: String,
    route_no: String,
    stop_name: String,
    details: Option<RouteDetails>,
    cursor: usize,
}

struct SettingsPrompt {
    input: String,
    error: Option<String>,
}

/// Terminal dashboard for saved stops.
pub struct BusboardApp {
    config: AppConfig,
    store: StopStore,
    storage: FileStorage,
    engine: ReconcileEngine,
    surroundings: Surroundings,
    theme: Theme,
    cursor: usize,
    status: String,
    should_quit: bool,
    add_flow: Option<AddStopFlow>,
    route_view: Option<RouteView>,
    settings: Option<SettingsPrompt>,
    event_tx: Option<mpsc::Sender<AppEvent>>,
    trigger_rx: Option<mpsc::Receiver<RefreshTrigger>>,
    cycle_tx: mpsc::Sender<CycleOutcome>,
    cycle_rx: Option<mpsc::Receiver<CycleOutcome>>,
    refreshing: bool,
    last_refresh: Option<DateTime<Local>>,
    last_autosave: Instant,
}

impl BusboardApp {
    pub fn new(
        config: AppConfig,
        store: StopStore,
        storage: FileStorage,
        engine: ReconcileEngine,
        surroundings: Surroundings,
    ) -> Self {
        let (cycle_tx, cycle_rx) = mpsc::channel(8);
        let status = if config.location().is_some() {
            format!("Loaded {} saved stops", store.saved_stops().len())
        } else {
            format!(
                "Loaded {} saved stops • no location configured, weather and search disabled",
                store.saved_stops().len()
            )
        };
        Self {
            config,
            store,
            storage,
            engine,
            surroundings,
            theme: Theme::default(),
            cursor: 0,
            status,
            should_quit: false,
            add_flow: None,
            route_view: None,
            settings: None,
            event_tx: None,
            trigger_rx: None,
            cycle_tx,
            cycle_rx: Some(cycle_rx),
            refreshing: false,
            last_refresh: None,
            last_autosave: Instant::now(),
        }
    }

    pub fn attach_scheduler(&mut self, receiver: mpsc::Receiver<RefreshTrigger>) {
        self.trigger_rx = Some(receiver);
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen, EnableFocusChange)
            .context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.hide_cursor()?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(128);
        spawn_input_thread(event_tx.clone());
        self.event_tx = Some(event_tx);

        let mut trigger_rx = self.trigger_rx.take();
        let Some(mut cycle_rx) = self.cycle_rx.take() else {
            restore_terminal(&mut terminal)?;
            anyhow::bail!("dashboard is already running");
        };

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }

            tokio::select! {
                maybe_event = event_rx.recv() => {
                    if !self.process_app_event(maybe_event) {
                        break;
                    }
                }
                Some(trigger) = next_trigger(&mut trigger_rx) => self.request_refresh(trigger),
                Some(outcome) = cycle_rx.recv() => self.apply_outcome(outcome),
            }
        }

        self.persist("quit");
        restore_terminal(&mut terminal)?;
        self.event_tx = None;
        Ok(())
    }

    fn request_refresh(&mut self, trigger: RefreshTrigger) {
        let stops = self.store.saved_stops().to_vec();
        if stops.is_empty() {
            debug!(?trigger, "refresh skipped, no saved stops");
            return;
        }
        let generation = self.engine.start_cycle(stops, self.cycle_tx.clone());
        self.refreshing = true;
        debug!(?trigger, generation = generation.value(), "refresh requested");
        if trigger == RefreshTrigger::Manual {
            self.status = "Refreshing arrivals…".to_string();
        }
    }

    fn apply_outcome(&mut self, outcome: CycleOutcome) {
        let generations = self.engine.generations();
        match self.store.commit(outcome, &generations) {
            CommitStatus::Applied => {
                self.refreshing = false;
                self.last_refresh = Some(Local::now());
                self.clamp_cursor();
            }
            CommitStatus::Stale => debug!("superseded refresh ignored"),
        }
    }

    fn persist(&mut self, reason: &str) {
        if self.store.flush(&self.storage) {
            info!(reason, "saved stops persisted");
        } else if self.store.is_dirty() {
            self.status = "Saving failed; will retry".to_string();
        }
    }

    fn handle_tick(&mut self) {
        if let Some(interval) = self.config.autosave_interval() {
            if self.last_autosave.elapsed() >= interval {
                self.last_autosave = Instant::now();
                self.persist("autosave");
            }
        }
    }

    fn process_app_event(&mut self, maybe_event: Option<AppEvent>) -> bool {
        match maybe_event {
            Some(AppEvent::Input(event)) => {
                self.handle_input(event);
                true
            }
            Some(AppEvent::Tick) => {
                self.handle_tick();
                true
            }
            Some(AppEvent::NearbyLoaded(stops)) => {
                if let Some(flow) = self.add_flow.as_mut() {
                    info!(count = stops.len(), "nearby stops loaded");
                    flow.searching = false;
                    flow.nearby = stops;
                    flow.cursor = 0;
                }
                true
            }
            Some(AppEvent::RoutesLoaded { stop_id, routes }) => {
                if let Some(flow) = self.add_flow.as_mut() {
                    let current = flow.stop.as_ref().map(|stop| stop.id.as_str());
                    if flow.step == AddStep::SelectRoutes && current == Some(stop_id.as_str()) {
                        flow.loading_routes = false;
                        flow.routes = routes;
                        flow.cursor = 0;
                    }
                }
                true
            }
            Some(AppEvent::RouteLoaded { route_id, details }) => {
                if let Some(view) = self.route_view.as_mut() {
                    if view.route_id == route_id {
                        view.details = Some(details);
                    }
                }
                true
            }
            None => false,
        }
    }

    fn handle_input(&mut self, event: Event) {
        match event {
            Event::FocusLost => self.persist("focus lost"),
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if key.modifiers == KeyModifiers::CONTROL && key.code == KeyCode::Char('c') {
                    self.should_quit = true;
                    return;
                }
                if let Some(mut prompt) = self.settings.take() {
                    if self.handle_settings_key(&mut prompt, key) {
                        self.settings = Some(prompt);
                    }
                } else if let Some(mut flow) = self.add_flow.take() {
                    if self.handle_add_key(&mut flow, key) {
                        self.add_flow = Some(flow);
                    }
                } else if let Some(mut view) = self.route_view.take() {
                    if handle_route_key(&mut view, key) {
                        self.route_view = Some(view);
                    }
                } else {
                    self.handle_dashboard_key(key);
                }
            }
            _ => {}
        }
    }

    fn handle_dashboard_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('r') => self.request_refresh(RefreshTrigger::Manual),
            KeyCode::Char('a') => self.open_add_flow(),
            KeyCode::Char('d') | KeyCode::Delete => self.remove_selected_stop(),
            KeyCode::Char('x') => self.remove_selected_favorite(),
            KeyCode::Char('s') => {
                self.settings = Some(SettingsPrompt {
                    input: self.store.max_favorites().to_string(),
                    error: None,
                });
            }
            KeyCode::Char('w') => {
                if self.store.flush(&self.storage) {
                    self.status = "Saved".to_string();
                } else if self.store.is_dirty() {
                    self.status = "Saving failed; will retry".to_string();
                } else {
                    self.status = "Nothing to save".to_string();
                }
            }
            KeyCode::Enter => self.open_route_view(),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::PageUp => self.move_cursor(-10),
            KeyCode::PageDown => self.move_cursor(10),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => {
                self.cursor = dashboard_rows(self.store.display_stops())
                    .len()
                    .saturating_sub(1)
            }
            _ => {}
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = dashboard_rows(self.store.display_stops()).len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        let next = self.cursor as isize + delta;
        self.cursor = next.clamp(0, len as isize - 1) as usize;
    }

    fn clamp_cursor(&mut self) {
        let len = dashboard_rows(self.store.display_stops()).len();
        self.cursor = cmp::min(self.cursor, len.saturating_sub(1));
    }

    fn selected_row(&self) -> Option<Row> {
        dashboard_rows(self.store.display_stops())
            .get(self.cursor)
            .copied()
    }

    fn remove_selected_stop(&mut self) {
        let Some(row) = self.selected_row() else {
            return;
        };
        let Some(entry) = self.store.display_stops().get(row.stop_index()) else {
            return;
        };
        let stop_id = entry.stop.stop_id.clone();
        let stop_name = entry.stop.stop_name.clone();
        if self.store.remove_stop(&stop_id) {
            self.status = format!("Removed {stop_name}");
            self.clamp_cursor();
        }
    }

    fn remove_selected_favorite(&mut self) {
        let Some(Row::Arrival(stop_idx, arrival_idx)) = self.selected_row() else {
            self.status = "Select a route to remove it".to_string();
            return;
        };
        let Some(entry) = self.store.display_stops().get(stop_idx) else {
            return;
        };
        let Some(arrival) = entry.arrivals.get(arrival_idx) else {
            return;
        };
        let stop_id = entry.stop.stop_id.clone();
        let stop_name = entry.stop.stop_name.clone();
        let route_id = arrival.route_id.clone();
        let route_no = arrival.route_no.clone();

        self.status = match self.store.remove_favorite_bus(&stop_id, &route_id) {
            FavoriteRemoval::Removed => format!("Stopped tracking {route_no} at {stop_name}"),
            FavoriteRemoval::StopRemoved => {
                format!("{route_no} was the last favorite; removed {stop_name}")
            }
            FavoriteRemoval::NotFound => format!("{route_no} is not a favorite at {stop_name}"),
        };
        self.clamp_cursor();
    }

    fn open_route_view(&mut self) {
        let Some(Row::Arrival(stop_idx, arrival_idx)) = self.selected_row() else {
            return;
        };
        let Some(entry) = self.store.display_stops().get(stop_idx) else {
            return;
        };
        let Some(arrival) = entry.arrivals.get(arrival_idx) else {
            return;
        };
        let view = RouteView {
            route_id: arrival.route_id.clone(),
            route_no: arrival.route_no.clone(),
            stop_name: entry.stop.stop_name.clone(),
            details: None,
            cursor: 0,
        };
        let city_code = entry.stop.city_code.clone();

        if let Some(sender) = self.event_tx.clone() {
            let source = self.engine.source();
            let route_id = view.route_id.clone();
            tokio::spawn(async move {
                let details = source.route_details(&route_id, &city_code).await;
                if sender
                    .send(AppEvent::RouteLoaded { route_id, details })
                    .await
                    .is_err()
                {
                    debug!("route detail receiver dropped");
                }
            });
        }
        self.route_view = Some(view);
    }

    fn open_add_flow(&mut self) {
        let Some((latitude, longitude)) = self.config.location() else {
            self.status =
                "Set latitude and longitude in the config file to search nearby stops".to_string();
            return;
        };
        if let Some(sender) = self.event_tx.clone() {
            let source = self.engine.source();
            tokio::spawn(async move {
                let stops = source.nearby_stops(latitude, longitude).await;
                if sender.send(AppEvent::NearbyLoaded(stops)).await.is_err() {
                    debug!("nearby stop receiver dropped");
                }
            });
        }
        self.add_flow = Some(AddStopFlow::new(self.store.max_favorites()));
    }

    /// Returns `false` once the flow is closed.
    fn handle_add_key(&mut self, flow: &mut AddStopFlow, key: KeyEvent) -> bool {
        match flow.step {
            AddStep::Search => match key.code {
                KeyCode::Esc => return false,
                KeyCode::Up => flow.move_cursor(-1),
                KeyCode::Down => flow.move_cursor(1),
                KeyCode::Backspace => {
                    flow.query.pop();
                    flow.cursor = 0;
                }
                KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                    if flow.query.chars().count() < MAX_QUERY_LEN {
                        flow.query.push(ch);
                        flow.cursor = 0;
                    }
                }
                KeyCode::Enter => {
                    let Some(stop) = flow.results().get(flow.cursor).map(|stop| (*stop).clone())
                    else {
                        return true;
                    };
                    if stop.id.is_empty() {
                        self.status = StoreError::MissingStopId.to_string();
                        return true;
                    }
                    self.load_routes(&stop);
                    flow.step = AddStep::SelectRoutes;
                    flow.loading_routes = true;
                    flow.cursor = 0;
                    flow.stop = Some(stop);
                }
                _ => {}
            },
            AddStep::SelectRoutes => match key.code {
                KeyCode::Esc | KeyCode::Backspace => flow.back_to_search(),
                KeyCode::Up | KeyCode::Char('k') => flow.move_cursor(-1),
                KeyCode::Down | KeyCode::Char('j') => flow.move_cursor(1),
                KeyCode::Char(' ') => {
                    if let Some(bus) = flow.routes.get(flow.cursor).cloned() {
                        if flow.selection.toggle(&bus) == ToggleOutcome::LimitReached {
                            self.status = format!(
                                "You can pick at most {} routes per stop",
                                flow.selection.limit()
                            );
                        }
                    }
                }
                KeyCode::Enter => return !self.save_new_stop(flow),
                _ => {}
            },
        }
        true
    }

    fn load_routes(&self, stop: &StopSearchResult) {
        let Some(sender) = self.event_tx.clone() else {
            return;
        };
        let source = self.engine.source();
        let stop_id = stop.id.clone();
        let city_code = stop.city_code.clone();
        tokio::spawn(async move {
            let routes = source.routes_for_stop(&stop_id, &city_code).await;
            if sender
                .send(AppEvent::RoutesLoaded { stop_id, routes })
                .await
                .is_err()
            {
                debug!("route list receiver dropped");
            }
        });
    }

    /// Returns `true` when the stop was added.
    fn save_new_stop(&mut self, flow: &AddStopFlow) -> bool {
        let Some(hit) = flow.stop.as_ref() else {
            return false;
        };
        let Some(stop) = build_saved_stop(hit, &flow.selection, &flow.routes) else {
            self.status = "Select at least one route first".to_string();
            return false;
        };
        let name = stop.stop_name.clone();
        match self.store.add_stop(stop) {
            Ok(()) => {
                self.status = format!("Added {name}");
                self.request_refresh(RefreshTrigger::Manual);
                true
            }
            Err(err) => {
                warn!(%err, "stop not added");
                self.status = err.to_string();
                false
            }
        }
    }

    /// Returns `false` once the prompt is closed.
    fn handle_settings_key(&mut self, prompt: &mut SettingsPrompt, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc => false,
            KeyCode::Backspace => {
                prompt.input.pop();
                true
            }
            KeyCode::Char(ch) if ch.is_ascii_digit() && prompt.input.len() < 3 => {
                prompt.input.push(ch);
                true
            }
            KeyCode::Enter => match self.store.set_max_favorites_from_input(&prompt.input) {
                Ok(value) => {
                    self.persist("settings");
                    self.status = format!("Up to {value} favorite routes per new stop");
                    false
                }
                Err(err) => {
                    prompt.error = Some(err.to_string());
                    true
                }
            },
            _ => true,
        }
    }

    fn draw(&mut self, frame: &mut Frame) {
        self.draw_dashboard(frame);
        if let Some(view) = &self.route_view {
            self.render_route_view(frame, view);
        }
        if let Some(flow) = &self.add_flow {
            self.render_add_flow(frame, flow);
        }
        if let Some(prompt) = &self.settings {
            self.render_settings(frame, prompt);
        }
    }

    fn draw_dashboard(&self, frame: &mut Frame) {
        let size = frame.size();
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(block_font::HEIGHT + 2),
                Constraint::Length(5),
                Constraint::Min(5),
                Constraint::Length(4),
            ])
            .split(size);

        let header = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(34),
                Constraint::Min(24),
                Constraint::Percentage(40),
            ])
            .split(layout[0]);

        self.render_clock(frame, header[0]);
        self.render_weather(frame, header[1]);
        self.render_schedule(frame, header[2]);
        self.render_hourly(frame, layout[1]);
        self.render_stops(frame, layout[2]);
        self.render_status(frame, layout[3]);
    }

    fn render_clock(&self, frame: &mut Frame, area: Rect) {
        let now = Local::now();
        let content: Vec<Line> = block_font::render(&now.format("%H:%M").to_string())
            .into_iter()
            .map(|line| Line::from(Span::styled(line, Style::default().fg(self.theme.accent))))
            .collect();
        let paragraph = Paragraph::new(content)
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);
        frame.render_widget(paragraph, area);
    }

    fn render_weather(&self, frame: &mut Frame, area: Rect) {
        let now = Local::now();
        let city = self
            .surroundings
            .city
            .as_ref()
            .map(|city| city.name.clone())
            .unwrap_or_else(|| "Unknown city".to_string());
        let mut lines = vec![
            Line::from(Span::styled(
                now.format("%A, %-d %B").to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(city, Style::default().fg(self.theme.muted))),
        ];
        match &self.surroundings.weather {
            Some(weather) => lines.push(Line::from(vec![
                Span::styled(
                    format!("{} ", weather.condition.icon()),
                    Style::default().fg(self.theme.warning),
                ),
                Span::raw(format!("{}  ", weather.condition.label())),
                Span::styled(
                    format!("{}°C", weather.temperature),
                    Style::default()
                        .fg(self.theme.primary_fg)
                        .add_modifier(Modifier::BOLD),
                ),
            ])),
            None => lines.push(Line::from(Span::styled(
                "Weather unavailable",
                Style::default().fg(self.theme.muted),
            ))),
        }
        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Today"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_schedule(&self, frame: &mut Frame, area: Rect) {
        let schedule = &self.surroundings.schedule;
        let style = if schedule.has_schedule {
            Style::default().fg(self.theme.primary_fg)
        } else {
            Style::default().fg(self.theme.muted)
        };
        let paragraph = Paragraph::new(Line::from(Span::styled(schedule.title.clone(), style)))
            .block(Block::default().borders(Borders::ALL).title("Schedule"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_hourly(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Next hours");
        let Some(weather) = &self.surroundings.weather else {
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "No forecast",
                    Style::default().fg(self.theme.muted),
                ))
                .block(block),
                area,
            );
            return;
        };
        let fits = (area.width.saturating_sub(2) / HOURLY_CELL_WIDTH).max(1) as usize;
        let cell = HOURLY_CELL_WIDTH as usize;
        let mut hours = Vec::new();
        let mut temps = Vec::new();
        let mut rain = Vec::new();
        for entry in weather.hourly.iter().take(fits) {
            hours.push(Span::styled(
                format!("{:<cell$}", format!("{:02}h {}", entry.hour, entry.condition.icon())),
                Style::default().fg(self.theme.accent),
            ));
            temps.push(Span::raw(format!("{:<cell$}", format!("{}°", entry.temperature))));
            rain.push(Span::styled(
                format!("{:<cell$}", format!("{}% rain", entry.rain_chance)),
                Style::default().fg(self.theme.muted),
            ));
        }
        let paragraph =
            Paragraph::new(vec![Line::from(hours), Line::from(temps), Line::from(rain)])
                .block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_stops(&self, frame: &mut Frame, area: Rect) {
        let title = match (self.refreshing, self.last_refresh) {
            (true, _) => "Stops (refreshing…)".to_string(),
            (false, Some(at)) => format!("Stops (updated {})", at.format("%H:%M:%S")),
            (false, None) => "Stops".to_string(),
        };
        let block = Block::default().borders(Borders::ALL).title(title);
        let stops = self.store.display_stops();
        if stops.is_empty() {
            let paragraph = Paragraph::new("No saved stops. Press 'a' to add one.")
                .block(block)
                .alignment(Alignment::Center);
            frame.render_widget(paragraph, area);
            return;
        }

        let items: Vec<ListItem> = dashboard_rows(stops)
            .into_iter()
            .filter_map(|row| match row {
                Row::Stop(idx) => stops.get(idx).map(|entry| {
                    ListItem::new(Line::from(vec![
                        Span::styled(
                            entry.stop.stop_name.clone(),
                            Style::default()
                                .fg(self.theme.accent)
                                .add_modifier(Modifier::BOLD),
                        ),
                        Span::styled(
                            format!("  #{}", entry.stop.stop_id),
                            Style::default().fg(self.theme.muted),
                        ),
                    ]))
                }),
                Row::Arrival(stop_idx, idx) => stops.get(stop_idx).and_then(|entry| {
                    entry.arrivals.get(idx).map(|arrival| {
                        let marker = if entry.stop.is_favorite(&arrival.route_id) {
                            "★"
                        } else {
                            "·"
                        };
                        ListItem::new(Line::from(vec![
                            Span::raw(format!("  {marker} ")),
                            Span::styled(
                                format!("{:<8}", arrival.route_no),
                                Style::default().add_modifier(Modifier::BOLD),
                            ),
                            Span::styled(format_arrival(arrival), self.arrival_style(arrival)),
                        ]))
                    })
                }),
            })
            .collect();

        let mut list_state = ListState::default();
        list_state.select(Some(self.cursor));
        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().bg(self.theme.selection_bg));
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn arrival_style(&self, arrival: &ArrivalInfo) -> Style {
        if !arrival.has_live_data() {
            Style::default().fg(self.theme.muted)
        } else if arrival.arr_time < 1 {
            Style::default()
                .fg(self.theme.warning)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(self.theme.success)
        }
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Status");
        let help = Line::from(Span::styled(
            "r refresh  a add  d remove stop  x remove route  Enter route  s settings  w save  q quit",
            Style::default().fg(self.theme.muted),
        ));
        let status_style = if self.store.is_dirty() {
            Style::default().fg(self.theme.warning)
        } else {
            Style::default()
        };
        let paragraph = Paragraph::new(vec![
            Line::from(Span::styled(self.status.clone(), status_style)),
            help,
        ])
        .block(block)
        .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_add_flow(&self, frame: &mut Frame, flow: &AddStopFlow) {
        let frame_area = frame.size();
        let area = centered_rect(70, frame_area.height.saturating_sub(6).max(10), frame_area);
        frame.render_widget(Clear, area);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(1),
            ])
            .split(area);

        match flow.step {
            AddStep::Search => {
                let input = Paragraph::new(Line::from(vec![
                    Span::styled("> ", Style::default().fg(self.theme.accent)),
                    Span::raw(flow.query.clone()),
                ]))
                .block(Block::default().borders(Borders::ALL).title("Add stop: search"));
                frame.render_widget(input, layout[0]);
                let cursor_x = (layout[0].x + 3 + flow.query.chars().count() as u16)
                    .min(layout[0].x + layout[0].width.saturating_sub(2));
                frame.set_cursor(cursor_x, layout[0].y + 1);

                let results = flow.results();
                let block = Block::default().borders(Borders::ALL);
                if flow.searching || results.is_empty() {
                    let message = if flow.searching {
                        "Searching nearby stops…".to_string()
                    } else if flow.query.trim().chars().count() < MIN_QUERY_CHARS {
                        format!(
                            "Type at least {MIN_QUERY_CHARS} characters to filter {} nearby stops",
                            flow.nearby.len()
                        )
                    } else {
                        "No matching stops".to_string()
                    };
                    frame.render_widget(
                        Paragraph::new(Span::styled(message, Style::default().fg(self.theme.muted)))
                            .block(block),
                        layout[1],
                    );
                } else {
                    let items: Vec<ListItem> = results
                        .iter()
                        .map(|stop| {
                            let mut spans = vec![Span::raw(stop.name.clone())];
                            if let Some(number) = &stop.stop_no {
                                spans.push(Span::styled(
                                    format!("  [{number}]"),
                                    Style::default().fg(self.theme.muted),
                                ));
                            }
                            ListItem::new(Line::from(spans))
                        })
                        .collect();
                    let mut list_state = ListState::default();
                    list_state.select(Some(flow.cursor));
                    let list = List::new(items)
                        .block(block)
                        .highlight_style(Style::default().bg(self.theme.selection_bg));
                    frame.render_stateful_widget(list, layout[1], &mut list_state);
                }
                self.render_hint(frame, layout[2], "Enter choose  Esc close");
            }
            AddStep::SelectRoutes => {
                let name = flow
                    .stop
                    .as_ref()
                    .map(|stop| stop.name.clone())
                    .unwrap_or_default();
                let header = Paragraph::new(Line::from(vec![
                    Span::styled(name, Style::default().add_modifier(Modifier::BOLD)),
                    Span::styled(
                        format!(
                            "  {}/{} routes selected",
                            flow.selection.len(),
                            flow.selection.limit()
                        ),
                        Style::default().fg(self.theme.muted),
                    ),
                ]))
                .block(Block::default().borders(Borders::ALL).title("Add stop: routes"));
                frame.render_widget(header, layout[0]);

                let block = Block::default().borders(Borders::ALL);
                if flow.loading_routes || flow.routes.is_empty() {
                    let message = if flow.loading_routes {
                        "Loading routes…"
                    } else {
                        "No routes serve this stop"
                    };
                    frame.render_widget(
                        Paragraph::new(Span::styled(message, Style::default().fg(self.theme.muted)))
                            .block(block),
                        layout[1],
                    );
                } else {
                    let items: Vec<ListItem> = flow
                        .routes
                        .iter()
                        .map(|bus| {
                            let selected = flow.selection.contains(&bus.route_id);
                            let mark = if selected { "[x]" } else { "[ ]" };
                            let style = if selected {
                                Style::default().fg(self.theme.success)
                            } else {
                                Style::default()
                            };
                            ListItem::new(Line::from(Span::styled(
                                format!("{mark} {}", bus.route_no),
                                style,
                            )))
                        })
                        .collect();
                    let mut list_state = ListState::default();
                    list_state.select(Some(flow.cursor));
                    let list = List::new(items)
                        .block(block)
                        .highlight_style(Style::default().bg(self.theme.selection_bg));
                    frame.render_stateful_widget(list, layout[1], &mut list_state);
                }
                self.render_hint(frame, layout[2], "Space toggle  Enter save  Esc back");
            }
        }
    }

    fn render_route_view(&self, frame: &mut Frame, view: &RouteView) {
        let frame_area = frame.size();
        let area = centered_rect(60, frame_area.height.saturating_sub(4), frame_area);
        frame.render_widget(Clear, area);
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("Route {} via {}", view.route_no, view.stop_name));

        let Some(details) = &view.details else {
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "Loading route…",
                    Style::default().fg(self.theme.muted),
                ))
                .block(block),
                area,
            );
            return;
        };

        let mut items = Vec::new();
        if details.bus_locations.is_empty() {
            items.push(ListItem::new(Span::styled(
                "No live vehicle positions",
                Style::default().fg(self.theme.muted),
            )));
        }
        for (stop, plates) in details.stops_with_buses() {
            let highlight = stop.name == view.stop_name;
            let name_style = if highlight {
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let mut spans = vec![
                Span::styled(
                    format!("{:>3} ", stop.order),
                    Style::default().fg(self.theme.muted),
                ),
                Span::styled(stop.name.clone(), name_style),
            ];
            if !plates.is_empty() {
                spans.push(Span::styled(
                    format!("  ▶ {}", plates.join(", ")),
                    Style::default().fg(self.theme.danger),
                ));
            }
            items.push(ListItem::new(Line::from(spans)));
        }
        if details.route_stops.is_empty() {
            items.push(ListItem::new(Span::styled(
                "Route information unavailable",
                Style::default().fg(self.theme.muted),
            )));
        }

        let mut list_state = ListState::default();
        list_state.select(Some(cmp::min(view.cursor, items.len().saturating_sub(1))));
        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().bg(self.theme.selection_bg));
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn render_settings(&self, frame: &mut Frame, prompt: &SettingsPrompt) {
        let area = centered_rect(48, 7, frame.size());
        frame.render_widget(Clear, area);

        let mut lines = vec![
            Line::from("Max favorite routes per stop (1-20)"),
            Line::from(vec![
                Span::styled("> ", Style::default().fg(self.theme.accent)),
                Span::raw(prompt.input.clone()),
            ]),
        ];
        match &prompt.error {
            Some(error) => lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(self.theme.danger),
            ))),
            None => lines.push(Line::from("")),
        }
        lines.push(Line::from(vec![
            Span::styled("Enter", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" apply  "),
            Span::styled("Esc", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" cancel"),
        ]));

        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Settings"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);

        let cursor_x = (area.x + 3 + prompt.input.len() as u16)
            .min(area.x + area.width.saturating_sub(2));
        frame.set_cursor(cursor_x, area.y + 2);
    }

    fn render_hint(&self, frame: &mut Frame, area: Rect, text: &str) {
        frame.render_widget(
            Paragraph::new(Span::styled(
                text.to_string(),
                Style::default().fg(self.theme.muted),
            )),
            area,
        );
    }
}

/// Returns `false` once the view is closed.
fn handle_route_key(view: &mut RouteView, key: KeyEvent) -> bool {
    let len = view
        .details
        .as_ref()
        .map(|details| details.route_stops.len() + usize::from(details.bus_locations.is_empty()))
        .unwrap_or(0);
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Enter => return false,
        KeyCode::Up | KeyCode::Char('k') => view.cursor = view.cursor.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => {
            view.cursor = cmp::min(view.cursor + 1, len.saturating_sub(1))
        }
        KeyCode::PageUp => view.cursor = view.cursor.saturating_sub(10),
        KeyCode::PageDown => view.cursor = cmp::min(view.cursor + 10, len.saturating_sub(1)),
        _ => {}
    }
    true
}

fn format_arrival(arrival: &ArrivalInfo) -> String {
    if !arrival.has_live_data() {
        return "no live data".to_string();
    }
    let eta = if arrival.arr_time < 1 {
        "arriving".to_string()
    } else {
        format!("{} min", arrival.arr_time)
    };
    match arrival.remaining_stops {
        1 => format!("{eta} · 1 stop away"),
        n if n > 1 => format!("{eta} · {n} stops away"),
        _ => eta,
    }
}

async fn next_trigger(
    receiver: &mut Option<mpsc::Receiver<RefreshTrigger>>,
) -> Option<RefreshTrigger> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), DisableFocusChange, LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use busboard_core::models::SavedStop;

    fn arrival(arr_time: i32, remaining_stops: i32) -> ArrivalInfo {
        ArrivalInfo {
            route_id: "R1".to_string(),
            route_no: "10".to_string(),
            arr_time,
            remaining_stops,
        }
    }

    #[test]
    fn arrival_labels() {
        assert_eq!(
            format_arrival(&ArrivalInfo::no_live_data(&FavoriteBus::new("R1", "10"))),
            "no live data"
        );
        assert_eq!(format_arrival(&arrival(0, 0)), "arriving");
        assert_eq!(format_arrival(&arrival(4, 1)), "4 min · 1 stop away");
        assert_eq!(format_arrival(&arrival(12, 5)), "12 min · 5 stops away");
    }

    #[test]
    fn rows_interleave_stops_and_arrivals() {
        let stop = SavedStop::new(
            "100",
            "Main St",
            "25",
            vec![FavoriteBus::new("R1", "10"), FavoriteBus::new("R2", "20")],
            Vec::new(),
        );
        let empty = SavedStop::new("200", "Dock", "25", Vec::new(), Vec::new());
        let rows = dashboard_rows(&[
            DisplayStop::without_live_data(stop),
            DisplayStop::without_live_data(empty),
        ]);
        assert_eq!(
            rows,
            vec![
                Row::Stop(0),
                Row::Arrival(0, 0),
                Row::Arrival(0, 1),
                Row::Stop(1)
            ]
        );
        assert_eq!(rows[2].stop_index(), 0);
    }

    #[test]
    fn centered_rect_fits_inside_area() {
        let area = Rect::new(0, 0, 40, 10);
        assert_eq!(centered_rect(20, 4, area), Rect::new(10, 3, 20, 4));
        assert_eq!(centered_rect(80, 20, area), area);
    }
}
