//! Live plot of telemetry from a Nordic UART style peripheral.
//!
//! Run with: cargo run --example telemetry_plot -- <device-name> [text|scalar|xyz]
//!
//! Connects to the named device, binds RX to the UART TX characteristic and
//! TX to the UART RX characteristic, then plots decoded samples.
//!
//! ## Keyboard Controls
//!
//! | Key | Action |
//! |-----|--------|
//! | `L` | Send `Live` to the device |
//! | `C` | Clear the plot |
//! | `+/-` | Grow/shrink the sample window |
//! | `Q/Esc` | Quit |

use ble_telemetry_link::ble::{UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID};
use ble_telemetry_link::data::Axis as Series;
use ble_telemetry_link::{
    BleSession, ConnectionState, Error, PlotBuffer, Result, SessionConfig, SessionEvent,
    SessionHandle, Telemetry, TelemetryMode,
};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{prelude::*, widgets::*};
use std::io::{self, stdout, Stdout};
use std::time::Duration;
use tokio::sync::broadcast;

type Terminal = ratatui::Terminal<CrosstermBackend<Stdout>>;

const WINDOW_STEP: usize = 50;

struct App {
    session: SessionHandle,
    events: broadcast::Receiver<SessionEvent>,
    mode: TelemetryMode,
    plot: PlotBuffer,
    state: ConnectionState,
    last_line: String,
    packets: u64,
}

impl App {
    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(SessionEvent::RxValue(value)) => {
                    self.packets += 1;
                    match Telemetry::decode(self.mode, &value) {
                        Telemetry::Text(text) => self.last_line = text.trim_end().to_string(),
                        other => {
                            self.plot.extend(&other);
                        }
                    }
                }
                Ok(SessionEvent::StateChanged(state)) => self.state = state,
                Ok(SessionEvent::Console(line)) => self.last_line = line,
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.last_line = format!("Dropped {} events", n);
                }
                Err(_) => break,
            }
        }
    }
}

fn setup_terminal() -> io::Result<Terminal> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    ratatui::Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Terminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()
}

fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::vertical([Constraint::Min(10), Constraint::Length(3)]).split(frame.area());

    let series: Vec<Vec<(f64, f64)>> = Series::ALL.iter().map(|s| app.plot.points(*s)).collect();
    let colors = [Color::Blue, Color::Red, Color::Green];
    let names = ["x", "y", "z"];

    let datasets: Vec<Dataset> = series
        .iter()
        .zip(colors)
        .zip(names)
        .filter(|((points, _), _)| !points.is_empty())
        .map(|((points, color), name)| {
            Dataset::default()
                .name(name)
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(color))
                .data(points)
        })
        .collect();

    let (lo, hi) = app.plot.bounds().unwrap_or((-1, 1));
    let (lo, hi) = (f64::from(lo) - 1.0, f64::from(hi) + 1.0);
    let width = app.plot.max_points() as f64;

    let chart = Chart::new(datasets)
        .block(
            Block::bordered().title(format!(
                " Telemetry [{:?}] window {} ",
                app.mode,
                app.plot.max_points()
            )),
        )
        .x_axis(
            ratatui::widgets::Axis::default()
                .title("Sample")
                .bounds([0.0, width])
                .labels(vec![Span::raw("0"), Span::raw(format!("{}", width))]),
        )
        .y_axis(
            ratatui::widgets::Axis::default()
                .title("Value")
                .bounds([lo, hi])
                .labels(vec![
                    Span::raw(format!("{:.0}", lo)),
                    Span::raw(format!("{:.0}", hi)),
                ]),
        );
    frame.render_widget(chart, chunks[0]);

    let status = Paragraph::new(format!(
        "{} | packets: {} | {}",
        app.state, app.packets, app.last_line
    ))
    .block(Block::bordered().title(" Status "));
    frame.render_widget(status, chunks[1]);
}

async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    what: &str,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> Result<()> {
    let found = tokio::time::timeout(Duration::from_secs(30), async {
        while let Ok(event) = events.recv().await {
            if wanted(&event) {
                return true;
            }
        }
        false
    })
    .await;

    match found {
        Ok(true) => Ok(()),
        _ => Err(Error::Internal(format!("Timed out waiting for {}", what))),
    }
}

async fn open_link(session: &SessionHandle, device: &str) -> Result<()> {
    let mut events = session.subscribe();

    session.start_discovery().await?;
    wait_for(&mut events, "scan", |e| {
        matches!(e, SessionEvent::DiscoveryFinished { .. })
    })
    .await?;

    session.select_device(device).await?;
    wait_for(&mut events, "services", |e| {
        *e == SessionEvent::StateChanged(ConnectionState::Ready)
    })
    .await?;

    session.select_service(UART_SERVICE_UUID.to_string()).await?;
    wait_for(&mut events, "characteristics", |e| {
        *e == SessionEvent::CharacteristicsUpdated
    })
    .await?;

    session
        .select_notify_characteristic(UART_TX_UUID.to_string())
        .await?;
    session
        .select_write_characteristic(UART_RX_UUID.to_string())
        .await
}

async fn run_app(terminal: &mut Terminal, app: &mut App) -> Result<()> {
    loop {
        app.drain_events();

        terminal
            .draw(|frame| render(frame, app))
            .map_err(|e| Error::Internal(format!("Draw error: {}", e)))?;

        let has_event = event::poll(Duration::from_millis(50))
            .map_err(|e| Error::Internal(format!("Poll error: {}", e)))?;

        if has_event {
            let event =
                event::read().map_err(|e| Error::Internal(format!("Read error: {}", e)))?;

            if let Event::Key(key) = event {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char('c') => app.plot.clear(),
                    KeyCode::Char('l') => app.session.send("Live").await?,
                    KeyCode::Char('+') => {
                        let max = app.plot.max_points() + WINDOW_STEP;
                        app.plot.set_max_points(max);
                    }
                    KeyCode::Char('-') => {
                        let max = app.plot.max_points().saturating_sub(WINDOW_STEP);
                        app.plot.set_max_points(max);
                    }
                    _ => {}
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(device) = args.next() else {
        eprintln!("Usage: telemetry_plot <device-name> [text|scalar|xyz]");
        std::process::exit(2);
    };
    let mode = args
        .next()
        .and_then(|m| TelemetryMode::from_name(&m))
        .unwrap_or(TelemetryMode::Scalar);

    // Initialize logging to file (so it doesn't interfere with TUI)
    if let Ok(log_file) = std::fs::File::create("telemetry_plot.log") {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("ble_telemetry_link=debug".parse().unwrap()),
            )
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(log_file))
            .init();
    }

    println!("Connecting to {} ...", device);
    let session = BleSession::connect_default(SessionConfig::default()).await?;
    open_link(&session, &device).await?;

    let mut app = App {
        events: session.subscribe(),
        session,
        mode,
        plot: PlotBuffer::default(),
        state: ConnectionState::Ready,
        last_line: String::new(),
        packets: 0,
    };

    // Setup terminal
    let mut terminal = setup_terminal()
        .map_err(|e| Error::Internal(format!("Failed to setup terminal: {}", e)))?;

    let result = run_app(&mut terminal, &mut app).await;

    restore_terminal(&mut terminal)
        .map_err(|e| Error::Internal(format!("Failed to restore terminal: {}", e)))?;

    app.session.shutdown().await?;
    result
}
