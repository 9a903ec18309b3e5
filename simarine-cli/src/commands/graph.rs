//! `graph pressure-history` — terminal chart of the 72-hour atmospheric
//! pressure series broadcast by the controller.
//!
//! Purely passive: listens for type 0xC1 frames on the broadcast port and
//! redraws when the series head changes (the controller repeats identical
//! payloads, so the newest sample is the stability key).

use std::time::Duration;

use anyhow::Result;
use chrono::{Local, TimeZone};
use clap::Subcommand;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::style::{Color, Style};
use ratatui::symbols;
use ratatui::widgets::{Axis, Block, Chart, Dataset, GraphType};
use ratatui::Frame;
use simarine_client::UdpTransport;
use simarine_proto::MessageType;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WINDOW_HOURS: f64 = 72.0;

#[derive(Subcommand, Debug)]
pub enum GraphCommand {
    /// Graph atmospheric pressure history
    PressureHistory {
        /// Convert raw samples to millibars
        #[arg(long)]
        convert: bool,
    },
}

struct ChartState {
    points: Vec<(f64, f64)>,
    captured_at: String,
    unit: &'static str,
}

pub async fn run(cmd: GraphCommand, token: CancellationToken) -> Result<()> {
    let GraphCommand::PressureHistory { convert } = cmd;

    let mut udp = UdpTransport::new();
    udp.open()?;

    let (series_tx, mut series_rx) = mpsc::channel::<(u32, Vec<u16>)>(8);
    let listen_token = token.clone();
    let listener = tokio::spawn(async move {
        let _ = udp
            .listen(listen_token, |msg, _| {
                if msg.message_type() != MessageType::AtmosphericPressureHistory {
                    return;
                }
                if let Some(field) = msg.fields().get(0) {
                    if let (Some(ts), Some(series)) = (field.timestamp(), field.timeseries()) {
                        let _ = series_tx.try_send((ts, series));
                    }
                }
            })
            .await;
    });

    let mut terminal = ratatui::init();
    let mut state: Option<ChartState> = None;
    let mut last_head: Option<u16> = None;

    while !token.is_cancelled() {
        while let Ok((ts, series)) = series_rx.try_recv() {
            // skip repeats of an unchanged series
            if series.first().copied() == last_head {
                continue;
            }
            last_head = series.first().copied();
            state = Some(chart_state(ts, &series, convert));
        }

        terminal.draw(|frame| draw(frame, &state))?;

        // raw mode swallows Ctrl-C as a key event, so quit keys are checked
        // here and the shared token covers SIGTERM
        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let ctrl_c = key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL);
                    if ctrl_c || key.code == KeyCode::Char('q') || key.code == KeyCode::Esc {
                        break;
                    }
                }
            }
        }
    }

    ratatui::restore();
    token.cancel();
    let _ = listener.await;
    Ok(())
}

fn chart_state(ts: u32, series: &[u16], convert: bool) -> ChartState {
    // newest first on the wire; plot oldest to newest across the window
    let values: Vec<f64> = series
        .iter()
        .rev()
        .map(|&v| if convert { v as f64 * 0.05 } else { v as f64 })
        .collect();

    let step = if values.len() > 1 {
        WINDOW_HOURS / (values.len() - 1) as f64
    } else {
        0.0
    };
    let points = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (-WINDOW_HOURS + i as f64 * step, v))
        .collect();

    let captured_at = Local
        .timestamp_opt(ts as i64, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string());

    ChartState {
        points,
        captured_at,
        unit: if convert { "mbar" } else { "raw" },
    }
}

fn draw(frame: &mut Frame, state: &Option<ChartState>) {
    let Some(state) = state else {
        let block = Block::bordered().title("Atmospheric Pressure — waiting for broadcast (q quits)");
        frame.render_widget(block, frame.area());
        return;
    };

    let (mut min, mut max) = (f64::MAX, f64::MIN);
    for &(_, v) in &state.points {
        min = min.min(v);
        max = max.max(v);
    }
    let pad = ((max - min) * 0.1).max(0.5);
    let (lo, hi) = (min - pad, max + pad);

    let datasets = vec![Dataset::default()
        .name("pressure")
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&state.points)];

    let title = format!(
        "Atmospheric Pressure ({}) — {} (q quits)",
        state.unit, state.captured_at
    );
    let chart = Chart::new(datasets)
        .block(Block::bordered().title(title))
        .x_axis(
            Axis::default()
                .title("hours")
                .bounds([-WINDOW_HOURS, 0.0])
                .labels(["-72", "-60", "-48", "-36", "-24", "-12", "0"]),
        )
        .y_axis(
            Axis::default()
                .title(state.unit)
                .bounds([lo, hi])
                .labels([
                    format!("{lo:.1}"),
                    format!("{:.1}", (lo + hi) / 2.0),
                    format!("{hi:.1}"),
                ]),
        );

    frame.render_widget(chart, frame.area());
}
