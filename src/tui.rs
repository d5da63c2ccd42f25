// TUI Module - Terminal presentation of the raster surface and frame status
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Widget};
use ratatui::Frame;

use crate::animation::{AnimationPhase, FrameReport};
use crate::surface::PixelSurface;

/// Upper half block: foreground paints the top pixel, background the bottom.
const HALF_BLOCK: char = '▀';

/// Terminal rows per raster row pair.
pub const PIXELS_PER_ROW: u16 = 2;

/// Draws a `PixelSurface` with two raster rows per terminal row, dimmed by
/// `opacity`.
pub struct SurfaceView<'a> {
    surface: &'a PixelSurface,
    opacity: f64,
}

impl<'a> SurfaceView<'a> {
    pub fn new(surface: &'a PixelSurface, opacity: f64) -> Self {
        SurfaceView { surface, opacity: opacity.clamp(0.0, 1.0) }
    }

    fn color(&self, pixel: Option<(f32, f32, f32)>) -> Color {
        let (r, g, b) = pixel.unwrap_or((0.0, 0.0, 0.0));
        let scale = |c: f32| (c.clamp(0.0, 1.0) as f64 * self.opacity * 255.0).round() as u8;
        Color::Rgb(scale(r), scale(g), scale(b))
    }
}

impl Widget for SurfaceView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for row in 0..area.height {
            for col in 0..area.width {
                let x = col as usize;
                let y = row as usize * PIXELS_PER_ROW as usize;
                let top = self.color(self.surface.pixel(x, y));
                let bottom = self.color(self.surface.pixel(x, y + 1));
                buf.get_mut(area.x + col, area.y + row)
                    .set_char(HALF_BLOCK)
                    .set_fg(top)
                    .set_bg(bottom);
            }
        }
    }
}

/// Static facts about the running host, shown in the header.
#[derive(Debug, Clone, Default)]
pub struct HostStatus {
    pub music_source: String,
    pub clock: Option<String>,
    pub dimensions: usize,
    pub target_fps: f64,
}

/// Header, view and footer areas.
pub fn layout(area: Rect) -> (Rect, Rect, Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
        .split(area);
    (chunks[0], chunks[1], chunks[2])
}

fn view_block() -> Block<'static> {
    Block::default().borders(Borders::ALL)
}

/// Raster size (pixels) that fills the view area of a terminal of `area`.
pub fn raster_size(area: Rect) -> (usize, usize) {
    let (_, view, _) = layout(area);
    let inner = view_block().inner(view);
    (inner.width as usize, inner.height as usize * PIXELS_PER_ROW as usize)
}

fn phase_style(phase: AnimationPhase) -> Style {
    match phase {
        AnimationPhase::Idle => Style::default().fg(Color::DarkGray),
        AnimationPhase::FadingIn => Style::default().fg(Color::Yellow),
        AnimationPhase::Steady => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
    }
}

pub fn draw(f: &mut Frame, surface: &PixelSurface, report: &FrameReport, status: &HostStatus) {
    let (header_area, view_area, footer_area) = layout(f.size());

    let clock = status.clock.as_deref().unwrap_or("off");
    let header_text = format!(
        "rustseract | {}D hypercube | music: {} | MIDI clock: {}",
        status.dimensions, status.music_source, clock
    );
    let header = Paragraph::new(header_text).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, header_area);

    let block = view_block();
    let inner = block.inner(view_area);
    f.render_widget(block, view_area);
    f.render_widget(SurfaceView::new(surface, report.opacity), inner);

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(format!(" {} ", report.phase.name()), phase_style(report.phase)),
        Span::raw(format!(
            "| opacity {:.2} | fov {:.5} | {:.1} bpm | {:.0} fps | frame {} | q to quit",
            report.opacity, report.field_of_view, report.bpm, status.target_fps, report.frame
        )),
    ]))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, footer_area);
}
