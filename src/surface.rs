// Surface Module - 2D drawing-surface contract and the software raster behind the TUI
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::types::{Rgba, Subscription};

/// How new paint combines with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Paint over the destination, weighted by alpha.
    SourceOver,
    /// Lighten: overlapping paint brightens and never darkens.
    Screen,
}

/// The 2D context the projector draws through.
///
/// Dimensions are in device pixels. A surface with no area is not ready and
/// drawing on it is skipped.
pub trait DrawingSurface {
    fn width(&self) -> f64;
    fn height(&self) -> f64;

    fn is_ready(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    fn set_global_alpha(&mut self, alpha: f64);
    fn set_composite_mode(&mut self, mode: CompositeMode);
    fn set_fill_color(&mut self, color: Rgba);
    fn set_stroke_color(&mut self, color: Rgba);
    fn set_line_width(&mut self, width: f64);

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64);

    fn begin_path(&mut self);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    fn stroke(&mut self);
}

type ResizeCallback = Box<dyn FnMut(f64, f64) + Send>;

#[derive(Default)]
struct ResizeListeners {
    next_id: u64,
    listeners: Vec<(u64, ResizeCallback)>,
}

/// Fan-out of surface size changes. Each subscription is cancelled on its own.
///
/// Callbacks run while the listener list is locked and must not subscribe.
#[derive(Clone, Default)]
pub struct ResizeNotifier {
    inner: Arc<Mutex<ResizeListeners>>,
}

impl ResizeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(f64, f64) + Send + 'static,
    {
        let id = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Box::new(callback)));
            id
        };

        let weak: Weak<Mutex<ResizeListeners>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.listeners.retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    pub fn notify(&self, width: f64, height: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, callback) in inner.listeners.iter_mut() {
            callback(width, height);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).listeners.len()
    }
}

/// Software RGB raster implementing `DrawingSurface`.
///
/// Each raster pixel covers `scale` device pixels per side, so a small
/// terminal grid can stand in for a full-size canvas.
pub struct PixelSurface {
    pixel_width: usize,
    pixel_height: usize,
    scale: f64,
    frame_buffer: Vec<(f32, f32, f32)>,
    global_alpha: f32,
    mode: CompositeMode,
    fill: Rgba,
    stroke: Rgba,
    line_width: f64,
    path: Vec<((f64, f64), (f64, f64))>,
    cursor: Option<(f64, f64)>,
    resize: ResizeNotifier,
}

impl PixelSurface {
    pub fn new(pixel_width: usize, pixel_height: usize, scale: f64) -> Self {
        PixelSurface {
            pixel_width,
            pixel_height,
            scale: if scale.is_finite() && scale > 0.0 { scale } else { 1.0 },
            frame_buffer: vec![(0.0, 0.0, 0.0); pixel_width * pixel_height],
            global_alpha: 1.0,
            mode: CompositeMode::SourceOver,
            fill: Rgba::new(0.0, 0.0, 0.0, 1.0),
            stroke: Rgba::new(1.0, 1.0, 1.0, 1.0),
            line_width: 1.0,
            path: Vec::new(),
            cursor: None,
            resize: ResizeNotifier::new(),
        }
    }

    pub fn pixel_width(&self) -> usize {
        self.pixel_width
    }

    pub fn pixel_height(&self) -> usize {
        self.pixel_height
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Resize the raster. Contents are cleared and resize listeners notified.
    pub fn resize(&mut self, pixel_width: usize, pixel_height: usize) {
        if pixel_width == self.pixel_width && pixel_height == self.pixel_height {
            return;
        }
        self.pixel_width = pixel_width;
        self.pixel_height = pixel_height;
        self.frame_buffer = vec![(0.0, 0.0, 0.0); pixel_width * pixel_height];
        self.resize.notify(self.width(), self.height());
    }

    pub fn set_scale(&mut self, scale: f64) {
        if scale.is_finite() && scale > 0.0 && scale != self.scale {
            self.scale = scale;
            self.resize.notify(self.width(), self.height());
        }
    }

    pub fn on_resize<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(f64, f64) + Send + 'static,
    {
        self.resize.subscribe(callback)
    }

    pub fn resize_notifier(&self) -> &ResizeNotifier {
        &self.resize
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<(f32, f32, f32)> {
        if x >= self.pixel_width || y >= self.pixel_height {
            return None;
        }
        Some(self.frame_buffer[y * self.pixel_width + x])
    }

    pub fn clear(&mut self) {
        for pixel in &mut self.frame_buffer {
            *pixel = (0.0, 0.0, 0.0);
        }
    }

    /// Mean channel intensity over the whole raster.
    pub fn mean_brightness(&self) -> f32 {
        if self.frame_buffer.is_empty() {
            return 0.0;
        }
        let total: f32 = self.frame_buffer.iter().map(|&(r, g, b)| (r + g + b) / 3.0).sum();
        total / self.frame_buffer.len() as f32
    }

    fn composite(&mut self, index: usize, color: Rgba) {
        let alpha = (color.a * self.global_alpha).clamp(0.0, 1.0);
        let (dr, dg, db) = self.frame_buffer[index];
        let blend = |dst: f32, src: f32| -> f32 {
            let out = match self.mode {
                CompositeMode::SourceOver => src * alpha + dst * (1.0 - alpha),
                CompositeMode::Screen => dst + alpha * src * (1.0 - dst),
            };
            out.clamp(0.0, 1.0)
        };
        self.frame_buffer[index] = (blend(dr, color.r), blend(dg, color.g), blend(db, color.b));
    }

    fn to_pixels(&self, x: f64, y: f64) -> (f64, f64) {
        (x / self.scale, y / self.scale)
    }

    /// Clip a segment to the raster bounds (Liang-Barsky). `None` if fully outside.
    fn clip(&self, p0: (f64, f64), p1: (f64, f64)) -> Option<((f64, f64), (f64, f64))> {
        let max_x = self.pixel_width as f64 - 1.0;
        let max_y = self.pixel_height as f64 - 1.0;
        let (dx, dy) = (p1.0 - p0.0, p1.1 - p0.1);
        let mut t0 = 0.0_f64;
        let mut t1 = 1.0_f64;
        for (p, q) in [(-dx, p0.0), (dx, max_x - p0.0), (-dy, p0.1), (dy, max_y - p0.1)] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
            } else {
                let r = q / p;
                if p < 0.0 {
                    if r > t1 {
                        return None;
                    }
                    t0 = t0.max(r);
                } else {
                    if r < t0 {
                        return None;
                    }
                    t1 = t1.min(r);
                }
            }
        }
        Some((
            (p0.0 + t0 * dx, p0.1 + t0 * dy),
            (p0.0 + t1 * dx, p0.1 + t1 * dy),
        ))
    }

    // Bresenham's line algorithm, marking covered pixels
    fn rasterize_segment(&self, p0: (f64, f64), p1: (f64, f64), brush: i64, coverage: &mut [bool]) {
        let Some((a, b)) = self.clip(p0, p1) else {
            return;
        };
        let (mut x, mut y) = (a.0.round() as i64, a.1.round() as i64);
        let (x1, y1) = (b.0.round() as i64, b.1.round() as i64);

        let dx = (x1 - x).abs();
        let dy = (y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx - dy;

        let (w, h) = (self.pixel_width as i64, self.pixel_height as i64);
        let lo = -(brush - 1) / 2;
        let hi = brush / 2;

        loop {
            for oy in lo..=hi {
                for ox in lo..=hi {
                    let (px, py) = (x + ox, y + oy);
                    if px >= 0 && px < w && py >= 0 && py < h {
                        coverage[(py * w + px) as usize] = true;
                    }
                }
            }

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
    }
}

impl DrawingSurface for PixelSurface {
    fn width(&self) -> f64 {
        self.pixel_width as f64 * self.scale
    }

    fn height(&self) -> f64 {
        self.pixel_height as f64 * self.scale
    }

    fn set_global_alpha(&mut self, alpha: f64) {
        self.global_alpha = alpha.clamp(0.0, 1.0) as f32;
    }

    fn set_composite_mode(&mut self, mode: CompositeMode) {
        self.mode = mode;
    }

    fn set_fill_color(&mut self, color: Rgba) {
        self.fill = color;
    }

    fn set_stroke_color(&mut self, color: Rgba) {
        self.stroke = color;
    }

    fn set_line_width(&mut self, width: f64) {
        if width.is_finite() && width > 0.0 {
            self.line_width = width;
        }
    }

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return;
        }
        let (x0, y0) = self.to_pixels(x, y);
        let (x1, y1) = self.to_pixels(x + width, y + height);
        let clamp_x = |v: f64| v.floor().clamp(0.0, self.pixel_width as f64) as usize;
        let clamp_y = |v: f64| v.floor().clamp(0.0, self.pixel_height as f64) as usize;
        let (left, right) = (clamp_x(x0.min(x1)), clamp_x(x0.max(x1).ceil()));
        let (top, bottom) = (clamp_y(y0.min(y1)), clamp_y(y0.max(y1).ceil()));

        let fill = self.fill;
        for py in top..bottom {
            for px in left..right {
                let index = py * self.pixel_width + px;
                self.composite(index, fill);
            }
        }
    }

    fn begin_path(&mut self) {
        self.path.clear();
        self.cursor = None;
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.cursor = Some((x, y));
    }

    fn line_to(&mut self, x: f64, y: f64) {
        // with no current point, a line only starts a new subpath
        if let Some(from) = self.cursor {
            self.path.push((from, (x, y)));
        }
        self.cursor = Some((x, y));
    }

    fn stroke(&mut self) {
        if self.frame_buffer.is_empty() {
            return;
        }
        let brush = (self.line_width / self.scale).round().max(1.0) as i64;

        // composite each covered pixel once per stroke, like a canvas path
        let mut coverage = vec![false; self.frame_buffer.len()];
        for &(from, to) in &self.path {
            if !(from.0.is_finite() && from.1.is_finite() && to.0.is_finite() && to.1.is_finite()) {
                continue;
            }
            let p0 = self.to_pixels(from.0, from.1);
            let p1 = self.to_pixels(to.0, to.1);
            self.rasterize_segment(p0, p1, brush, &mut coverage);
        }

        let stroke = self.stroke;
        for index in 0..coverage.len() {
            if coverage[index] {
                self.composite(index, stroke);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn white(a: f32) -> Rgba {
        Rgba::new(1.0, 1.0, 1.0, a)
    }

    #[test]
    fn test_zero_size_surface_is_not_ready() {
        let surface = PixelSurface::new(0, 10, 1.0);
        assert!(!surface.is_ready());
        let surface = PixelSurface::new(4, 4, 2.0);
        assert!(surface.is_ready());
        assert_eq!(surface.width(), 8.0);
        assert_eq!(surface.height(), 8.0);
    }

    #[test]
    fn test_horizontal_line_coverage() {
        let mut surface = PixelSurface::new(10, 5, 1.0);
        surface.set_stroke_color(white(1.0));
        surface.begin_path();
        surface.move_to(1.0, 2.0);
        surface.line_to(8.0, 2.0);
        surface.stroke();

        for x in 1..=8 {
            assert_eq!(surface.pixel(x, 2), Some((1.0, 1.0, 1.0)));
        }
        assert_eq!(surface.pixel(0, 2), Some((0.0, 0.0, 0.0)));
        assert_eq!(surface.pixel(4, 1), Some((0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_offscreen_segment_is_clipped() {
        let mut surface = PixelSurface::new(10, 10, 1.0);
        surface.set_stroke_color(white(1.0));
        surface.begin_path();
        surface.move_to(-1.0e9, 5.0);
        surface.line_to(1.0e9, 5.0);
        surface.move_to(50.0, 50.0);
        surface.line_to(60.0, 60.0);
        surface.stroke();

        for x in 0..10 {
            assert_eq!(surface.pixel(x, 5), Some((1.0, 1.0, 1.0)));
        }
        assert_eq!(surface.pixel(5, 6), Some((0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_screen_brightens_and_source_over_fades() {
        let mut surface = PixelSurface::new(2, 1, 1.0);
        surface.set_composite_mode(CompositeMode::Screen);
        surface.set_stroke_color(white(0.5));
        surface.begin_path();
        surface.move_to(0.0, 0.0);
        surface.line_to(0.0, 0.0);
        surface.stroke();
        let first = surface.pixel(0, 0).unwrap().0;
        assert!((first - 0.5).abs() < 1e-6);

        surface.stroke();
        let second = surface.pixel(0, 0).unwrap().0;
        assert!(second > first);

        surface.set_composite_mode(CompositeMode::SourceOver);
        surface.set_fill_color(Rgba::new(0.0, 0.0, 0.0, 0.1));
        surface.fill_rect(0.0, 0.0, surface.width(), surface.height());
        let faded = surface.pixel(0, 0).unwrap().0;
        assert!((faded - second * 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_global_alpha_scales_paint() {
        let mut surface = PixelSurface::new(1, 1, 1.0);
        surface.set_global_alpha(0.5);
        surface.set_fill_color(white(1.0));
        surface.fill_rect(0.0, 0.0, 1.0, 1.0);
        assert!((surface.pixel(0, 0).unwrap().0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_scale_maps_device_pixels() {
        let mut surface = PixelSurface::new(10, 10, 4.0);
        surface.set_stroke_color(white(1.0));
        surface.begin_path();
        surface.move_to(0.0, 20.0);
        surface.line_to(39.0, 20.0);
        surface.stroke();
        assert_eq!(surface.pixel(9, 5), Some((1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_resize_notifies_until_unsubscribed() {
        let mut surface = PixelSurface::new(4, 4, 2.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut sub = surface.on_resize(move |w, h| {
            assert_eq!((w, h), (16.0, 12.0));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(surface.resize_notifier().listener_count(), 1);

        surface.resize(8, 6);
        surface.resize(8, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(surface.resize_notifier().listener_count(), 0);
        surface.resize(4, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
