use crate::job::{Complex, Task, TaskResult};

/// Turns one task into `width * height * 3` RGB bytes, row by row.
pub trait PixelGenerator: Send + Sync + 'static {
    fn render(&self, task: &Task) -> Vec<u8>;

    fn compute(&self, task: &Task) -> TaskResult {
        TaskResult {
            image: task.image,
            pixels: self.render(task),
        }
    }
}

/// Escape-time renderer for `z = z² + c`, coloured with a smoothed
/// Bernstein polynomial palette. Points that never escape stay black.
#[derive(Debug, Clone, Copy, Default)]
pub struct JuliaSetGenerator;

impl JuliaSetGenerator {
    pub fn new() -> Self {
        Self
    }

    fn pixel(&self, task: &Task, x: u32, y: u32) -> [u8; 3] {
        let fractal = &task.fractal;
        let span = fractal.top_right - fractal.bottom_left;
        let mut z = fractal.bottom_left
            + Complex::new(
                span.real / f64::from(task.image.width) * f64::from(x),
                span.imaginary / f64::from(task.image.height) * f64::from(y),
            );
        let escape = fractal.escape_radius * fractal.escape_radius;
        let max = f64::from(fractal.max_iterations);

        for i in 0..fractal.max_iterations {
            z = z.square() + fractal.offset;
            let norm_sqr = z.norm_sqr();
            if norm_sqr >= escape {
                let smoothing = if fractal.max_iterations > 1 {
                    norm_sqr.ln().ln() / max.ln()
                } else {
                    0.0
                };
                let t = ((f64::from(i) + 1.0 - smoothing) / max).clamp(0.0, 1.0);
                return palette(t);
            }
        }
        [0, 0, 0]
    }
}

fn palette(t: f64) -> [u8; 3] {
    let s = 1.0 - t;
    [
        channel(9.0 * s * t.powi(3)),
        channel(15.0 * s.powi(2) * t.powi(2)),
        channel(8.5 * s.powi(3) * t),
    ]
}

fn channel(intensity: f64) -> u8 {
    (intensity * 255.0).clamp(0.0, 255.0) as u8
}

impl PixelGenerator for JuliaSetGenerator {
    fn render(&self, task: &Task) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(task.image.pixel_count() * 3);
        for y in 0..task.image.height {
            for x in 0..task.image.width {
                pixels.extend_from_slice(&self.pixel(task, x, y));
            }
        }
        pixels
    }
}
