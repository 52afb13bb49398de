use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::proto;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Complex {
    pub real: f64,
    pub imaginary: f64,
}

impl Complex {
    pub fn new(real: f64, imaginary: f64) -> Self {
        Self { real, imaginary }
    }

    /// Squared modulus, cheaper than `norm` for escape checks.
    pub fn norm_sqr(&self) -> f64 {
        self.real * self.real + self.imaginary * self.imaginary
    }

    pub fn norm(&self) -> f64 {
        self.norm_sqr().sqrt()
    }

    pub fn square(&self) -> Self {
        Self {
            real: self.real * self.real - self.imaginary * self.imaginary,
            imaginary: 2.0 * self.real * self.imaginary,
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            real: self.real * factor,
            imaginary: self.imaginary * factor,
        }
    }
}

impl Add for Complex {
    type Output = Complex;

    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.real + rhs.real, self.imaginary + rhs.imaginary)
    }
}

impl Sub for Complex {
    type Output = Complex;

    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.real - rhs.real, self.imaginary - rhs.imaginary)
    }
}

impl From<Complex> for proto::ComplexNumber {
    fn from(c: Complex) -> Self {
        proto::ComplexNumber {
            real: c.real,
            imaginary: c.imaginary,
        }
    }
}

impl From<&proto::ComplexNumber> for Complex {
    fn from(c: &proto::ComplexNumber) -> Self {
        Complex::new(c.real, c.imaginary)
    }
}

/// Frame dimensions plus the frame id used to order the final animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageProperties {
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

impl ImageProperties {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FractalParameters {
    pub offset: Complex,
    pub bottom_left: Complex,
    pub top_right: Complex,
    pub escape_radius: f64,
    pub max_iterations: u32,
}

/// One frame of the animation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub image: ImageProperties,
    pub fractal: FractalParameters,
}

impl Task {
    pub fn id(&self) -> u32 {
        self.image.id
    }
}

/// RGB pixels of one rendered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub image: ImageProperties,
    pub pixels: Vec<u8>,
}

impl TaskResult {
    pub fn id(&self) -> u32 {
        self.image.id
    }

    /// One RGB triple per pixel of the declared frame.
    pub fn is_well_formed(&self) -> bool {
        self.pixels.len() == self.image.pixel_count() * 3
    }
}

impl From<&ImageProperties> for proto::ImageProperties {
    fn from(image: &ImageProperties) -> Self {
        proto::ImageProperties {
            id: image.id,
            width: image.width,
            height: image.height,
        }
    }
}

impl From<&proto::ImageProperties> for ImageProperties {
    fn from(image: &proto::ImageProperties) -> Self {
        ImageProperties {
            id: image.id,
            width: image.width,
            height: image.height,
        }
    }
}

impl From<&Task> for proto::CalculationRequest {
    fn from(task: &Task) -> Self {
        let fractal = &task.fractal;
        proto::CalculationRequest {
            image_properties: Some(proto::ImageProperties::from(&task.image)),
            julia_set_properties: Some(proto::JuliaSetProperties {
                offset: Some(fractal.offset.into()),
                bottom_left_corner: Some(fractal.bottom_left.into()),
                top_right_corner: Some(fractal.top_right.into()),
                escape_radius: fractal.escape_radius,
                max_iterations: fractal.max_iterations,
            }),
        }
    }
}

impl TryFrom<&proto::CalculationRequest> for Task {
    type Error = ClusterError;

    fn try_from(request: &proto::CalculationRequest) -> Result<Self> {
        let image = request
            .image_properties
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidMessage("missing image properties".into()))?;
        let julia = request
            .julia_set_properties
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidMessage("missing julia set properties".into()))?;
        let complex = |c: &Option<proto::ComplexNumber>, name: &str| {
            c.as_ref()
                .map(Complex::from)
                .ok_or_else(|| ClusterError::InvalidMessage(format!("missing {}", name)))
        };

        Ok(Task {
            image: ImageProperties::from(image),
            fractal: FractalParameters {
                offset: complex(&julia.offset, "offset")?,
                bottom_left: complex(&julia.bottom_left_corner, "bottom left corner")?,
                top_right: complex(&julia.top_right_corner, "top right corner")?,
                escape_radius: julia.escape_radius,
                max_iterations: julia.max_iterations,
            },
        })
    }
}

impl From<&TaskResult> for proto::CalculationResult {
    fn from(result: &TaskResult) -> Self {
        proto::CalculationResult {
            image_properties: Some(proto::ImageProperties::from(&result.image)),
            pixels: result.pixels.clone(),
        }
    }
}

impl TryFrom<&proto::CalculationResult> for TaskResult {
    type Error = ClusterError;

    fn try_from(result: &proto::CalculationResult) -> Result<Self> {
        let image = result
            .image_properties
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidMessage("missing image properties".into()))?;
        Ok(TaskResult {
            image: ImageProperties::from(image),
            pixels: result.pixels.clone(),
        })
    }
}

/// Decode a list of wire tasks, failing on the first malformed one.
pub fn tasks_from_proto(requests: &[proto::CalculationRequest]) -> Result<Vec<Task>> {
    requests.iter().map(Task::try_from).collect()
}

pub fn results_from_proto(results: &[proto::CalculationResult]) -> Result<Vec<TaskResult>> {
    results.iter().map(TaskResult::try_from).collect()
}
