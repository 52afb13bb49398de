use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::WorkStation;
use crate::job::{Complex, FractalParameters, ImageProperties, Task};
use crate::render::GifSettings;

const MAX_WIDTH: u32 = 7680;
const MAX_HEIGHT: u32 = 4320;
const MAX_FRAMES: u32 = 900;
const MAX_DURATION: Duration = Duration::from_secs(30);
const MAX_ITERATIONS: u32 = 10_000;
const GIF_EXTENSION: &str = ".gif";
const PORT_RANGE: std::ops::RangeInclusive<i64> = 1000..=65535;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

fn invalid(message: impl Into<String>) -> Result<(), ValidationError> {
    Err(ValidationError(message.into()))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComplexDto {
    pub real: f64,
    pub imaginary: f64,
}

impl From<ComplexDto> for Complex {
    fn from(c: ComplexDto) -> Self {
        Complex::new(c.real, c.imaginary)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePropertiesDto {
    pub width: u32,
    pub height: u32,
}

impl ImagePropertiesDto {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.width == 0 || self.height == 0 {
            return invalid(format!(
                "Width and height must be positive, but were {} and {}",
                self.width, self.height
            ));
        }
        if self.width > MAX_WIDTH {
            return invalid(format!("Width ({}) is higher than {}", self.width, MAX_WIDTH));
        }
        if self.height > MAX_HEIGHT {
            return invalid(format!("Height ({}) is higher than {}", self.height, MAX_HEIGHT));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GifPropertiesDto {
    pub number_of_frames: u32,
    pub duration_ms: u64,
    pub filename: String,
}

impl GifPropertiesDto {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=MAX_FRAMES).contains(&self.number_of_frames) {
            return invalid(format!(
                "Number of frames must be in 1..={}, but was {}",
                MAX_FRAMES, self.number_of_frames
            ));
        }
        if Duration::from_millis(self.duration_ms) > MAX_DURATION {
            return invalid(format!(
                "Duration must be at most {:?}, but was {}ms",
                MAX_DURATION, self.duration_ms
            ));
        }
        if self.filename.trim().is_empty() {
            return invalid("Filename must not be blank");
        }
        if !self.filename.ends_with(GIF_EXTENSION) {
            return invalid(format!("Filename must end with {}", GIF_EXTENSION));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JuliaSetPropertiesDto {
    pub escape_radius: f64,
    pub starting_offset: ComplexDto,
    pub ending_offset: ComplexDto,
    pub bottom_left_corner: ComplexDto,
    pub top_right_corner: ComplexDto,
    pub starting_number_of_iterations: u32,
    pub ending_number_of_iterations: u32,
}

impl JuliaSetPropertiesDto {
    fn validate(&self) -> Result<(), ValidationError> {
        for (name, iterations) in [
            ("Starting", self.starting_number_of_iterations),
            ("Ending", self.ending_number_of_iterations),
        ] {
            if !(1..=MAX_ITERATIONS).contains(&iterations) {
                return invalid(format!(
                    "{} number of iterations must be in 1..={}, but was {}",
                    name, MAX_ITERATIONS, iterations
                ));
            }
        }

        // A point is only guaranteed to escape once |z| > R with R² - R >= |c|
        let r = self.escape_radius;
        for (name, offset) in [("starting", self.starting_offset), ("ending", self.ending_offset)] {
            if r * r - r < Complex::from(offset).norm() {
                return invalid(format!(
                    "Escape radius must satisfy R² - R >= |offset| for the {} offset",
                    name
                ));
            }
        }

        let (bl, tr) = (self.bottom_left_corner, self.top_right_corner);
        if bl.real >= tr.real {
            return invalid(format!(
                "Bottom left real part ({}) must be lower than top right real part ({})",
                bl.real, tr.real
            ));
        }
        if bl.imaginary >= tr.imaginary {
            return invalid(format!(
                "Bottom left imaginary part ({}) must be lower than top right imaginary part ({})",
                bl.imaginary, tr.imaginary
            ));
        }
        Ok(())
    }
}

/// Body of `POST /new-job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageDto {
    pub image_properties: ImagePropertiesDto,
    pub gif_properties: GifPropertiesDto,
    pub julia_set_properties: JuliaSetPropertiesDto,
}

impl GenerateImageDto {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.image_properties.validate()?;
        self.gif_properties.validate()?;
        self.julia_set_properties.validate()
    }

    /// One task per frame; offset and iteration cap move in equal steps from
    /// their starting towards their ending values.
    pub fn to_tasks(&self) -> Vec<Task> {
        let julia = &self.julia_set_properties;
        let frames = self.gif_properties.number_of_frames;
        let start = Complex::from(julia.starting_offset);
        let offset_step = (Complex::from(julia.ending_offset) - start).scale(1.0 / f64::from(frames));
        let iteration_step = (i64::from(julia.ending_number_of_iterations)
            - i64::from(julia.starting_number_of_iterations))
            / i64::from(frames);

        (0..frames)
            .map(|frame| Task {
                image: ImageProperties {
                    id: frame,
                    width: self.image_properties.width,
                    height: self.image_properties.height,
                },
                fractal: FractalParameters {
                    offset: start + offset_step.scale(f64::from(frame)),
                    bottom_left: julia.bottom_left_corner.into(),
                    top_right: julia.top_right_corner.into(),
                    escape_radius: julia.escape_radius,
                    max_iterations: (i64::from(julia.starting_number_of_iterations)
                        + iteration_step * i64::from(frame)) as u32,
                },
            })
            .collect()
    }

    pub fn gif_settings(&self) -> GifSettings {
        let gif = &self.gif_properties;
        GifSettings {
            filename: PathBuf::from(&gif.filename),
            width: self.image_properties.width,
            height: self.image_properties.height,
            frame_delay: Duration::from_millis(gif.duration_ms) / gif.number_of_frames.max(1),
        }
    }
}

/// One element of the `POST /join` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteWorkStationDto {
    pub ip: String,
    pub port: i64,
}

impl RemoteWorkStationDto {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let parts: Vec<&str> = self.ip.split('.').collect();
        let valid_ip = parts.len() == 4
            && parts.iter().all(|part| {
                !part.is_empty()
                    && part.chars().all(|c| c.is_ascii_digit())
                    && part.parse::<u16>().map_or(false, |n| n <= 255)
            });
        if !valid_ip {
            return invalid(format!("Invalid IP address: {}", self.ip));
        }
        if !PORT_RANGE.contains(&self.port) {
            return invalid(format!(
                "Port ({}) is not in valid port range {:?}",
                self.port, PORT_RANGE
            ));
        }
        Ok(())
    }

    /// Only valid after [`RemoteWorkStationDto::validate`] succeeded.
    pub fn to_workstation(&self) -> WorkStation {
        WorkStation::new(self.ip.clone(), self.port as u16)
    }
}

/// Body of `POST /delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayDto {
    pub delay_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto() -> GenerateImageDto {
        serde_json::from_value(serde_json::json!({
            "imageProperties": {"width": 40, "height": 30},
            "gifProperties": {"numberOfFrames": 4, "durationMs": 2000, "filename": "out.gif"},
            "juliaSetProperties": {
                "escapeRadius": 2.0,
                "startingOffset": {"real": -0.8, "imaginary": 0.0},
                "endingOffset": {"real": 0.0, "imaginary": 0.8},
                "bottomLeftCorner": {"real": -1.5, "imaginary": -1.0},
                "topRightCorner": {"real": 1.5, "imaginary": 1.0},
                "startingNumberOfIterations": 10,
                "endingNumberOfIterations": 50
            }
        }))
        .unwrap()
    }

    #[test]
    fn valid_request_passes() {
        assert_eq!(dto().validate(), Ok(()));
    }

    #[test]
    fn tasks_interpolate_offset_and_iterations() {
        let tasks = dto().to_tasks();
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].fractal.offset, Complex::new(-0.8, 0.0));
        assert_eq!(tasks[0].fractal.max_iterations, 10);
        assert_eq!(tasks[3].fractal.max_iterations, 40);
        assert!((tasks[2].fractal.offset.real - -0.4).abs() < 1e-9);
        assert!((tasks[2].fractal.offset.imaginary - 0.4).abs() < 1e-9);
        let ids: Vec<u32> = tasks.iter().map(Task::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn frame_delay_splits_duration() {
        assert_eq!(dto().gif_settings().frame_delay, Duration::from_millis(500));
    }

    #[test]
    fn rejects_small_escape_radius() {
        let mut request = dto();
        request.julia_set_properties.escape_radius = 1.2;
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_inverted_corners() {
        let mut request = dto();
        request.julia_set_properties.bottom_left_corner.imaginary = 2.0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_bad_filename_and_frames() {
        let mut request = dto();
        request.gif_properties.filename = "out.png".into();
        assert!(request.validate().is_err());

        let mut request = dto();
        request.gif_properties.number_of_frames = 901;
        assert!(request.validate().is_err());
    }

    #[test]
    fn remote_workstation_validation() {
        let ok = RemoteWorkStationDto {
            ip: "192.168.0.10".into(),
            port: 5001,
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.to_workstation(), WorkStation::new("192.168.0.10", 5001));

        for (ip, port) in [("256.0.0.1", 5001), ("10.0.0", 5001), ("a.b.c.d", 5001), ("10.0.0.1", 999)] {
            let dto = RemoteWorkStationDto {
                ip: ip.into(),
                port,
            };
            assert!(dto.validate().is_err(), "{}:{} should be rejected", ip, port);
        }
    }
}
