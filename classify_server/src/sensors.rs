//! Sensors module.
//!
use std::{fmt, path::Path};

use image::RgbImage;

use crate::{error::ClassifyError, utils};

/// Identifier of a video input device.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geometry of the canvas camera frames are drawn into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Side length of the square canvas.
    pub size: u32,
    /// Flip frames horizontally, as a front camera preview.
    pub mirror: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            size: 400,
            mirror: true,
        }
    }
}

pub trait CameraBackend: Send + Sync {
    /// List the available video inputs.
    fn list_devices(&self) -> Result<Vec<DeviceId>, ClassifyError>;

    /// Open a stream on the device.
    fn open(
        &self,
        device: &DeviceId,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CameraStream>, ClassifyError>;
}

/// An open camera stream.
pub trait CameraStream: Send {
    /// Block until the next frame and return it drawn into the canvas.
    fn capture(&mut self) -> Result<RgbImage, ClassifyError>;

    /// Release the stream and the device.
    fn stop(&mut self);
}

/// Draw a camera frame into the square canvas.
pub fn frame_to_canvas(frame: &RgbImage, config: &CaptureConfig) -> RgbImage {
    let mut canvas = utils::center_square(frame);
    if canvas.width() != config.size {
        canvas = image::imageops::resize(
            &canvas,
            config.size,
            config.size,
            image::imageops::FilterType::Triangle,
        );
    }
    if config.mirror {
        image::imageops::flip_horizontal_in_place(&mut canvas);
    }

    canvas
}

/// Backend of a build without camera support. It never finds a camera.
pub struct NoCameraBackend;

impl CameraBackend for NoCameraBackend {
    fn list_devices(&self) -> Result<Vec<DeviceId>, ClassifyError> {
        Ok(Vec::new())
    }

    fn open(
        &self,
        device: &DeviceId,
        _config: &CaptureConfig,
    ) -> Result<Box<dyn CameraStream>, ClassifyError> {
        Err(ClassifyError::CameraAccess(format!(
            "cannot open {device}, built without camera support"
        )))
    }
}

/// Camera backend of this build.
#[cfg(feature = "v4l")]
pub fn default_backend(device_dir: &Path) -> Box<dyn CameraBackend> {
    Box::new(v4l::V4lBackend::new(device_dir))
}

/// Camera backend of this build.
#[cfg(not(feature = "v4l"))]
pub fn default_backend(device_dir: &Path) -> Box<dyn CameraBackend> {
    log::warn!(
        "Built without the `v4l` feature, ignoring cameras in {}",
        device_dir.display()
    );
    Box::new(NoCameraBackend)
}

#[cfg(feature = "v4l")]
pub mod v4l {
    //! V4L2 cameras on a Linux machine.
    //!
    use std::{
        io,
        path::{Path, PathBuf},
    };

    use image::RgbImage;
    use rscam::{Camera, Config};
    use simple_error::simple_error;

    use super::{frame_to_canvas, CameraBackend, CameraStream, CaptureConfig, DeviceId};
    use crate::error::ClassifyError;

    type Error = Box<dyn std::error::Error>;

    const FORMAT: &[u8] = b"MJPG";

    pub struct V4lBackend {
        device_dir: PathBuf,
    }

    impl V4lBackend {
        pub fn new(device_dir: &Path) -> Self {
            Self {
                device_dir: device_dir.to_owned(),
            }
        }
    }

    impl CameraBackend for V4lBackend {
        fn list_devices(&self) -> Result<Vec<DeviceId>, ClassifyError> {
            let entries = std::fs::read_dir(&self.device_dir).map_err(|err| match err.kind() {
                io::ErrorKind::PermissionDenied => {
                    ClassifyError::Permission(format!("{}: {err}", self.device_dir.display()))
                }
                _ => ClassifyError::CameraAccess(format!("{}: {err}", self.device_dir.display())),
            })?;

            let mut candidates: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_name().to_string_lossy().starts_with("video"))
                .map(|entry| entry.path().to_string_lossy().into_owned())
                .collect();
            candidates.sort();

            let mut devices = Vec::new();
            let mut denied = None;
            for candidate in candidates {
                match Camera::new(&candidate) {
                    Ok(cam) if supports_format(&cam) => devices.push(DeviceId(candidate)),
                    Ok(_) => log::debug!("Skipping {candidate}, no {:?} support", FORMAT),
                    Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                        log::warn!("Cannot open {candidate}: {err}");
                        denied = Some(format!("{candidate}: {err}"));
                    }
                    Err(err) => log::debug!("Skipping {candidate}: {err}"),
                }
            }

            match (devices.is_empty(), denied) {
                (true, Some(msg)) => Err(ClassifyError::Permission(msg)),
                _ => Ok(devices),
            }
        }

        fn open(
            &self,
            device: &DeviceId,
            config: &CaptureConfig,
        ) -> Result<Box<dyn CameraStream>, ClassifyError> {
            let camera = start_camera(&device.0, config.size)
                .map_err(|e| ClassifyError::CameraAccess(format!("{device}: {e}")))?;
            log::info!("Using camera {}", device);

            Ok(Box::new(V4lStream {
                camera,
                config: *config,
            }))
        }
    }

    struct V4lStream {
        camera: Camera,
        config: CaptureConfig,
    }

    impl CameraStream for V4lStream {
        fn capture(&mut self) -> Result<RgbImage, ClassifyError> {
            let frame = self
                .camera
                .capture()
                .map_err(|e| ClassifyError::CameraAccess(e.to_string()))?;
            let image: RgbImage = turbojpeg::decompress_image(&frame[..])
                .map_err(|e| ClassifyError::CameraAccess(format!("failed to decompress: {e}")))?;

            Ok(frame_to_canvas(&image, &self.config))
        }

        fn stop(&mut self) {
            if let Err(err) = self.camera.stop() {
                log::warn!("Error stopping camera: {err}");
            }
        }
    }

    fn start_camera(device_name: &str, min_side: u32) -> Result<Camera, Error> {
        let mut cam = Camera::new(device_name)?;

        let resolution = get_resolution(&cam, FORMAT, min_side)?;
        let interval = get_max_frame_rate(&cam, FORMAT, resolution)?;
        log::debug!("Starting {device_name} at {resolution:?}, interval {interval:?}");

        cam.start(&Config {
            interval,
            resolution,
            format: FORMAT,
            ..Default::default()
        })?;

        Ok(cam)
    }

    fn supports_format(cam: &Camera) -> bool {
        cam.formats()
            .filter_map(|fmt| fmt.ok())
            .any(|fmt| fmt.format[..] == *FORMAT)
    }

    /// Get the smallest resolution covering the canvas, or the largest one.
    fn get_resolution(cam: &Camera, format: &[u8], min_side: u32) -> Result<(u32, u32), Error> {
        let resolution_info = cam.resolutions(format)?;
        log::debug!("Found resolutions: {:?}", &resolution_info);
        match resolution_info {
            rscam::ResolutionInfo::Discretes(resolutions) => resolutions
                .iter()
                .filter(|res| res.0.min(res.1) >= min_side)
                .min_by_key(|res| res.0 * res.1)
                .or_else(|| resolutions.iter().max_by_key(|res| res.0 * res.1))
                .copied(),
            rscam::ResolutionInfo::Stepwise {
                min: _,
                max,
                step: _,
            } => Some(max),
        }
        .ok_or_else(|| simple_error!("No resolution found").into())
    }

    /// Get the maximum supported frame rate for the given format and resolution.
    fn get_max_frame_rate(
        cam: &Camera,
        format: &[u8],
        resolution: (u32, u32),
    ) -> Result<(u32, u32), Error> {
        let interval_info = cam.intervals(format, resolution)?;
        log::debug!("Found frame rates: {:?}", &interval_info);
        match interval_info {
            // Intervals are seconds per frame as (numerator, denominator)
            rscam::IntervalInfo::Discretes(intervals) => intervals
                .iter()
                .filter(|(numerator, _)| *numerator > 0)
                .max_by_key(|(numerator, denominator)| denominator / numerator)
                .copied(),
            rscam::IntervalInfo::Stepwise {
                min,
                max: _,
                step: _,
            } => Some(min),
        }
        .ok_or_else(|| simple_error!("No frame rate found").into())
    }
}
