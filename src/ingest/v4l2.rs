//! V4L2 capture device source (`/dev/videoN`).
//!
//! Requests RGB24 at the configured size and rate. Drivers may negotiate a
//! different size; the negotiated size is what frames and properties report.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::backend::{CaptureBackend, Negotiated};
use super::descriptor::CaptureSettings;
use crate::frame::Frame;

pub(crate) struct V4l2Source {
    device_path: String,
    state: DeviceV4l2State,
    target_fps: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(crate) fn open(device_path: &str, settings: &CaptureSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(device_path)
            .with_context(|| format!("open v4l2 device {device_path}"))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {device_path}: {err}");
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            anyhow::bail!(
                "device {device_path} does not support RGB24 capture (negotiated {})",
                format.fourcc
            );
        }

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {device_path}: {err}");
            }
        }

        let state = DeviceV4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            device_path,
            format.width,
            format.height
        );

        Ok(Self {
            device_path: device_path.to_string(),
            state,
            target_fps: settings.target_fps,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            active_width: format.width,
            active_height: format.height,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }
}

impl CaptureBackend for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let pixels = match self
            .state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
        {
            Ok(pixels) => pixels,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(anyhow::Error::new(err)
                    .context(format!("capture v4l2 frame from {}", self.device_path)));
            }
        };

        let expected = (self.active_width as usize) * (self.active_height as usize) * 3;
        let pixels = pixels
            .get(..expected)
            .context("v4l2 buffer shorter than negotiated frame")?
            .to_vec();

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(Some(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        )?))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn negotiated(&self) -> Negotiated {
        Negotiated {
            width: self.active_width,
            height: self.active_height,
            fps: self.target_fps,
        }
    }
}
