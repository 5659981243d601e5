//! Network stream source (RTSP, HTTP MJPEG, anything `uridecodebin` accepts)
//! using GStreamer.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use super::backend::{CaptureBackend, Negotiated};
use super::descriptor::CaptureSettings;
use crate::frame::Frame;

pub(crate) struct RtspSource {
    url: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    target_fps: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Instant,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

impl RtspSource {
    pub(crate) fn open(url: &str, settings: &CaptureSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let source = if url.starts_with("rtsp://") {
            format!("rtspsrc location={url} latency=0 ! decodebin")
        } else {
            format!("uridecodebin uri={url}")
        };
        let pipeline_description = format!(
            "{source} ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            settings.width, settings.height
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set stream pipeline to Playing")?;
        log::info!("RtspSource: connected to {url}");

        Ok(Self {
            url: url.to_string(),
            pipeline,
            appsink,
            target_fps: settings.target_fps,
            frame_count: 0,
            last_frame_at: None,
            connected_at: Instant::now(),
            last_error: None,
            active_width: settings.width,
            active_height: settings.height,
        })
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            500
        } else {
            (1000 / self.target_fps).saturating_mul(4)
        };
        Duration::from_millis(u64::from(base_ms.max(500)))
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

impl CaptureBackend for RtspSource {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.poll_bus();

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout().as_millis() as u64);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow::anyhow!("stream {} stalled", self.url))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        self.active_width = width;
        self.active_height = height;
        Ok(Some(Frame::new(pixels, width, height, self.frame_count)?))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return self.connected_at.elapsed() <= Duration::from_secs(5);
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

impl Drop for RtspSource {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to stop pipeline for {}: {err}", self.url);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("stream sample missing buffer")?;
    let caps = sample.caps().context("stream sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse stream caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map stream buffer")?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("stream buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
