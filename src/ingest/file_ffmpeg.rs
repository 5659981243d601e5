//! Local video file source using FFmpeg.
//!
//! Decodes the best video track to RGB24 and paces playback at the configured
//! rate. The source is finite: end of file ends the capture loop.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::backend::{CaptureBackend, Negotiated};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    target_fps: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    flushed: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path, target_fps: u32) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegFileSource: opened {} ({}x{})",
            path.display(),
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            target_fps,
            frame_count: 0,
            last_frame_at: None,
            flushed: false,
        })
    }

    fn pace(&mut self) {
        if self.target_fps > 0 {
            let interval = Duration::from_secs_f64(1.0 / f64::from(self.target_fps));
            if let Some(last) = self.last_frame_at {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    thread::sleep(interval - elapsed);
                }
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn emit(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        self.pace();
        self.frame_count += 1;
        Ok(Frame::new(pixels, width, height, self.frame_count)?)
    }
}

impl CaptureBackend for FfmpegFileSource {
    fn name(&self) -> &'static str {
        "ffmpeg-file"
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.emit(&decoded).map(Some);
        }
        if self.flushed {
            return Ok(None);
        }

        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.flushed = true;
                    return match self.decoder.receive_frame(&mut decoded) {
                        Ok(()) => self.emit(&decoded).map(Some),
                        Err(_) => {
                            log::info!(
                                "FfmpegFileSource: {} ended after {} frames",
                                self.path.display(),
                                self.frame_count
                            );
                            Ok(None)
                        }
                    };
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err).context("read packet from file"));
                }
            }
            if packet.stream() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.emit(&decoded).map(Some);
            }
        }
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn negotiated(&self) -> Negotiated {
        Negotiated {
            width: self.decoder.width(),
            height: self.decoder.height(),
            fps: self.target_fps,
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
