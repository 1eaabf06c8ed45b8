// FFmpeg asset writer - ARGB buffers to H.264 in MP4

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ffmpeg_next::{
    codec, encoder, ffi,
    format::{self, Pixel},
    software::scaling,
    util::frame::video::Video as VideoFrame,
    Dictionary, Packet, Rational,
};
use tracing::{debug, info, warn};

use super::{ffmpeg_failure, SendScaler};
use crate::domain::model::MediaTime;
use crate::engine::pixel_buffer::{PixelBuffer, BYTES_PER_PIXEL};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{AssetWriter, OutputSettings, VideoCodec};

/// Open encoder and muxer of a started session
struct Session {
    output: format::context::Output,
    encoder: encoder::video::Encoder,
    scaler: Option<SendScaler>,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
}

/// Writes one H.264 track.
///
/// Encoded packets wait in a queue until the writer is waited on; it reports
/// readiness while that queue is shorter than `max_pending_packets`.
pub struct FfmpegWriter {
    destination: PathBuf,
    settings: OutputSettings,
    session: Option<Session>,
    pending: VecDeque<Packet>,
    last_pts: Option<i64>,
    input_finished: bool,
    packets_written: usize,
}

impl FfmpegWriter {
    pub fn new(destination: &Path, settings: OutputSettings) -> Self {
        Self {
            destination: destination.to_path_buf(),
            settings,
            session: None,
            pending: VecDeque::new(),
            last_pts: None,
            input_finished: false,
            packets_written: 0,
        }
    }

    fn session(&mut self) -> PipelineResult<&mut Session> {
        self.session.as_mut().ok_or_else(|| PipelineError::WriterFailed {
            message: "writer has not been started".to_string(),
        })
    }

    fn find_codec(codec: VideoCodec) -> Option<codec::Codec> {
        match codec {
            VideoCodec::H264 => encoder::find(codec::Id::H264),
        }
    }

    fn open_session(&self) -> PipelineResult<Session> {
        let settings = &self.settings;
        let codec = Self::find_codec(settings.codec).ok_or_else(|| {
            PipelineError::UnsupportedOutputConfig {
                reason: format!("no {:?} encoder available", settings.codec),
            }
        })?;
        let timescale = i32::try_from(settings.timescale).map_err(|_| {
            PipelineError::UnsupportedOutputConfig {
                reason: format!("timescale {} out of range", settings.timescale),
            }
        })?;
        let encoder_time_base = Rational::new(1, timescale);

        let mut output = format::output(&self.destination).map_err(|e| {
            PipelineError::WriterStartFailed {
                reason: format!("{}: {}", self.destination.display(), e),
            }
        })?;
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut stream = output
            .add_stream(codec)
            .map_err(|e| ffmpeg_failure("add stream", e))?;

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| ffmpeg_failure("encoder context", e))?;
        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(encoder_time_base);
        video.set_frame_rate(Some(Rational::from(settings.frame_rate)));
        video.set_max_b_frames(0);
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = Dictionary::new();
        options.set("preset", &settings.preset);
        options.set("crf", &settings.crf.to_string());
        options.set("threads", &settings.threads.to_string());

        let encoder = video.open_with(options).map_err(|e| PipelineError::WriterStartFailed {
            reason: format!("cannot open encoder: {}", e),
        })?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);
        let stream_index = stream.index();

        output.write_header().map_err(|e| PipelineError::WriterStartFailed {
            reason: format!("cannot write header: {}", e),
        })?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .unwrap_or(encoder_time_base);

        Ok(Session {
            output,
            encoder,
            scaler: None,
            stream_index,
            encoder_time_base,
            stream_time_base,
        })
    }

    /// Collect every packet the encoder has ready
    fn receive_packets(&mut self) -> PipelineResult<()> {
        let session = self.session()?;
        let mut received = Vec::new();
        loop {
            let mut packet = Packet::empty();
            match session.encoder.receive_packet(&mut packet) {
                Ok(()) => received.push(packet),
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::EAGAIN => break,
                Err(ffmpeg_next::Error::Eof) => break,
                Err(e) => return Err(ffmpeg_failure("receive packet", e)),
            }
        }
        self.pending.extend(received);
        Ok(())
    }

    /// Mux every queued packet.
    ///
    /// Packets without a duration get one frame's worth, so the last sample
    /// of the track keeps its length.
    fn mux_pending(&mut self) -> PipelineResult<()> {
        let mut pending = std::mem::take(&mut self.pending);
        let frame_ticks = self.settings.frame_ticks;
        let session = self.session()?;
        let mut written = 0;
        while let Some(mut packet) = pending.pop_front() {
            packet.set_stream(session.stream_index);
            if packet.duration() <= 0 {
                packet.set_duration(frame_ticks);
            }
            packet.rescale_ts(session.encoder_time_base, session.stream_time_base);
            packet
                .write_interleaved(&mut session.output)
                .map_err(|e| ffmpeg_failure("write packet", e))?;
            written += 1;
        }
        self.packets_written += written;
        Ok(())
    }

    fn argb_frame(buffer: &PixelBuffer) -> VideoFrame {
        let mut frame = VideoFrame::new(Pixel::ARGB, buffer.width(), buffer.height());
        let stride = frame.stride(0);
        let row_bytes = buffer.width() as usize * BYTES_PER_PIXEL;
        let data = frame.data_mut(0);
        for y in 0..buffer.height() {
            let start = y as usize * stride;
            data[start..start + row_bytes].copy_from_slice(buffer.row(y));
        }
        frame
    }
}

impl AssetWriter for FfmpegWriter {
    fn can_apply(&self, settings: &OutputSettings) -> bool {
        let encoder_available = Self::find_codec(settings.codec).is_some();
        // 4:2:0 chroma needs even dimensions
        let even = settings.width % 2 == 0 && settings.height % 2 == 0;
        let sized = settings.width > 0 && settings.height > 0;
        let timed = settings.timescale > 0
            && i32::try_from(settings.timescale).is_ok()
            && settings.frame_ticks > 0
            && settings.frame_rate.is_finite()
            && settings.frame_rate > 0.0;
        if !encoder_available {
            warn!("No {:?} encoder in the linked FFmpeg", settings.codec);
        }
        encoder_available && even && sized && timed
    }

    fn start_writing(&mut self) -> PipelineResult<()> {
        let session = self.open_session()?;
        info!(
            "Writing {}x{} {:?} to {}",
            self.settings.width,
            self.settings.height,
            self.settings.codec,
            self.destination.display()
        );
        self.session = Some(session);
        Ok(())
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        self.session.is_some()
            && !self.input_finished
            && self.pending.len() < self.settings.max_pending_packets
    }

    fn wait_until_ready(&mut self) -> PipelineResult<()> {
        self.mux_pending()
    }

    fn append(&mut self, buffer: &PixelBuffer, presentation_time: MediaTime) -> PipelineResult<bool> {
        if self.input_finished {
            return Err(PipelineError::WriterFailed {
                message: "append after input was marked finished".to_string(),
            });
        }
        if (buffer.width(), buffer.height()) != (self.settings.width, self.settings.height) {
            warn!(
                "Rejecting {}x{} buffer for a {}x{} track",
                buffer.width(),
                buffer.height(),
                self.settings.width,
                self.settings.height
            );
            return Ok(false);
        }
        let pts = presentation_time.convert_scale(self.settings.timescale)?.value;
        if self.last_pts.is_some_and(|last| pts <= last) {
            warn!("Rejecting non-increasing timestamp {}", pts);
            return Ok(false);
        }

        let argb = Self::argb_frame(buffer);
        let session = self.session()?;
        if session.scaler.is_none() {
            let scaler = scaling::Context::get(
                Pixel::ARGB,
                buffer.width(),
                buffer.height(),
                Pixel::YUV420P,
                buffer.width(),
                buffer.height(),
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| ffmpeg_failure("scaler", e))?;
            session.scaler = Some(SendScaler(scaler));
        }

        let mut yuv = VideoFrame::empty();
        if let Some(scaler) = session.scaler.as_mut() {
            scaler
                .run(&argb, &mut yuv)
                .map_err(|e| ffmpeg_failure("convert frame", e))?;
        }
        yuv.set_pts(Some(pts));
        session
            .encoder
            .send_frame(&yuv)
            .map_err(|e| ffmpeg_failure("send frame", e))?;

        self.last_pts = Some(pts);
        self.receive_packets()?;
        Ok(true)
    }

    fn mark_as_finished(&mut self) -> PipelineResult<()> {
        if self.input_finished {
            return Ok(());
        }
        self.session()?
            .encoder
            .send_eof()
            .map_err(|e| ffmpeg_failure("flush encoder", e))?;
        self.input_finished = true;
        self.receive_packets()
    }

    fn finish_writing(&mut self) -> PipelineResult<()> {
        self.mux_pending()?;
        let packets = self.packets_written;
        self.session()?
            .output
            .write_trailer()
            .map_err(|e| ffmpeg_failure("write trailer", e))?;
        debug!("Finalized {} with {} packets", self.destination.display(), packets);
        Ok(())
    }
}
