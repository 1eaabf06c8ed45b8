// FFmpeg sample reader - first video stream decoded to NV12

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    codec, ffi,
    format::{self, Pixel},
    media::Type,
    software::scaling,
    util::{color, frame::video::Video as VideoFrame},
    Packet, Rational,
};
use tracing::{debug, warn};

use super::SendScaler;
use crate::domain::model::{
    first_video_track, AffineTransform, FrameClock, MediaTime, MetadataItem, TrackInfo, TrackKind,
};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{SampleFormat, SampleReader, VideoSample};

/// Size in bytes of a 3x3 display matrix of int32
const DISPLAY_MATRIX_SIZE: usize = 9 * std::mem::size_of::<i32>();

/// Reads the first video stream of a container, skipping cover art
pub struct FfmpegReader {
    path: PathBuf,
    input: format::context::Input,
    stream_index: Option<usize>,
    time_base: Rational,
    decoder: Option<codec::decoder::Video>,
    scaler: Option<SendScaler>,
    requested: Option<SampleFormat>,
    produced: SampleFormat,
    reading: bool,
    flushed: bool,
}

impl FfmpegReader {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let input = format::input(&path).map_err(|e| PipelineError::LoadFailed {
            reason: format!("{}: {}", path.display(), e),
        })?;
        debug!("Opened container {} ({})", path.display(), input.format().name());

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index: None,
            time_base: Rational::new(0, 1),
            decoder: None,
            scaler: None,
            requested: None,
            produced: SampleFormat::Nv12FullRange,
            reading: false,
            flushed: false,
        })
    }

    fn decoder(&mut self) -> PipelineResult<&mut codec::decoder::Video> {
        self.decoder.as_mut().ok_or_else(|| PipelineError::ReaderSetupFailed {
            reason: "no track output added".to_string(),
        })
    }

    /// Pull the next packet of the selected stream into the decoder, or
    /// flush it once the demuxer is exhausted.
    fn feed_decoder(&mut self) -> PipelineResult<()> {
        let Some(stream_index) = self.stream_index else {
            self.flushed = true;
            return Ok(());
        };
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == stream_index => {
                    self.decoder()?.send_packet(&packet).map_err(read_failure)?;
                    return Ok(());
                }
                Ok(()) => continue,
                Err(ffmpeg_next::Error::Eof) => {
                    self.decoder()?.send_eof().map_err(read_failure)?;
                    self.flushed = true;
                    return Ok(());
                }
                Err(e) => return Err(read_failure(e)),
            }
        }
    }

    fn to_sample(&mut self, frame: &VideoFrame) -> PipelineResult<VideoSample> {
        let (width, height) = (frame.width(), frame.height());
        if self.scaler.is_none() {
            self.scaler = Some(self.create_scaler(frame)?);
        }
        let scaler = self.scaler.as_mut().ok_or_else(|| PipelineError::ReaderSetupFailed {
            reason: "scaler unavailable".to_string(),
        })?;

        let mut nv12 = VideoFrame::empty();
        scaler.run(frame, &mut nv12).map_err(read_failure)?;

        let luma_stride = nv12.stride(0);
        let chroma_stride = nv12.stride(1);
        let luma_len = (luma_stride * height as usize).min(nv12.data(0).len());
        let chroma_len = (chroma_stride * (height as usize).div_ceil(2)).min(nv12.data(1).len());

        let presentation_time = frame
            .timestamp()
            .or_else(|| frame.pts())
            .and_then(|pts| self.media_time(pts));

        Ok(VideoSample {
            width,
            height,
            format: self.produced,
            luma: nv12.data(0)[..luma_len].to_vec(),
            luma_stride,
            chroma: nv12.data(1)[..chroma_len].to_vec(),
            chroma_stride,
            presentation_time,
        })
    }

    fn create_scaler(&mut self, frame: &VideoFrame) -> PipelineResult<SendScaler> {
        let (width, height) = (frame.width(), frame.height());
        let mut scaler = scaling::Context::get(
            frame.format(),
            width,
            height,
            Pixel::NV12,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::ReaderSetupFailed {
            reason: format!("cannot convert {:?} to NV12: {}", frame.format(), e),
        })?;

        let want_full = self
            .requested
            .map(|format| format.is_full_range())
            .unwrap_or(true);
        let source_full = frame.color_range() == color::Range::JPEG;

        self.produced = if want_full && set_full_range_output(&mut scaler, source_full) {
            SampleFormat::Nv12FullRange
        } else {
            if want_full {
                warn!("Full-range output unavailable, decoding {} as video range", self.path.display());
            }
            SampleFormat::Nv12VideoRange
        };
        debug!(
            "Scaling {:?} {}x{} to {:?}",
            frame.format(),
            width,
            height,
            self.produced
        );
        Ok(SendScaler(scaler))
    }

    fn media_time(&self, pts: i64) -> Option<MediaTime> {
        let num = i64::from(self.time_base.numerator());
        let den = u32::try_from(self.time_base.denominator()).ok()?;
        MediaTime::new(pts.checked_mul(num)?, den).ok()
    }
}

impl SampleReader for FfmpegReader {
    fn load_video_track(&mut self) -> PipelineResult<TrackInfo> {
        let kinds: Vec<TrackKind> = self.input.streams().map(|stream| track_kind(&stream)).collect();
        let stream = first_video_track(&kinds)
            .and_then(|index| self.input.stream(index))
            .ok_or_else(|| PipelineError::NoVideoTrack {
                path: self.path.display().to_string(),
            })?;

        let parameters = stream.parameters();
        let context = codec::context::Context::from_parameters(parameters.clone())
            .map_err(|e| load_failure("codec parameters", e))?;
        let video = context
            .decoder()
            .video()
            .map_err(|e| load_failure("video decoder", e))?;

        let frame_duration = minimum_frame_duration(stream.rate(), stream.avg_frame_rate());
        let nominal_frame_rate = positive_rate(stream.avg_frame_rate())
            .or_else(|| positive_rate(stream.rate()))
            .map(|rate| f64::from(rate) as f32)
            .unwrap_or(0.0);

        let total_duration = if self.input.duration() > 0 {
            MediaTime::new(self.input.duration(), ffi::AV_TIME_BASE as u32).ok()
        } else {
            let time_base = stream.time_base();
            u32::try_from(time_base.denominator())
                .ok()
                .filter(|_| stream.duration() > 0)
                .and_then(|den| {
                    MediaTime::new(stream.duration() * i64::from(time_base.numerator()), den).ok()
                })
        };

        let rotation = display_rotation(&parameters).or_else(|| rotate_tag(&stream));
        let transform = rotation
            .map(AffineTransform::rotation)
            .unwrap_or_default();

        let mut metadata: Vec<MetadataItem> = self
            .input
            .metadata()
            .iter()
            .map(|(key, value)| MetadataItem::new(key, value))
            .collect();
        metadata.extend(
            stream
                .metadata()
                .iter()
                .map(|(key, value)| MetadataItem::new(key, value)),
        );

        let codec_name = parameters.id().name().to_string();
        let clock = FrameClock::new(frame_duration, nominal_frame_rate, total_duration, transform);
        let track = TrackInfo::new(
            stream.index(),
            codec_name,
            video.width(),
            video.height(),
            clock,
            metadata,
        );

        self.stream_index = Some(stream.index());
        self.time_base = stream.time_base();
        Ok(track)
    }

    fn add_track_output(&mut self, format: SampleFormat) -> PipelineResult<()> {
        let stream_index = self.stream_index.ok_or_else(|| PipelineError::ReaderSetupFailed {
            reason: "video track not loaded".to_string(),
        })?;
        let stream = self
            .input
            .stream(stream_index)
            .ok_or_else(|| PipelineError::ReaderSetupFailed {
                reason: format!("stream {} disappeared", stream_index),
            })?;

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| PipelineError::ReaderSetupFailed {
                reason: format!("cannot open decoder: {}", e),
            })?;

        self.decoder = Some(decoder);
        self.requested = Some(format);
        Ok(())
    }

    fn start_reading(&mut self) -> PipelineResult<()> {
        if self.decoder.is_none() {
            return Err(PipelineError::ReaderSetupFailed {
                reason: "no track output added".to_string(),
            });
        }
        self.reading = true;
        Ok(())
    }

    fn copy_next_sample(&mut self) -> PipelineResult<Option<VideoSample>> {
        if !self.reading {
            return Ok(None);
        }
        loop {
            let mut decoded = VideoFrame::empty();
            match self.decoder()?.receive_frame(&mut decoded) {
                Ok(()) => return self.to_sample(&decoded).map(Some),
                Err(ffmpeg_next::Error::Eof) => {
                    self.reading = false;
                    return Ok(None);
                }
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::EAGAIN => {}
                Err(e) => return Err(read_failure(e)),
            }

            if self.flushed {
                // Drained after EOF
                self.reading = false;
                return Ok(None);
            }
            self.feed_decoder()?;
        }
    }
}

fn positive_rate(rate: Rational) -> Option<Rational> {
    (rate.numerator() > 0 && rate.denominator() > 0).then_some(rate)
}

fn track_kind(stream: &format::stream::Stream) -> TrackKind {
    match stream.parameters().medium() {
        Type::Video if stream.disposition().contains(format::stream::Disposition::ATTACHED_PIC) => {
            TrackKind::AttachedPicture
        }
        Type::Video => TrackKind::Video,
        Type::Audio => TrackKind::Audio,
        _ => TrackKind::Other,
    }
}

/// Shortest frame duration of a stream.
///
/// The real base rate covers every timestamp of a variable-rate stream, so it
/// wins over the average.
fn minimum_frame_duration(real_rate: Rational, average_rate: Rational) -> Option<MediaTime> {
    let rate = positive_rate(real_rate).or_else(|| positive_rate(average_rate))?;
    let ticks_per_second = u32::try_from(rate.numerator()).ok()?;
    MediaTime::new(i64::from(rate.denominator()), ticks_per_second).ok()
}

/// Counter-clockwise rotation stored in the stream display matrix
fn display_rotation(parameters: &codec::Parameters) -> Option<f64> {
    // SAFETY: the parameters outlive this call and side data entries are
    // only read, with their size checked before the matrix is interpreted.
    unsafe {
        let par = parameters.as_ptr();
        let side_data = ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side_data.is_null() || (*side_data).size < DISPLAY_MATRIX_SIZE {
            return None;
        }
        let angle = ffi::av_display_rotation_get((*side_data).data as *const i32);
        angle.is_finite().then_some(angle)
    }
}

/// Legacy `rotate` tag, clockwise degrees
fn rotate_tag(stream: &format::stream::Stream) -> Option<f64> {
    stream
        .metadata()
        .get("rotate")
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|clockwise| -clockwise)
}

/// Ask swscale for full-range output. False when it refuses.
fn set_full_range_output(scaler: &mut scaling::Context, source_full: bool) -> bool {
    // SAFETY: the scaler context is valid for the lifetime of `scaler`, and
    // the coefficient table returned by swscale is static.
    unsafe {
        let coefficients = ffi::sws_getCoefficients(ffi::SWS_CS_ITU601 as i32);
        let result = ffi::sws_setColorspaceDetails(
            scaler.as_mut_ptr(),
            coefficients,
            i32::from(source_full),
            coefficients,
            1,
            0,
            1 << 16,
            1 << 16,
        );
        result >= 0
    }
}

fn load_failure(context: &str, error: ffmpeg_next::Error) -> PipelineError {
    PipelineError::LoadFailed {
        reason: format!("{}: {}", context, error),
    }
}

fn read_failure(error: ffmpeg_next::Error) -> PipelineError {
    PipelineError::LoadFailed {
        reason: format!("decode failed: {}", error),
    }
}
