use ffmpeg_next::format::context::Input;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video;

use crate::capture::domain::camera_config::CameraSource;
use crate::capture::domain::capture_source::{CaptureFactory, CaptureSource};
use crate::shared::frame::Frame;
use crate::shared::BoxError;

/// Socket read timeout for network streams, in microseconds.
const NETWORK_TIMEOUT_US: &str = "5000000";

/// Opens cameras through libavformat/libavdevice.
#[derive(Default)]
pub struct FfmpegCaptureFactory;

impl CaptureFactory for FfmpegCaptureFactory {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureSource>, BoxError> {
        let capture = match source {
            CameraSource::LocalDevice(index) => FfmpegCapture::open_device(*index)?,
            CameraSource::Rtsp(url) => {
                let mut opts = ffmpeg_next::Dictionary::new();
                opts.set("rtsp_transport", "tcp");
                opts.set("timeout", NETWORK_TIMEOUT_US);
                FfmpegCapture::open_url(url, opts)?
            }
            CameraSource::Http(url) => {
                let mut opts = ffmpeg_next::Dictionary::new();
                opts.set("rw_timeout", NETWORK_TIMEOUT_US);
                opts.set("reconnect", "1");
                FfmpegCapture::open_url(url, opts)?
            }
        };
        Ok(Box::new(capture))
    }
}

/// A decoded camera stream, converted to RGB24 frame by frame.
pub struct FfmpegCapture {
    ictx: Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: Option<Scaler>,
    stream_index: usize,
    frame_index: usize,
    draining: bool,
}

struct Scaler {
    context: scaling::Context,
    width: u32,
    height: u32,
    format: ffmpeg_next::format::Pixel,
}

// Safety: an FfmpegCapture is owned and driven by exactly one camera
// worker thread. The raw pointers inside ffmpeg types are never shared.
unsafe impl Send for FfmpegCapture {}

impl FfmpegCapture {
    pub fn open_url(url: &str, options: ffmpeg_next::Dictionary) -> Result<Self, BoxError> {
        ffmpeg_next::init()?;
        let ictx = ffmpeg_next::format::input_with_dictionary(&url, options)?;
        Self::from_input(ictx)
    }

    pub fn open_device(index: u32) -> Result<Self, BoxError> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let (format_name, device) = local_device_path(index);
        let format = ffmpeg_next::device::input::video()
            .find(|f| f.name().split(',').any(|n| n == format_name))
            .ok_or_else(|| format!("capture device format '{format_name}' is not available"))?;

        let ctx = ffmpeg_next::format::open_with(&device, &format, ffmpeg_next::Dictionary::new())?;
        Self::from_input(ctx.input())
    }

    fn from_input(ictx: Input) -> Result<Self, BoxError> {
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        Ok(Self {
            ictx,
            decoder,
            scaler: None,
            stream_index,
            frame_index: 0,
            draining: false,
        })
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, BoxError> {
        let mut decoded = Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let (width, height, format) = (decoded.width(), decoded.height(), decoded.format());
        let stale = self
            .scaler
            .as_ref()
            .map_or(true, |s| s.width != width || s.height != height || s.format != format);
        if stale {
            let context = scaling::Context::get(
                format,
                width,
                height,
                ffmpeg_next::format::Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some(Scaler {
                context,
                width,
                height,
                format,
            });
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Ok(None);
        };

        let mut rgb = Video::empty();
        scaler.context.run(&decoded, &mut rgb)?;
        let frame = Frame::new(
            extract_rgb_pixels(&rgb, width, height),
            width,
            height,
            3,
            self.frame_index,
        );
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

impl CaptureSource for FfmpegCapture {
    fn read(&mut self) -> Result<Option<Frame>, BoxError> {
        loop {
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
            if self.draining {
                return Ok(None);
            }

            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => {
                    let _ = self.decoder.send_eof();
                    self.draining = true;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if packet.stream() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                log::debug!("Dropping undecodable packet: {e}");
            }
        }
    }
}

/// Platform input format and device path for a local capture index.
fn local_device_path(index: u32) -> (&'static str, String) {
    #[cfg(target_os = "macos")]
    {
        ("avfoundation", format!("{index}:none"))
    }
    #[cfg(target_os = "windows")]
    {
        ("dshow", format!("video={index}"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        ("video4linux2", format!("/dev/video{index}"))
    }
}

fn extract_rgb_pixels(rgb_frame: &Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;

    let mut pixels = Vec::with_capacity(w * height as usize * 3);
    for row in 0..height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
