//! Still-frame QR scanning.
//!
//! The scanner captures one frame on demand instead of decoding a live
//! video feed. A camera cycle arms a capture timeout; if the user never
//! captures, [`Scanner::poll_timeout`] cancels the cycle and releases the
//! camera.

use crate::access::{AccessResolver, ScanResolution};
use crate::error::AccessError;
use crate::qr::QrPayload;
use crate::storage::Storage;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_CAPTURE_WIDTH: u32 = 1080;

/// An open camera feed.
pub trait MediaStream: Send {
    /// The frame currently shown, if the feed has produced one.
    fn current_frame(&mut self) -> Option<DynamicImage>;
    fn stop_all_tracks(&mut self);
    fn live_tracks(&self) -> usize;
}

pub trait Camera: Send {
    /// Request the device. `Err` carries the reason (denied, no device...).
    fn open(&mut self) -> Result<Box<dyn MediaStream>, String>;
}

/// Camera for hosts without a capture device; always refuses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCamera;

impl Camera for NoCamera {
    fn open(&mut self) -> Result<Box<dyn MediaStream>, String> {
        Err("no camera device".to_string())
    }
}

/// Extracts QR text from a greyscale image.
pub trait QrDecoder: Send {
    fn decode(&self, image: &GrayImage) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn decode(&self, image: &GrayImage) -> Option<String> {
        let (width, height) = image.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                image.get_pixel(x as u32, y as u32).0[0]
            });
        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_, content)) => Some(content),
                Err(e) => {
                    debug!("QR grid failed to decode: {e:?}");
                    None
                }
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Idle,
    Camera,
    File,
}

/// Scale `frame` down to at most `max_width` pixels wide, keeping aspect.
pub fn bounded_frame(frame: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = frame.dimensions();
    if width <= max_width || width == 0 {
        return frame;
    }
    let scaled_height = ((u64::from(height) * u64::from(max_width)) / u64::from(width)).max(1);
    frame.resize_exact(max_width, scaled_height as u32, FilterType::Triangle)
}

pub struct Scanner<C: Camera, D: QrDecoder> {
    camera: C,
    decoder: D,
    mode: ScanMode,
    stream: Option<Box<dyn MediaStream>>,
    pending: Option<DynamicImage>,
    capture_deadline: Option<Instant>,
    capture_timeout: Duration,
    max_width: u32,
}

impl<C: Camera, D: QrDecoder> Scanner<C, D> {
    pub fn new(camera: C, decoder: D) -> Self {
        Self::with_limits(camera, decoder, CAPTURE_TIMEOUT, MAX_CAPTURE_WIDTH)
    }

    pub fn with_limits(camera: C, decoder: D, capture_timeout: Duration, max_width: u32) -> Self {
        Scanner {
            camera,
            decoder,
            mode: ScanMode::Idle,
            stream: None,
            pending: None,
            capture_deadline: None,
            capture_timeout,
            max_width: max_width.max(1),
        }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn has_pending_image(&self) -> bool {
        self.pending.is_some()
    }

    pub fn capture_deadline(&self) -> Option<Instant> {
        self.capture_deadline
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_all_tracks();
            debug!("camera released");
        }
    }

    /// Stop the camera, disarm the timeout and forget any pending frame.
    fn teardown(&mut self) {
        self.capture_deadline = None;
        self.release_stream();
        self.pending = None;
    }

    /// Open the camera and arm the capture timeout.
    ///
    /// On failure the scanner falls back to file mode.
    pub fn start_camera(&mut self, now: Instant) -> Result<(), AccessError> {
        self.teardown();
        match self.camera.open() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.mode = ScanMode::Camera;
                self.capture_deadline = Some(now + self.capture_timeout);
                info!("camera started, capture times out in {:?}", self.capture_timeout);
                Ok(())
            }
            Err(reason) => {
                warn!("camera unavailable ({reason}), falling back to file upload");
                self.mode = ScanMode::File;
                Err(AccessError::CameraUnavailable(reason))
            }
        }
    }

    /// Cancel the cycle if the capture timeout elapsed. Returns whether it fired.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        match self.capture_deadline {
            Some(deadline) if now >= deadline => {
                info!("capture timed out, stopping camera");
                self.teardown();
                true
            }
            _ => false,
        }
    }

    /// Grab the current frame as the pending image and stop the camera.
    ///
    /// Without an active stream this does nothing and returns `false`.
    pub fn capture(&mut self) -> bool {
        let Some(mut stream) = self.stream.take() else {
            return false;
        };
        self.capture_deadline = None;
        let frame = stream.current_frame();
        stream.stop_all_tracks();

        match frame {
            Some(frame) => {
                self.pending = Some(bounded_frame(frame, self.max_width));
                true
            }
            None => {
                warn!("camera produced no frame");
                false
            }
        }
    }

    fn decode_image(&self, image: &DynamicImage) -> Result<QrPayload, AccessError> {
        let text = self
            .decoder
            .decode(&image.to_luma8())
            .ok_or(AccessError::NoCodeDetected)?;
        QrPayload::parse(&text)
    }

    /// Decode the pending frame. The frame is consumed either way and the
    /// camera is not restarted.
    pub fn analyze(&mut self) -> Result<QrPayload, AccessError> {
        let image = self.pending.take().ok_or(AccessError::NoCodeDetected)?;
        self.decode_image(&image)
    }

    /// Decode an uploaded image file (PNG/JPEG bytes).
    pub fn upload(&mut self, bytes: &[u8]) -> Result<QrPayload, AccessError> {
        self.set_mode(ScanMode::File);
        let image = image::load_from_memory(bytes).map_err(|e| {
            warn!("uploaded file is not a readable image: {e}");
            AccessError::NoCodeDetected
        })?;
        self.decode_image(&bounded_frame(image, self.max_width))
    }

    /// Analyze the pending frame and hand the payload to the resolver.
    pub fn analyze_into<S: Storage>(
        &mut self,
        resolver: &mut AccessResolver<S>,
    ) -> Result<ScanResolution, AccessError> {
        let payload = self.analyze()?;
        resolver.resolve_payload(&payload)
    }

    pub fn upload_into<S: Storage>(
        &mut self,
        bytes: &[u8],
        resolver: &mut AccessResolver<S>,
    ) -> Result<ScanResolution, AccessError> {
        let payload = self.upload(bytes)?;
        resolver.resolve_payload(&payload)
    }

    /// Switch input mode; always tears down the camera and pending frame.
    pub fn set_mode(&mut self, mode: ScanMode) {
        self.teardown();
        self.mode = mode;
    }

    pub fn stop(&mut self) {
        self.set_mode(ScanMode::Idle);
    }
}

impl<C: Camera, D: QrDecoder> Drop for Scanner<C, D> {
    fn drop(&mut self) {
        self.release_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStream {
        live: Arc<AtomicUsize>,
        frame: Option<DynamicImage>,
    }

    impl MediaStream for FakeStream {
        fn current_frame(&mut self) -> Option<DynamicImage> {
            self.frame.clone()
        }
        fn stop_all_tracks(&mut self) {
            self.live.store(0, Ordering::SeqCst);
        }
        fn live_tracks(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    struct FakeCamera {
        live: Arc<AtomicUsize>,
        width: u32,
    }

    impl Camera for FakeCamera {
        fn open(&mut self) -> Result<Box<dyn MediaStream>, String> {
            self.live.store(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                live: Arc::clone(&self.live),
                frame: Some(DynamicImage::ImageRgb8(RgbImage::new(self.width, self.width / 2))),
            }))
        }
    }

    struct StubDecoder(Option<&'static str>);

    impl QrDecoder for StubDecoder {
        fn decode(&self, _image: &GrayImage) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn scanner(width: u32, text: Option<&'static str>) -> (Scanner<FakeCamera, StubDecoder>, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let camera = FakeCamera {
            live: Arc::clone(&live),
            width,
        };
        (Scanner::new(camera, StubDecoder(text)), live)
    }

    #[test]
    fn capture_without_stream_is_a_no_op() {
        let (mut scanner, _) = scanner(640, None);
        assert!(!scanner.capture());
        assert!(!scanner.has_pending_image());
    }

    #[test]
    fn capture_bounds_width_and_releases_camera() {
        let (mut scanner, live) = scanner(2160, None);
        scanner.start_camera(Instant::now()).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);

        assert!(scanner.capture());
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(scanner.capture_deadline().is_none());
        let pending = scanner.pending.as_ref().unwrap();
        assert_eq!(pending.dimensions(), (1080, 540));
    }

    #[test]
    fn stop_mid_cycle_releases_tracks_and_timeout() {
        let (mut scanner, live) = scanner(640, None);
        let start = Instant::now();
        scanner.start_camera(start).unwrap();
        scanner.stop();
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(scanner.capture_deadline().is_none());
        // the disarmed timeout never fires later
        assert!(!scanner.poll_timeout(start + CAPTURE_TIMEOUT * 2));
    }

    #[test]
    fn restarting_rearms_the_timeout() {
        let (mut scanner, _) = scanner(640, None);
        let start = Instant::now();
        scanner.start_camera(start).unwrap();
        let later = start + Duration::from_secs(10);
        scanner.start_camera(later).unwrap();
        assert!(!scanner.poll_timeout(start + CAPTURE_TIMEOUT));
        assert!(scanner.poll_timeout(later + CAPTURE_TIMEOUT));
        assert!(!scanner.is_streaming());
    }

    #[test]
    fn analyze_distinguishes_missing_and_malformed_codes() {
        let (mut scanner, _) = scanner(640, None);
        assert_eq!(scanner.analyze(), Err(AccessError::NoCodeDetected));
        scanner.start_camera(Instant::now()).unwrap();
        scanner.capture();
        assert_eq!(scanner.analyze(), Err(AccessError::NoCodeDetected));
        assert!(!scanner.is_streaming());

        let (mut scanner, _) = scanner_with(r#"{"t":"OTHER"}"#);
        scanner.start_camera(Instant::now()).unwrap();
        scanner.capture();
        assert!(matches!(scanner.analyze(), Err(AccessError::MalformedPayload(_))));
    }

    fn scanner_with(text: &'static str) -> (Scanner<FakeCamera, StubDecoder>, Arc<AtomicUsize>) {
        scanner(640, Some(text))
    }

    #[test]
    fn camera_refusal_falls_back_to_file_mode() {
        let mut scanner = Scanner::new(NoCamera, StubDecoder(None));
        let err = scanner.start_camera(Instant::now()).unwrap_err();
        assert!(matches!(err, AccessError::CameraUnavailable(_)));
        assert_eq!(scanner.mode(), ScanMode::File);
    }

    #[test]
    fn mode_switch_drops_pending_frame() {
        let (mut scanner, _) = scanner_with(r#"{"t":"INV","e":"evt_1","g":"g_1"}"#);
        scanner.start_camera(Instant::now()).unwrap();
        scanner.capture();
        assert!(scanner.has_pending_image());
        scanner.set_mode(ScanMode::File);
        assert!(!scanner.has_pending_image());
        assert_eq!(scanner.analyze(), Err(AccessError::NoCodeDetected));
    }

    #[test]
    fn rqrr_finds_nothing_in_a_blank_image() {
        let blank = GrayImage::from_pixel(200, 200, Luma([255u8]));
        assert_eq!(RqrrDecoder.decode(&blank), None);
    }

    #[test]
    fn unreadable_upload_is_no_code_detected() {
        let (mut scanner, _) = scanner_with(r#"{"t":"INV","e":"evt_1","g":"g_1"}"#);
        assert_eq!(scanner.upload(b"not an image"), Err(AccessError::NoCodeDetected));
        assert_eq!(scanner.mode(), ScanMode::File);
    }
}
