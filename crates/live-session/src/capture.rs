//! Microphone capture and outbound frame encoding.

use crate::audio::{self, CAPTURE_MIME_TYPE};
use crate::error::CaptureError;
use async_trait::async_trait;
use gemini_live::types::Blob;
use tokio::sync::mpsc;

/// Releases the underlying device when dropped or asked to.
pub trait CaptureHandle: Send {
    fn release(&mut self);
}

/// An acquired microphone: fixed-size mono frames at 16 kHz, plus the handle
/// that stops the device.
pub struct MicStream {
    frames: mpsc::Receiver<Vec<f32>>,
    handle: Box<dyn CaptureHandle>,
    released: bool,
}

impl MicStream {
    pub fn new(frames: mpsc::Receiver<Vec<f32>>, handle: Box<dyn CaptureHandle>) -> Self {
        Self {
            frames,
            handle,
            released: false,
        }
    }

    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    /// Stops the device. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.frames.close();
        self.handle.release();
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Source of microphone streams. `acquire` may wait on a permission prompt.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn acquire(&self, frame_size: usize) -> Result<MicStream, CaptureError>;
}

/// Owns the live microphone of one connection and turns its frames into
/// outbound audio blobs.
pub struct AudioCaptureEncoder {
    stream: Option<MicStream>,
    frames_sent: u64,
    frames_dropped: u64,
}

impl Default for AudioCaptureEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCaptureEncoder {
    pub fn new() -> Self {
        Self {
            stream: None,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// Takes ownership of an acquired stream, releasing any previous one.
    pub fn attach(&mut self, stream: MicStream) {
        self.stop();
        self.stream = Some(stream);
    }

    #[cfg(test)]
    pub fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// The next captured frame. Pending forever while nothing is attached;
    /// `None` means the device went away.
    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        match self.stream.as_mut() {
            Some(stream) => stream.next_frame().await,
            None => std::future::pending().await,
        }
    }

    /// Encodes one frame for the wire, or drops it while muted or while the
    /// stream is not open.
    pub fn encode(&mut self, samples: &[f32], muted: bool, open: bool) -> Option<Blob> {
        if muted || !open || samples.is_empty() {
            self.frames_dropped += 1;
            return None;
        }
        self.frames_sent += 1;
        Some(Blob {
            mime_type: CAPTURE_MIME_TYPE.to_string(),
            data: audio::encode_pcm16_base64(samples),
        })
    }

    /// Releases the microphone. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            tracing::debug!(
                sent = self.frames_sent,
                dropped = self.frames_dropped,
                "Microphone released"
            );
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct ReleaseTracker {
        pub released: AtomicBool,
        pub release_calls: AtomicUsize,
    }

    impl ReleaseTracker {
        pub fn is_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }
    }

    pub struct TrackedHandle(pub Arc<ReleaseTracker>);

    impl CaptureHandle for TrackedHandle {
        fn release(&mut self) {
            self.0.released.store(true, Ordering::SeqCst);
            self.0.release_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn tracked_stream() -> (MicStream, mpsc::Sender<Vec<f32>>, Arc<ReleaseTracker>) {
        let tracker = Arc::new(ReleaseTracker::default());
        let (tx, rx) = mpsc::channel(16);
        let stream = MicStream::new(rx, Box::new(TrackedHandle(tracker.clone())));
        (stream, tx, tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::tracked_stream;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_encode_drops_when_muted_or_closed() {
        let mut encoder = AudioCaptureEncoder::new();
        assert!(encoder.encode(&[0.1; 8], true, true).is_none());
        assert!(encoder.encode(&[0.1; 8], false, false).is_none());
        assert_eq!(encoder.frames_dropped(), 2);

        let blob = encoder.encode(&[0.5; 8], false, true).unwrap();
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert_eq!(encoder.frames_sent(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut stream, _tx, tracker) = tracked_stream();
        stream.release();
        stream.release();
        drop(stream);
        assert!(tracker.is_released());
        assert_eq!(tracker.release_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_stream_releases_device() {
        let (stream, _tx, tracker) = tracked_stream();
        drop(stream);
        assert!(tracker.is_released());
    }

    #[tokio::test]
    async fn test_attach_and_stop() {
        let mut encoder = AudioCaptureEncoder::new();
        let (stream, tx, tracker) = tracked_stream();
        encoder.attach(stream);
        assert!(encoder.is_capturing());

        tx.send(vec![0.25; 4]).await.unwrap();
        assert_eq!(encoder.next_frame().await, Some(vec![0.25; 4]));

        encoder.stop();
        encoder.stop();
        assert!(!encoder.is_capturing());
        assert!(tracker.is_released());
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_stream() {
        let mut encoder = AudioCaptureEncoder::new();
        let (first, _tx1, first_tracker) = tracked_stream();
        let (second, _tx2, second_tracker) = tracked_stream();
        encoder.attach(first);
        encoder.attach(second);
        assert!(first_tracker.is_released());
        assert!(!second_tracker.is_released());
    }

    #[tokio::test]
    async fn test_device_loss_yields_none() {
        let mut encoder = AudioCaptureEncoder::new();
        let (stream, tx, _tracker) = tracked_stream();
        encoder.attach(stream);
        drop(tx);
        assert_eq!(encoder.next_frame().await, None);
    }
}
