//! Capture sessions: read frames until a condition is met.
//!
//! A session moves `Idle → Detecting → {Captured, TimedOut, Cancelled, Exhausted}`.
//! Each [`CaptureSession::step`] reads at most one frame. The timeout is
//! optional; without one the session keeps reading until the source ends or
//! the token is cancelled.

use crate::embedder::{EmbedError, FaceEmbedder};
use crate::matcher::Matcher;
use crate::source::{FrameSource, SourceError};
use crate::types::{BoundingBox, DetectedFace, FaceRecord, Identity};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame source: {0}")]
    Source(#[from] SourceError),
    #[error("embedding: {0}")]
    Embed(#[from] EmbedError),
}

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState<T> {
    Idle,
    Detecting { frames_seen: usize },
    Captured(T),
    TimedOut,
    Cancelled,
    /// The source ran out of frames (or the device is gone).
    Exhausted,
}

impl<T> CaptureState<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaptureState::Idle | CaptureState::Detecting { .. })
    }
}

pub struct CaptureSession<T> {
    state: CaptureState<T>,
    timeout: Option<Duration>,
    cancel: CancelToken,
    started: Option<Instant>,
    frames_seen: usize,
}

impl<T> CaptureSession<T> {
    pub fn new(timeout: Option<Duration>, cancel: CancelToken) -> Self {
        Self {
            state: CaptureState::Idle,
            timeout,
            cancel,
            started: None,
            frames_seen: 0,
        }
    }

    pub fn state(&self) -> &CaptureState<T> {
        &self.state
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// Advance by at most one frame. `accept` sees the frame index and the
    /// faces found in it; returning `Some` ends the session as `Captured`.
    pub fn step<S, E, F>(
        &mut self,
        source: &mut S,
        embedder: &mut E,
        accept: &mut F,
    ) -> Result<&CaptureState<T>, CaptureError>
    where
        S: FrameSource + ?Sized,
        E: FaceEmbedder + ?Sized,
        F: FnMut(usize, &[DetectedFace]) -> Option<T>,
    {
        if self.state.is_terminal() {
            return Ok(&self.state);
        }
        if self.cancel.is_cancelled() {
            self.state = CaptureState::Cancelled;
            return Ok(&self.state);
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        if matches!(self.state, CaptureState::Idle) {
            tracing::debug!(timeout = ?self.timeout, "capture session detecting");
            self.state = CaptureState::Detecting { frames_seen: 0 };
        }
        if self.timeout.is_some_and(|t| started.elapsed() >= t) {
            tracing::info!(frames = self.frames_seen, "capture session timed out");
            self.state = CaptureState::TimedOut;
            return Ok(&self.state);
        }

        let Some(frame) = source.next_frame()? else {
            tracing::debug!(frames = self.frames_seen, "frame source exhausted");
            self.state = CaptureState::Exhausted;
            return Ok(&self.state);
        };

        let index = self.frames_seen;
        self.frames_seen += 1;
        let faces = embedder.embed(&frame)?;
        tracing::trace!(frame = index, faces = faces.len(), "frame processed");

        self.state = match accept(index, &faces) {
            Some(value) => CaptureState::Captured(value),
            None => CaptureState::Detecting { frames_seen: self.frames_seen },
        };
        Ok(&self.state)
    }

    /// Step until the session reaches a terminal state and return it.
    pub fn run<S, E, F>(
        &mut self,
        source: &mut S,
        embedder: &mut E,
        mut accept: F,
    ) -> Result<CaptureState<T>, CaptureError>
    where
        S: FrameSource + ?Sized,
        E: FaceEmbedder + ?Sized,
        F: FnMut(usize, &[DetectedFace]) -> Option<T>,
    {
        while !self.step(source, embedder, &mut accept)?.is_terminal() {}
        Ok(std::mem::replace(
            &mut self.state,
            CaptureState::Detecting { frames_seen: self.frames_seen },
        ))
    }
}

/// Registration: the first face of the first frame that has one.
pub fn capture_face<S, E>(
    session: &mut CaptureSession<DetectedFace>,
    source: &mut S,
    embedder: &mut E,
) -> Result<CaptureState<DetectedFace>, CaptureError>
where
    S: FrameSource + ?Sized,
    E: FaceEmbedder + ?Sized,
{
    session.run(source, embedder, |_, faces| faces.first().cloned())
}

/// A successful verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verified {
    pub name: String,
    pub frame: usize,
    pub distance: f64,
}

/// Verification: the first face, in frame then detection order, that the
/// matcher identifies.
pub fn verify<S, E>(
    session: &mut CaptureSession<Verified>,
    source: &mut S,
    embedder: &mut E,
    matcher: &dyn Matcher,
    gallery: &[FaceRecord],
) -> Result<CaptureState<Verified>, CaptureError>
where
    S: FrameSource + ?Sized,
    E: FaceEmbedder + ?Sized,
{
    session.run(source, embedder, |frame, faces| {
        faces
            .iter()
            .find_map(|face| match matcher.identify(&face.embedding, gallery) {
                Identity::Known { name, distance, .. } => Some(Verified { name, frame, distance }),
                Identity::Unknown => None,
            })
    })
}

/// One labelled face in live recognition.
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub bbox: BoundingBox,
    pub identity: Identity,
}

/// Live recognition: label every face of every frame until the session
/// stops. `sink` receives each frame's labels.
pub fn recognize<S, E, K>(
    session: &mut CaptureSession<()>,
    source: &mut S,
    embedder: &mut E,
    matcher: &dyn Matcher,
    gallery: &[FaceRecord],
    mut sink: K,
) -> Result<CaptureState<()>, CaptureError>
where
    S: FrameSource + ?Sized,
    E: FaceEmbedder + ?Sized,
    K: FnMut(usize, &[Recognition]),
{
    session.run(source, embedder, |frame, faces| {
        let labels: Vec<Recognition> = faces
            .iter()
            .map(|face| Recognition {
                bbox: face.bbox.clone(),
                identity: matcher.identify(&face.embedding, gallery),
            })
            .collect();
        sink(frame, &labels);
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::FirstMatchMatcher;
    use crate::types::Embedding;
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;

    /// Encodes faces in the frame's first pixel: red = number of faces,
    /// green = embedding value of each face.
    struct PixelEmbedder {
        calls: usize,
    }

    impl FaceEmbedder for PixelEmbedder {
        fn embed(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, EmbedError> {
            self.calls += 1;
            let Rgb([count, value, _]) = *frame.get_pixel(0, 0);
            Ok((0..count)
                .map(|i| DetectedFace {
                    bbox: BoundingBox {
                        x: i as f32 * 10.0,
                        y: 0.0,
                        width: 10.0,
                        height: 10.0,
                        confidence: 0.9,
                        landmarks: None,
                    },
                    embedding: Embedding::new(vec![value as f64 + i as f64 * 100.0, 0.0]),
                })
                .collect())
        }
    }

    fn frame(faces: u8, value: u8) -> RgbImage {
        RgbImage::from_pixel(2, 2, Rgb([faces, value, 0]))
    }

    fn frames(pixels: &[(u8, u8)]) -> VecDeque<RgbImage> {
        pixels.iter().map(|&(f, v)| frame(f, v)).collect()
    }

    fn gallery() -> Vec<FaceRecord> {
        vec![FaceRecord {
            name: "ada".into(),
            embedding: Embedding::new(vec![5.0, 0.0]),
            registered_at: "2024-05-01T14:05:00.000000".into(),
        }]
    }

    #[test]
    fn test_capture_waits_for_first_face() {
        let mut source = frames(&[(0, 0), (0, 0), (2, 7), (1, 9)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let mut session = CaptureSession::new(None, CancelToken::new());

        let state = capture_face(&mut session, &mut source, &mut embedder).unwrap();
        match state {
            CaptureState::Captured(face) => assert_eq!(face.embedding.values[0], 7.0),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(session.frames_seen(), 3);
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_capture_exhausted_without_face() {
        let mut source = frames(&[(0, 0), (0, 0)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let mut session = CaptureSession::new(None, CancelToken::new());
        let state = capture_face(&mut session, &mut source, &mut embedder).unwrap();
        assert_eq!(state, CaptureState::Exhausted);
        assert_eq!(session.frames_seen(), 2);
    }

    #[test]
    fn test_capture_zero_timeout() {
        let mut source = frames(&[(1, 1)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let mut session = CaptureSession::new(Some(Duration::ZERO), CancelToken::new());
        let state = capture_face(&mut session, &mut source, &mut embedder).unwrap();
        assert_eq!(state, CaptureState::TimedOut);
        assert_eq!(embedder.calls, 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.clone().cancel();
        let mut source = frames(&[(1, 1)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let mut session = CaptureSession::new(None, token);
        let state = capture_face(&mut session, &mut source, &mut embedder).unwrap();
        assert_eq!(state, CaptureState::Cancelled);
    }

    #[test]
    fn test_cancel_mid_session() {
        let token = CancelToken::new();
        let mut source = frames(&[(0, 0), (0, 0), (1, 1)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let mut session: CaptureSession<DetectedFace> = CaptureSession::new(None, token.clone());
        let mut accept = |_: usize, faces: &[DetectedFace]| faces.first().cloned();

        let state = session.step(&mut source, &mut embedder, &mut accept).unwrap();
        assert_eq!(*state, CaptureState::Detecting { frames_seen: 1 });
        token.cancel();
        let state = session.step(&mut source, &mut embedder, &mut accept).unwrap();
        assert_eq!(*state, CaptureState::Cancelled);
        assert_eq!(embedder.calls, 1);
    }

    #[test]
    fn test_step_after_terminal_is_noop() {
        let mut source: VecDeque<RgbImage> = VecDeque::new();
        let mut embedder = PixelEmbedder { calls: 0 };
        let mut session: CaptureSession<()> = CaptureSession::new(None, CancelToken::new());
        let mut accept = |_: usize, _: &[DetectedFace]| None;
        assert_eq!(*session.step(&mut source, &mut embedder, &mut accept).unwrap(), CaptureState::Exhausted);
        assert_eq!(*session.step(&mut source, &mut embedder, &mut accept).unwrap(), CaptureState::Exhausted);
    }

    #[test]
    fn test_verify_finds_known_face() {
        // Frame 0: stranger; frame 1: stranger then ada.
        let mut source = frames(&[(1, 200), (2, 250)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let matcher = FirstMatchMatcher { tolerance: 0.6 };
        let mut session = CaptureSession::new(None, CancelToken::new());

        // Second face of frame 1 has value 250 + 100; adjust gallery to match it.
        let mut gallery = gallery();
        gallery[0].embedding = Embedding::new(vec![350.0, 0.0]);

        let state = verify(&mut session, &mut source, &mut embedder, &matcher, &gallery).unwrap();
        match state {
            CaptureState::Captured(v) => {
                assert_eq!(v.name, "ada");
                assert_eq!(v.frame, 1);
                assert_eq!(v.distance, 0.0);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_verify_no_known_face() {
        let mut source = frames(&[(1, 100), (0, 0)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let matcher = FirstMatchMatcher { tolerance: 0.6 };
        let mut session = CaptureSession::new(None, CancelToken::new());
        let state = verify(&mut session, &mut source, &mut embedder, &matcher, &gallery()).unwrap();
        assert_eq!(state, CaptureState::Exhausted);
    }

    #[test]
    fn test_verify_empty_gallery() {
        let mut source = frames(&[(1, 5)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let matcher = FirstMatchMatcher::default();
        let mut session = CaptureSession::new(None, CancelToken::new());
        let state = verify(&mut session, &mut source, &mut embedder, &matcher, &[]).unwrap();
        assert_eq!(state, CaptureState::Exhausted);
    }

    #[test]
    fn test_recognize_labels_every_frame() {
        let mut source = frames(&[(1, 5), (0, 0), (2, 5)]);
        let mut embedder = PixelEmbedder { calls: 0 };
        let matcher = FirstMatchMatcher { tolerance: 0.6 };
        let mut session = CaptureSession::new(None, CancelToken::new());
        let mut seen: Vec<(usize, Vec<String>)> = Vec::new();

        let state = recognize(&mut session, &mut source, &mut embedder, &matcher, &gallery(), |i, labels| {
            seen.push((i, labels.iter().map(|r| r.identity.to_string()).collect()));
        })
        .unwrap();

        assert_eq!(state, CaptureState::Exhausted);
        assert_eq!(
            seen,
            vec![
                (0, vec!["ada".to_string()]),
                (1, vec![]),
                (2, vec!["ada".to_string(), "Unknown".to_string()]),
            ]
        );
    }
}
