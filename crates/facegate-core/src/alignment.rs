//! Five-point face alignment.
//!
//! Fits a least-squares similarity transform (scale, rotation, translation)
//! from detected landmarks to the ArcFace reference layout and warps the face
//! into a 112×112 RGB crop.

use image::{Rgb, RgbImage};

pub const ALIGNED_SIZE: u32 = 112;

/// InsightFace reference landmarks for a 112×112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Similarity transform `p' = [[a, -b], [b, a]] · p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse mapping, or `None` for a degenerate (zero-scale) transform.
    pub fn inverse(&self) -> Option<Similarity> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Similarity {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }

    /// Closed-form least-squares fit mapping `src` onto `dst`.
    ///
    /// Returns `None` when the source points are all coincident.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Similarity> {
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut spread = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - scx, sy - scy);
            let (dx, dy) = (dx - dcx, dy - dcy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            spread += sx * sx + sy * sy;
        }
        if spread < 1e-9 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Similarity {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        })
    }
}

/// Bilinear sample with black outside the frame.
fn sample(frame: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (w, h) = (frame.width() as i64, frame.height() as i64);

    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi < 0 || yi < 0 || xi >= w || yi >= h {
            return [0.0; 3];
        }
        let Rgb(p) = *frame.get_pixel(xi as u32, yi as u32);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let (xi, yi) = (x0 as i64, y0 as i64);
    let tl = px(xi, yi);
    let tr = px(xi + 1, yi);
    let bl = px(xi, yi + 1);
    let br = px(xi + 1, yi + 1);

    std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

/// Warp `frame` through `transform` into a square crop of side `size`.
pub fn warp(frame: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    let Some(inverse) = transform.inverse() else {
        return RgbImage::new(size, size);
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        let (sx, sy) = inverse.apply((ox as f32, oy as f32));
        let v = sample(frame, sx, sy);
        Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
    })
}

/// Align a detected face to the canonical 112×112 ArcFace crop.
///
/// `None` when the landmarks are degenerate (collapsed to a point).
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS)?;
    Some(warp(frame, &transform, ALIGNED_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn test_estimate_identity() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_estimate_recovers_scale_and_shift() {
        // Landmarks at twice the reference scale, shifted by (100, 50).
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0 + 100.0, y * 2.0 + 50.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 0.5).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4);
        for (s, d) in src.iter().zip(REFERENCE_LANDMARKS.iter()) {
            assert!(close(t.apply(*s), *d));
        }
    }

    #[test]
    fn test_estimate_recovers_rotation() {
        // 90° rotation: (x, y) -> (-y, x)
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (y, -x));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!(t.a.abs() < 1e-4);
        assert!((t.b - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_estimate_degenerate() {
        let src = [(5.0, 5.0); 5];
        assert!(Similarity::estimate(&src, &REFERENCE_LANDMARKS).is_none());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -4.0 };
        let inv = t.inverse().unwrap();
        let p = (17.0, 42.0);
        assert!(close(inv.apply(t.apply(p)), p));
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(200, 200, Rgb([90, 120, 150]));
        let landmarks = REFERENCE_LANDMARKS.map(|(x, y)| (x + 40.0, y + 40.0));
        let crop = align_face(&frame, &landmarks).unwrap();
        assert_eq!(crop.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        // The crop lies entirely inside a uniform frame.
        assert_eq!(*crop.get_pixel(56, 56), Rgb([90, 120, 150]));
    }

    #[test]
    fn test_align_face_degenerate_landmarks() {
        let frame = RgbImage::from_pixel(200, 200, Rgb([90, 120, 150]));
        assert!(align_face(&frame, &[(60.0, 60.0); 5]).is_none());
    }

    #[test]
    fn test_warp_outside_frame_is_black() {
        let frame = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let shift = Similarity { a: 1.0, b: 0.0, tx: 500.0, ty: 500.0 };
        let crop = warp(&frame, &shift, 8);
        assert!(crop.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
