//! Geometric decoding of EAST score/geometry maps
//!
//! Cells above the score threshold each restore one rotated rectangle from
//! their RBOX geometry. Neighbouring rectangles are merged row by row
//! (locality-aware), the merged set goes through standard NMS, and each
//! survivor is re-scored by the mean score map value under it.

use std::time::Instant;
use tracing::debug;

use super::geometry::{contains_point, polygon_iou, Point};
use super::{DetectorOutput, Timing, GEOMETRY_CHANNELS};
use crate::error::{Error, Result};

/// Candidate box: 8 corner coordinates (x0, y0, ..., x3, y3) then score
pub type Candidate = [f32; 9];

/// Score/geometry maps rescale by this factor to working-image pixels
const MAP_STRIDE: f32 = 4.0;

/// Turns raw detector maps into ranked candidate boxes
pub trait BoxDecoder: Send + Sync {
    /// Decode candidates in working-image coordinates
    ///
    /// Implementations record `restore` and `nms` in `timing` and leave the
    /// other fields untouched.
    fn decode(&self, maps: &DetectorOutput, timing: &mut Timing) -> Result<Vec<Candidate>>;
}

/// Thresholds for EAST decoding
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    /// Minimum cell score to restore a rectangle from
    pub score_map_thresh: f32,
    /// Minimum mean score under a final box
    pub box_thresh: f32,
    /// IoU above which boxes are merged or suppressed
    pub nms_thresh: f32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            score_map_thresh: 0.8,
            box_thresh: 0.1,
            nms_thresh: 0.2,
        }
    }
}

/// EAST RBOX decoder with locality-aware NMS
#[derive(Debug, Clone, Default)]
pub struct EastDecoder {
    params: DecodeParams,
}

impl EastDecoder {
    pub fn new(params: DecodeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DecodeParams {
        &self.params
    }
}

impl BoxDecoder for EastDecoder {
    fn decode(&self, maps: &DetectorOutput, timing: &mut Timing) -> Result<Vec<Candidate>> {
        let (h, w) = maps.score.dim();
        if maps.geometry.dim() != (h, w, GEOMETRY_CHANNELS) {
            return Err(Error::BoxDecode(format!(
                "geometry map {:?} does not match score map ({}, {})",
                maps.geometry.dim(),
                h,
                w
            )));
        }

        // Restore one rectangle per confident cell, row-major
        let start = Instant::now();
        let mut boxes = Vec::new();
        for ((y, x), &score) in maps.score.indexed_iter() {
            if score <= self.params.score_map_thresh {
                continue;
            }
            let distances = [
                maps.geometry[[y, x, 0]],
                maps.geometry[[y, x, 1]],
                maps.geometry[[y, x, 2]],
                maps.geometry[[y, x, 3]],
            ];
            let angle = maps.geometry[[y, x, 4]];
            let origin = (x as f32 * MAP_STRIDE, y as f32 * MAP_STRIDE);
            boxes.push(to_candidate(&restore_rbox(origin, distances, angle), score));
        }
        timing.restore = start.elapsed().as_secs_f64();

        let start = Instant::now();
        let restored = boxes.len();
        let merged = merge_quadrangles(boxes, self.params.nms_thresh);
        timing.nms = start.elapsed().as_secs_f64();

        debug!("Restored {} rectangles, {} after merge", restored, merged.len());

        // Re-score by the mean map value under each box
        Ok(merged
            .into_iter()
            .filter_map(|mut candidate| {
                candidate[8] = mean_score_under(&maps.score, &candidate);
                (candidate[8] > self.params.box_thresh).then_some(candidate)
            })
            .collect())
    }
}

/// Restore a rotated rectangle from a cell origin, its edge distances
/// (top, right, bottom, left) and rotation angle
pub fn restore_rbox(origin: Point, d: [f32; 4], angle: f32) -> [Point; 4] {
    let [top, right, bottom, left] = d;
    let height = top + bottom;
    let width = right + left;

    // Corners plus the origin's position, relative to the pivot corner
    let p: [Point; 5] = if angle >= 0.0 {
        [
            (0.0, -height),
            (width, -height),
            (width, 0.0),
            (0.0, 0.0),
            (left, -bottom),
        ]
    } else {
        [
            (-width, -height),
            (0.0, -height),
            (0.0, 0.0),
            (-width, 0.0),
            (-right, -bottom),
        ]
    };

    let (sin, cos) = angle.sin_cos();
    let rotate = |(px, py): Point| (cos * px + sin * py, -sin * px + cos * py);
    let rotated = p.map(rotate);

    let shift = (origin.0 - rotated[4].0, origin.1 - rotated[4].1);
    [
        (rotated[0].0 + shift.0, rotated[0].1 + shift.1),
        (rotated[1].0 + shift.0, rotated[1].1 + shift.1),
        (rotated[2].0 + shift.0, rotated[2].1 + shift.1),
        (rotated[3].0 + shift.0, rotated[3].1 + shift.1),
    ]
}

/// Locality-aware merge followed by standard NMS
///
/// Input is expected in row-major cell order so that consecutive boxes are
/// spatial neighbours. Merged boxes carry the sum of their members' scores.
pub fn merge_quadrangles(boxes: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    let mut merged: Vec<Merger> = Vec::new();

    for candidate in boxes {
        match merged.last_mut() {
            Some(last) if polygon_iou(&last.quad(), &quad_of(&candidate)) > iou_threshold => {
                last.add(&candidate);
            }
            _ => merged.push(Merger::new(&candidate)),
        }
    }

    let merged: Vec<Candidate> = merged.iter().map(Merger::get).collect();
    standard_nms(merged, iou_threshold)
}

/// Keep the highest-scoring boxes, suppressing overlaps above `iou_threshold`
pub fn standard_nms(mut boxes: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    boxes.sort_by(|a, b| b[8].total_cmp(&a[8]));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in boxes {
        let quad = quad_of(&candidate);
        let suppressed = kept
            .iter()
            .any(|k| polygon_iou(&quad_of(k), &quad) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Score-weighted average of quadrangles
struct Merger {
    coords: [f32; 8],
    score: f32,
}

impl Merger {
    fn new(candidate: &Candidate) -> Self {
        let mut merger = Self {
            coords: [0.0; 8],
            score: 0.0,
        };
        merger.add(candidate);
        merger
    }

    fn add(&mut self, candidate: &Candidate) {
        let score = candidate[8];
        let aligned = if self.score > 0.0 {
            align_corners(&self.quad(), candidate)
        } else {
            *candidate
        };
        for (acc, v) in self.coords.iter_mut().zip(aligned.iter()) {
            *acc += v * score;
        }
        self.score += score;
    }

    fn quad(&self) -> Vec<Point> {
        quad_of(&self.get())
    }

    fn get(&self) -> Candidate {
        let mut out = [0.0f32; 9];
        if self.score > 0.0 {
            for i in 0..8 {
                out[i] = self.coords[i] / self.score;
            }
        }
        out[8] = self.score;
        out
    }
}

/// Rotate the corner order of `candidate` to best match `reference`
fn align_corners(reference: &[Point], candidate: &Candidate) -> Candidate {
    let quad = quad_of(candidate);
    let mut best_shift = 0;
    let mut best_dist = f32::INFINITY;
    for shift in 0..4 {
        let dist: f32 = (0..4)
            .map(|i| {
                let (rx, ry) = reference[i];
                let (qx, qy) = quad[(i + shift) % 4];
                (rx - qx).powi(2) + (ry - qy).powi(2)
            })
            .sum();
        if dist < best_dist {
            best_dist = dist;
            best_shift = shift;
        }
    }

    let mut out = *candidate;
    for i in 0..4 {
        let (x, y) = quad[(i + best_shift) % 4];
        out[2 * i] = x;
        out[2 * i + 1] = y;
    }
    out
}

/// Mean score map value inside the box, at map resolution
fn mean_score_under(score: &ndarray::Array2<f32>, candidate: &Candidate) -> f32 {
    let (h, w) = score.dim();
    if h == 0 || w == 0 {
        return 0.0;
    }

    // Integer corners scaled down to map cells
    let poly: Vec<Point> = (0..4)
        .map(|i| {
            let x = (candidate[2 * i] as i32).div_euclid(MAP_STRIDE as i32);
            let y = (candidate[2 * i + 1] as i32).div_euclid(MAP_STRIDE as i32);
            (x as f32, y as f32)
        })
        .collect();

    let min_x = poly.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).max(0.0) as usize;
    let min_y = poly.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).max(0.0) as usize;
    let max_x = poly.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = poly.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
    if max_x < 0.0 || max_y < 0.0 {
        return 0.0;
    }
    let max_x = (max_x as usize).min(w - 1);
    let max_y = (max_y as usize).min(h - 1);

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if contains_point(&poly, x as f32, y as f32) {
                sum += score[[y, x]] as f64;
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

fn to_candidate(quad: &[Point; 4], score: f32) -> Candidate {
    let mut out = [0.0f32; 9];
    for (i, (x, y)) in quad.iter().enumerate() {
        out[2 * i] = *x;
        out[2 * i + 1] = *y;
    }
    out[8] = score;
    out
}

fn quad_of(candidate: &Candidate) -> Vec<Point> {
    (0..4)
        .map(|i| (candidate[2 * i], candidate[2 * i + 1]))
        .collect()
}
