//! Planar geometry for quadrangles
//!
//! Polygons are slices of (x, y) points in image coordinates (y grows down).

pub type Point = (f32, f32);

/// Signed shoelace area
pub fn signed_area(poly: &[Point]) -> f32 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for i in 0..poly.len() {
        let (x0, y0) = poly[i];
        let (x1, y1) = poly[(i + 1) % poly.len()];
        sum += x0 * y1 - x1 * y0;
    }
    sum * 0.5
}

pub fn polygon_area(poly: &[Point]) -> f32 {
    signed_area(poly).abs()
}

/// Area of the intersection of `subject` with the convex polygon `clip`
///
/// Sutherland-Hodgman clipping; `clip` may have either winding.
pub fn intersection_area(subject: &[Point], clip: &[Point]) -> f32 {
    if subject.len() < 3 || clip.len() < 3 {
        return 0.0;
    }

    let mut clip: Vec<Point> = clip.to_vec();
    if signed_area(&clip) < 0.0 {
        clip.reverse();
    }

    let mut output: Vec<Point> = subject.to_vec();
    for i in 0..clip.len() {
        if output.is_empty() {
            break;
        }
        let a = clip[i];
        let b = clip[(i + 1) % clip.len()];
        let input = std::mem::take(&mut output);

        for j in 0..input.len() {
            let current = input[j];
            let previous = input[(j + input.len() - 1) % input.len()];
            let current_inside = cross(a, b, current) >= 0.0;
            let previous_inside = cross(a, b, previous) >= 0.0;

            if current_inside {
                if !previous_inside {
                    if let Some(p) = line_intersection(previous, current, a, b) {
                        output.push(p);
                    }
                }
                output.push(current);
            } else if previous_inside {
                if let Some(p) = line_intersection(previous, current, a, b) {
                    output.push(p);
                }
            }
        }
    }

    polygon_area(&output)
}

/// Intersection over union of two quadrangles
pub fn polygon_iou(a: &[Point], b: &[Point]) -> f32 {
    let inter = intersection_area(a, b);
    let union = polygon_area(a) + polygon_area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Whether (x, y) lies inside the polygon or on its boundary
pub fn contains_point(poly: &[Point], x: f32, y: f32) -> bool {
    let n = poly.len();
    if n == 0 {
        return false;
    }

    let mut inside = false;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];

        if on_segment(a, b, (x, y)) {
            return true;
        }

        if (a.1 > y) != (b.1 > y) {
            let x_cross = a.0 + (y - a.1) * (b.0 - a.0) / (b.1 - a.1);
            if x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Reorder corners so the one with the smallest x + y comes first and the
/// first edge runs along the longer image axis
pub fn sort_poly(p: [[i32; 2]; 4]) -> [[i32; 2]; 4] {
    let mut min_axis = 0;
    for i in 1..4 {
        if p[i][0] + p[i][1] < p[min_axis][0] + p[min_axis][1] {
            min_axis = i;
        }
    }

    let p = [
        p[min_axis],
        p[(min_axis + 1) % 4],
        p[(min_axis + 2) % 4],
        p[(min_axis + 3) % 4],
    ];

    if (p[0][0] - p[1][0]).abs() > (p[0][1] - p[1][1]).abs() {
        p
    } else {
        [p[0], p[3], p[2], p[1]]
    }
}

/// Euclidean distance between integer corners
pub fn corner_distance(a: [i32; 2], b: [i32; 2]) -> f32 {
    let dx = (a[0] - b[0]) as f32;
    let dy = (a[1] - b[1]) as f32;
    (dx * dx + dy * dy).sqrt()
}

/// Z component of (b - a) x (p - a)
fn cross(a: Point, b: Point, p: Point) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    const EPS: f32 = 1e-4;
    if cross(a, b, p).abs() > EPS {
        return false;
    }
    p.0 >= a.0.min(b.0) - EPS
        && p.0 <= a.0.max(b.0) + EPS
        && p.1 >= a.1.min(b.1) - EPS
        && p.1 <= a.1.max(b.1) + EPS
}

/// Intersection of segment p-q with the infinite line through a-b
fn line_intersection(p: Point, q: Point, a: Point, b: Point) -> Option<Point> {
    let denom = (q.0 - p.0) * (b.1 - a.1) - (q.1 - p.1) * (b.0 - a.0);
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let t = ((a.0 - p.0) * (b.1 - a.1) - (a.1 - p.1) * (b.0 - a.0)) / denom;
    Some((p.0 + t * (q.0 - p.0), p.1 + t * (q.1 - p.1)))
}
