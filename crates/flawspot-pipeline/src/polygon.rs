//! Closed-polygon measurements for outline analysis.
//!
//! Everything here works on a closed outline given as a point sequence
//! (the last point implicitly connects back to the first): shoelace
//! area, perimeter, Ramer-Douglas-Peucker simplification, convex hull,
//! convexity-defect counting, and Hu-moment shape matching, all on plain
//! [`Point`] slices.

use crate::types::Point;

/// Unsigned polygon area (shoelace formula).
#[must_use]
pub fn area(points: &[Point]) -> f64 {
    signed_area(points).abs()
}

fn signed_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let sum: f64 = edges(points).map(|(a, b)| a.x.mul_add(b.y, -(b.x * a.y))).sum();
    sum / 2.0
}

/// Length of the closed outline.
#[must_use]
pub fn perimeter(points: &[Point]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    edges(points).map(|(a, b)| a.distance(b)).sum()
}

/// Consecutive point pairs including the closing edge.
fn edges(points: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(&a, &b)| (a, b))
}

/// Simplify a closed outline using the Ramer-Douglas-Peucker algorithm.
///
/// The outline is split at the first point and the point farthest from
/// it, and each half is simplified as an open polyline. Points within
/// `tolerance` pixels of the chord between kept neighbours are removed.
///
/// Outlines with fewer than 3 points are returned unchanged.
#[must_use = "returns the simplified outline"]
pub fn simplify_closed(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let split = points
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|(_, a), (_, b)| {
            a.distance_squared(points[0])
                .total_cmp(&b.distance_squared(points[0]))
        })
        .map_or(points.len() / 2, |(i, _)| i);

    // Close the loop so the second half ends back at the start point.
    let mut closed = points.to_vec();
    closed.push(points[0]);
    let end = closed.len() - 1;

    let mut kept = vec![false; closed.len()];
    kept[0] = true;
    kept[split] = true;
    rdp_recurse(&closed, 0, split, tolerance, &mut kept);
    rdp_recurse(&closed, split, end, tolerance, &mut kept);

    closed[..end]
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect()
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
///
/// Finds the point between `start` and `end` that is farthest from the
/// line segment between them. If that distance exceeds `tolerance`, the
/// point is kept and both sub-segments are processed recursively.
fn rdp_recurse(points: &[Point], start: usize, end: usize, tolerance: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = perpendicular_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > tolerance {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, tolerance, kept);
        rdp_recurse(points, max_idx, end, tolerance, kept);
    }
}

/// Perpendicular distance from point `p` to the line defined by `a` and `b`.
///
/// When `a` and `b` coincide, returns the distance from `p` to `a`.
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x).mul_add(b.y - o.y, -((a.y - o.y) * (b.x - o.x)))
}

/// Indices of the convex hull vertices, in ascending index order.
///
/// Collinear points on hull edges are excluded.
#[must_use]
pub fn convex_hull_indices(points: &[Point]) -> Vec<usize> {
    if points.len() < 3 {
        return (0..points.len()).collect();
    }

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&i, &j| {
        points[i]
            .x
            .total_cmp(&points[j].x)
            .then(points[i].y.total_cmp(&points[j].y))
    });
    order.dedup_by(|a, b| points[*a] == points[*b]);

    // Andrew's monotone chain.
    let reversed: Vec<usize> = order.iter().rev().copied().collect();
    let mut hull: Vec<usize> = Vec::with_capacity(order.len() * 2);
    for pass in [&order[..], &reversed[..]] {
        let floor = hull.len();
        for &i in pass {
            while hull.len() >= floor + 2
                && cross(points[hull[hull.len() - 2]], points[hull[hull.len() - 1]], points[i])
                    <= 0.0
            {
                hull.pop();
            }
            hull.push(i);
        }
        hull.pop();
    }

    hull.sort_unstable();
    hull.dedup();
    hull
}

/// Number of concavities deeper than `min_depth` pixels.
///
/// A concavity is a run of outline points between two consecutive hull
/// vertices; its depth is the largest distance of those points from the
/// hull edge.
#[must_use]
pub fn convexity_defects(points: &[Point], min_depth: f64) -> usize {
    let hull = convex_hull_indices(points);
    if hull.len() < 3 {
        return 0;
    }
    let n = points.len();
    let mut count = 0;
    for (k, &start) in hull.iter().enumerate() {
        let end = hull[(k + 1) % hull.len()];
        let span = (end + n - start) % n;
        let depth = (1..span)
            .map(|offset| {
                perpendicular_distance(points[(start + offset) % n], points[start], points[end])
            })
            .fold(0.0_f64, f64::max);
        if depth >= min_depth {
            count += 1;
        }
    }
    count
}

/// The seven Hu invariant moments of the polygon.
///
/// Raw moments are integrated over the polygon with Green's theorem, so
/// the outline alone is enough.
#[must_use]
#[allow(clippy::suboptimal_flops)]
pub fn hu_moments(points: &[Point]) -> [f64; 7] {
    let Some(m) = RawMoments::of(points) else {
        return [0.0; 7];
    };

    let xc = m.m10 / m.m00;
    let yc = m.m01 / m.m00;

    let mu20 = xc.mul_add(-m.m10, m.m20);
    let mu02 = yc.mul_add(-m.m01, m.m02);
    let mu11 = xc.mul_add(-m.m01, m.m11);
    let mu30 = m.m30 - 3.0 * xc * m.m20 + 2.0 * xc * xc * m.m10;
    let mu03 = m.m03 - 3.0 * yc * m.m02 + 2.0 * yc * yc * m.m01;
    let mu21 = m.m21 - 2.0 * xc * m.m11 - yc * m.m20 + 2.0 * xc * xc * m.m01;
    let mu12 = m.m12 - 2.0 * yc * m.m11 - xc * m.m02 + 2.0 * yc * yc * m.m10;

    let s2 = m.m00.powi(2);
    let s3 = m.m00.powf(2.5);
    let (n20, n02, n11) = (mu20 / s2, mu02 / s2, mu11 / s2);
    let (n30, n03, n21, n12) = (mu30 / s3, mu03 / s3, mu21 / s3, mu12 / s3);

    let t0 = n30 + n12;
    let t1 = n21 + n03;
    let q0 = t0 * t0;
    let q1 = t1 * t1;
    let n4 = 4.0 * n11;
    let s = n20 + n02;
    let d = n20 - n02;
    let a = n30 - 3.0 * n12;
    let b = 3.0 * n21 - n03;

    [
        s,
        d.mul_add(d, n4 * n11),
        a.mul_add(a, b * b),
        q0 + q1,
        a * t0 * (q0 - 3.0 * q1) + b * t1 * (3.0 * q0 - q1),
        d * (q0 - q1) + n4 * t0 * t1,
        b * t0 * (q0 - 3.0 * q1) - a * t1 * (3.0 * q0 - q1),
    ]
}

/// Log-scaled Hu-moment distance between two outlines.
///
/// Sums `|m_a - m_b|` over the invariants where `m = sign(h) * log10|h|`,
/// skipping invariants that are negligible in either shape. Zero means
/// identical shape up to translation, scale, and rotation.
#[must_use]
pub fn match_shapes(a: &[Point], b: &[Point]) -> f64 {
    const EPS: f64 = 1e-5;
    let ha = hu_moments(a);
    let hb = hu_moments(b);
    ha.iter()
        .zip(&hb)
        .filter(|&(x, y)| x.abs() > EPS && y.abs() > EPS)
        .map(|(x, y)| (x.signum() * x.abs().log10() - y.signum() * y.abs().log10()).abs())
        .sum()
}

/// Polygon moments up to third order.
struct RawMoments {
    m00: f64,
    m10: f64,
    m01: f64,
    m20: f64,
    m11: f64,
    m02: f64,
    m30: f64,
    m21: f64,
    m12: f64,
    m03: f64,
}

impl RawMoments {
    #[allow(clippy::suboptimal_flops)]
    fn of(points: &[Point]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let mut m = Self {
            m00: 0.0,
            m10: 0.0,
            m01: 0.0,
            m20: 0.0,
            m11: 0.0,
            m02: 0.0,
            m30: 0.0,
            m21: 0.0,
            m12: 0.0,
            m03: 0.0,
        };
        for (p, q) in edges(points) {
            let (x0, y0, x1, y1) = (p.x, p.y, q.x, q.y);
            let a = x0 * y1 - x1 * y0;
            m.m00 += a;
            m.m10 += a * (x0 + x1);
            m.m01 += a * (y0 + y1);
            m.m20 += a * (x0 * x0 + x0 * x1 + x1 * x1);
            m.m02 += a * (y0 * y0 + y0 * y1 + y1 * y1);
            m.m11 += a * (x0 * y1 + 2.0 * x0 * y0 + 2.0 * x1 * y1 + x1 * y0);
            m.m30 += a * (x0 * x0 * x0 + x0 * x0 * x1 + x0 * x1 * x1 + x1 * x1 * x1);
            m.m03 += a * (y0 * y0 * y0 + y0 * y0 * y1 + y0 * y1 * y1 + y1 * y1 * y1);
            m.m21 += a
                * (x0 * x0 * (3.0 * y0 + y1) + 2.0 * x0 * x1 * (y0 + y1) + x1 * x1 * (y0 + 3.0 * y1));
            m.m12 += a
                * (y0 * y0 * (3.0 * x0 + x1) + 2.0 * y0 * y1 * (x0 + x1) + y1 * y1 * (x0 + 3.0 * x1));
        }
        // Orientation-independent: flip everything for clockwise outlines.
        let sign = if m.m00 < 0.0 { -1.0 } else { 1.0 };
        m.m00 *= sign / 2.0;
        m.m10 *= sign / 6.0;
        m.m01 *= sign / 6.0;
        m.m20 *= sign / 12.0;
        m.m02 *= sign / 12.0;
        m.m11 *= sign / 24.0;
        m.m30 *= sign / 20.0;
        m.m03 *= sign / 20.0;
        m.m21 *= sign / 60.0;
        m.m12 *= sign / 60.0;
        (m.m00 > 0.0).then_some(m)
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use approx::assert_relative_eq;

    use super::*;

    fn square(side: f64) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(side, 0.0),
            Point::new(side, side),
            Point::new(0.0, side),
        ]
    }

    fn circle(radius: f64, n: usize) -> Vec<Point> {
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = 2.0 * PI * i as f64 / n as f64;
                Point::new(100.0 + radius * t.cos(), 100.0 + radius * t.sin())
            })
            .collect()
    }

    /// Star with `teeth` outer tips.
    fn star(teeth: usize, outer: f64, inner: f64) -> Vec<Point> {
        (0..teeth * 2)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = PI * i as f64 / teeth as f64;
                let r = if i % 2 == 0 { outer } else { inner };
                Point::new(200.0 + r * t.cos(), 200.0 + r * t.sin())
            })
            .collect()
    }

    #[test]
    fn square_area_and_perimeter() {
        assert_relative_eq!(area(&square(10.0)), 100.0);
        assert_relative_eq!(perimeter(&square(10.0)), 40.0);
    }

    #[test]
    fn area_ignores_orientation() {
        let mut pts = square(10.0);
        pts.reverse();
        assert_relative_eq!(area(&pts), 100.0);
    }

    #[test]
    fn degenerate_outlines() {
        assert_relative_eq!(area(&[]), 0.0);
        assert_relative_eq!(perimeter(&[Point::new(1.0, 1.0)]), 0.0);
        assert_eq!(simplify_closed(&[Point::new(1.0, 1.0)], 1.0).len(), 1);
    }

    #[test]
    fn simplify_dense_square_to_corners() {
        let mut pts = Vec::new();
        for i in 0..10 {
            pts.push(Point::new(f64::from(i), 0.0));
        }
        for i in 0..10 {
            pts.push(Point::new(10.0, f64::from(i)));
        }
        for i in 0..10 {
            pts.push(Point::new(10.0 - f64::from(i), 10.0));
        }
        for i in 0..10 {
            pts.push(Point::new(0.0, 10.0 - f64::from(i)));
        }
        let simplified = simplify_closed(&pts, 0.5);
        assert_eq!(simplified.len(), 4);
    }

    #[test]
    fn circle_keeps_many_vertices() {
        let pts = circle(100.0, 720);
        let p = perimeter(&pts);
        let fine = simplify_closed(&pts, 0.006 * p);
        let coarse = simplify_closed(&pts, 0.015 * p);
        assert!(fine.len() >= 8, "fine approximation has {}", fine.len());
        assert!(coarse.len() < fine.len());
    }

    #[test]
    fn hull_of_square_with_inner_point() {
        let mut pts = square(10.0);
        pts.insert(2, Point::new(5.0, 5.0));
        assert_eq!(convex_hull_indices(&pts), vec![0, 1, 3, 4]);
    }

    #[test]
    fn convex_shapes_have_no_defects() {
        assert_eq!(convexity_defects(&square(50.0), 1.0), 0);
        assert_eq!(convexity_defects(&circle(80.0, 64), 1.0), 0);
    }

    #[test]
    fn star_has_one_defect_per_tooth() {
        assert_eq!(convexity_defects(&star(10, 100.0, 60.0), 1.0), 10);
        let mut reversed = star(10, 100.0, 60.0);
        reversed.reverse();
        assert_eq!(convexity_defects(&reversed, 1.0), 10);
    }

    #[test]
    fn shallow_dents_are_ignored() {
        assert_eq!(convexity_defects(&star(10, 100.0, 99.95), 1.0), 0);
    }

    #[test]
    fn hu_moments_of_square_match_closed_form() {
        // Square: eta20 = eta02 = 1/12, so h1 = 1/6 and h2 = 0.
        let h = hu_moments(&square(30.0));
        assert_relative_eq!(h[0], 1.0 / 6.0, epsilon = 1e-9);
        assert_relative_eq!(h[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn match_shapes_is_scale_and_translation_invariant() {
        let small = star(8, 50.0, 30.0);
        let large: Vec<Point> = small
            .iter()
            .map(|p| Point::new(p.x * 3.0 + 17.0, p.y * 3.0 - 4.0))
            .collect();
        assert!(match_shapes(&small, &large) < 1e-6);
    }

    #[test]
    fn match_shapes_separates_different_shapes() {
        let sq = square(100.0);
        let elongated = vec![
            Point::new(0.0, 0.0),
            Point::new(300.0, 0.0),
            Point::new(300.0, 20.0),
            Point::new(0.0, 20.0),
        ];
        assert!(match_shapes(&sq, &elongated) > 0.1);
    }
}
