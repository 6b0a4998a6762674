use glam::Vec2;

/// Convex hull in counter-clockwise order (monotone chain). Collinear points
/// on the hull boundary are dropped.
pub fn convex_hull(points: &[Vec2]) -> Vec<Vec2> {
    let mut pts: Vec<Vec2> = points.iter().copied().filter(|p| p.is_finite()).collect();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }
    let turn = |o: Vec2, a: Vec2, b: Vec2| (a - o).perp_dot(b - o);

    let mut hull: Vec<Vec2> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && turn(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && turn(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Rotated rectangle with center, full side lengths and angle of the first side in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    pub center: Vec2,
    pub size: Vec2,
    pub angle: f32,
}

impl RotatedRect {
    /// Corners in order around the rectangle, starting from
    /// `center - axis_u * w/2 - axis_v * h/2`.
    pub fn corners(&self) -> [Vec2; 4] {
        let u = Vec2::from_angle(self.angle);
        let v = u.perp();
        let hu = u * self.size.x * 0.5;
        let hv = v * self.size.y * 0.5;
        [
            self.center - hu - hv,
            self.center + hu - hv,
            self.center + hu + hv,
            self.center - hu + hv,
        ]
    }

    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }
}

/// Minimum-area enclosing rectangle of a point set, found by trying every
/// convex hull edge as a rectangle side. `None` for an empty input.
pub fn min_area_rect(points: &[Vec2]) -> Option<RotatedRect> {
    let hull = convex_hull(points);
    match hull.len() {
        0 => return None,
        1 => {
            return Some(RotatedRect {
                center: hull[0],
                size: Vec2::ZERO,
                angle: 0.0,
            });
        }
        2 => {
            let d = hull[1] - hull[0];
            return Some(RotatedRect {
                center: (hull[0] + hull[1]) * 0.5,
                size: Vec2::new(d.length(), 0.0),
                angle: d.y.atan2(d.x),
            });
        }
        _ => {}
    }

    let mut best: Option<RotatedRect> = None;
    for i in 0..hull.len() {
        let edge = hull[(i + 1) % hull.len()] - hull[i];
        let len = edge.length();
        if len <= f32::EPSILON {
            continue;
        }
        let u = edge / len;
        let v = u.perp();
        let (mut min_u, mut max_u, mut min_v, mut max_v) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
        for p in &hull {
            let pu = p.dot(u);
            let pv = p.dot(v);
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }
        let rect = RotatedRect {
            center: u * (min_u + max_u) * 0.5 + v * (min_v + max_v) * 0.5,
            size: Vec2::new(max_u - min_u, max_v - min_v),
            angle: u.y.atan2(u.x),
        };
        if best.is_none_or(|b| rect.area() < b.area()) {
            best = Some(rect);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contains(rect: &RotatedRect, p: Vec2) -> bool {
        let u = Vec2::from_angle(rect.angle);
        let d = p - rect.center;
        d.dot(u).abs() <= rect.size.x * 0.5 + 1e-3 && d.dot(u.perp()).abs() <= rect.size.y * 0.5 + 1e-3
    }

    #[test]
    fn hull_of_square_with_interior_points() {
        let pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 4.0),
            Vec2::new(0.0, 4.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(1.0, 3.0),
            Vec2::new(2.0, 0.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!(hull.contains(&Vec2::new(0.0, 0.0)));
        assert!(hull.contains(&Vec2::new(4.0, 4.0)));
        assert!(!hull.contains(&Vec2::new(2.0, 0.0)));
    }

    #[test]
    fn axis_aligned_rect() {
        let pts = vec![
            Vec2::new(1.0, 1.0),
            Vec2::new(5.0, 1.0),
            Vec2::new(5.0, 3.0),
            Vec2::new(1.0, 3.0),
            Vec2::new(3.0, 2.0),
        ];
        let rect = min_area_rect(&pts).unwrap();
        assert!((rect.area() - 8.0).abs() < 1e-4);
        assert!((rect.center - Vec2::new(3.0, 2.0)).length() < 1e-4);
    }

    #[test]
    fn rotated_square_is_tight() {
        let angle = 0.5f32;
        let u = Vec2::from_angle(angle);
        let v = u.perp();
        let c = Vec2::new(50.0, 40.0);
        let mut pts = Vec::new();
        for i in 0..=4 {
            for j in 0..=2 {
                pts.push(c + u * (i as f32 * 5.0 - 10.0) + v * (j as f32 * 3.0 - 3.0));
            }
        }
        let rect = min_area_rect(&pts).unwrap();
        // 20 x 6
        assert!((rect.area() - 120.0).abs() < 1e-2);
        for p in &pts {
            assert!(contains(&rect, *p));
        }
        let corners = rect.corners();
        assert_eq!(corners.len(), 4);
        for corner in corners {
            assert!(pts.iter().any(|p| (*p - corner).length() < 1e-2));
        }
    }

    #[test]
    fn degenerate_inputs() {
        assert!(min_area_rect(&[]).is_none());
        let single = min_area_rect(&[Vec2::new(2.0, 3.0)]).unwrap();
        assert_eq!(single.area(), 0.0);
        let line = min_area_rect(&[Vec2::ZERO, Vec2::new(3.0, 4.0), Vec2::new(6.0, 8.0)]).unwrap();
        assert!((line.size.x - 10.0).abs() < 1e-4);
        assert_eq!(line.area(), 0.0);
    }
}
