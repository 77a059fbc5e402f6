//! Polygonal detection regions.

use crate::detection::Detection;

/// Detection regions parsed from a device's area string.
///
/// Format: polygons separated by `;`, each a comma-separated list of
/// `(x,y)` vertices, e.g. `"(100,100),(500,100),(500,400),(100,400)"`.
/// Polygons with fewer than three vertices are dropped. An empty region
/// admits every detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionRegion {
    polygons: Vec<Vec<(f32, f32)>>,
}

impl DetectionRegion {
    /// Parse an area string. Malformed fragments are skipped rather
    /// than failing the whole string.
    pub fn parse(raw: &str) -> Self {
        let mut polygons = Vec::new();
        for part in raw.split(';') {
            let numbers: Vec<f32> = part
                .split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();
            let points: Vec<(f32, f32)> = numbers
                .chunks_exact(2)
                .map(|pair| (pair[0], pair[1]))
                .collect();
            if points.len() >= 3 {
                polygons.push(points);
            }
        }
        Self { polygons }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Whether the point lies inside any polygon (ray casting).
    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.polygons
            .iter()
            .any(|polygon| point_in_polygon(x, y, polygon))
    }

    /// Whether a detection's box center falls inside the region. An
    /// empty region admits everything.
    pub fn admits(&self, detection: &Detection) -> bool {
        if self.polygons.is_empty() {
            return true;
        }
        let (cx, cy) = detection.bbox.center();
        self.contains(cx, cy)
    }
}

fn point_in_polygon(x: f32, y: f32, polygon: &[(f32, f32)]) -> bool {
    let mut inside = false;
    let (mut p1x, mut p1y) = polygon[0];
    for i in 1..=polygon.len() {
        let (p2x, p2y) = polygon[i % polygon.len()];
        if y > p1y.min(p2y) && y <= p1y.max(p2y) && x <= p1x.max(p2x) && p1y != p2y {
            let x_intersect = (y - p1y) * (p2x - p1x) / (p2y - p1y) + p1x;
            if p1x == p2x || x <= x_intersect {
                inside = !inside;
            }
        }
        (p1x, p1y) = (p2x, p2y);
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    fn detection_at(cx: f32, cy: f32) -> Detection {
        Detection::new("fire", 0, 0.9, BBox::new(cx - 2.0, cy - 2.0, cx + 2.0, cy + 2.0))
    }

    #[test]
    fn test_parse_single_and_multiple_polygons() {
        let single = DetectionRegion::parse("(100,100),(500,100),(500,400),(100,400)");
        assert!(!single.is_empty());
        assert!(single.contains(300.0, 250.0));
        assert!(!single.contains(50.0, 50.0));

        let multi = DetectionRegion::parse(
            "(0,0),(10,0),(10,10),(0,10);(100,100),(110,100),(110,110),(100,110)",
        );
        assert!(multi.contains(5.0, 5.0));
        assert!(multi.contains(105.0, 105.0));
        assert!(!multi.contains(50.0, 50.0));
    }

    #[test]
    fn test_degenerate_polygons_are_dropped() {
        assert!(DetectionRegion::parse("(1,1),(2,2)").is_empty());
        assert!(DetectionRegion::parse("").is_empty());
        assert!(DetectionRegion::parse("garbage").is_empty());
    }

    #[test]
    fn test_empty_region_admits_everything() {
        let region = DetectionRegion::default();
        assert!(region.admits(&detection_at(9999.0, 9999.0)));
    }

    #[test]
    fn test_admits_by_box_center() {
        let region = DetectionRegion::parse("(0,0),(100,0),(100,100),(0,100)");
        assert!(region.admits(&detection_at(50.0, 50.0)));
        assert!(!region.admits(&detection_at(200.0, 200.0)));
    }

    #[test]
    fn test_non_convex_polygon() {
        // L-shape: the notch at the top right is outside.
        let region =
            DetectionRegion::parse("(0,0),(100,0),(100,50),(50,50),(50,100),(0,100)");
        assert!(region.contains(25.0, 75.0));
        assert!(region.contains(75.0, 25.0));
        assert!(!region.contains(75.0, 75.0));
    }
}
