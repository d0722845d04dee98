use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Column letters of the map grid, west to east.
pub const GRID_COLUMNS: [char; 10] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J'];
/// Number of rows, north to south. Rows are numbered from 1.
pub const GRID_ROWS: u8 = 12;

/// A map square such as `E4`: column letter `A`..`J`, row `1`..`12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SquareId {
    col: u8,
    row: u8,
}

impl SquareId {
    /// `col` is zero-based (`0` = `A`), `row` is one-based.
    pub fn new(col: u8, row: u8) -> Option<Self> {
        if (col as usize) < GRID_COLUMNS.len() && (1..=GRID_ROWS).contains(&row) {
            Some(Self { col, row })
        } else {
            None
        }
    }

    /// Parse canonical identifiers: an upper-case column letter `A`..`J` and a
    /// row `1`..`12` without leading zeros or surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut chars = raw.chars();
        let letter = chars.next()?;
        let col = GRID_COLUMNS.iter().position(|&c| c == letter)?;
        let digits = chars.as_str();
        if digits.is_empty()
            || digits.len() > 2
            || digits.starts_with('0')
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let row: u8 = digits.parse().ok()?;
        Self::new(col as u8, row)
    }

    pub fn column(self) -> char {
        GRID_COLUMNS[self.col as usize]
    }

    pub fn column_index(self) -> usize {
        self.col as usize
    }

    pub fn row(self) -> u8 {
        self.row
    }

    /// Every square of the grid in row-major order.
    pub fn all() -> impl Iterator<Item = SquareId> {
        (1..=GRID_ROWS).flat_map(|row| {
            (0..GRID_COLUMNS.len() as u8).map(move |col| SquareId { col, row })
        })
    }
}

impl fmt::Display for SquareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column(), self.row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSquareIdError(pub String);

impl fmt::Display for ParseSquareIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid square id '{}'", self.0)
    }
}

impl std::error::Error for ParseSquareIdError {}

impl FromStr for SquareId {
    type Err = ParseSquareIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParseSquareIdError(s.to_string()))
    }
}

impl Serialize for SquareId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SquareId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn is_valid_square_id(raw: &str) -> bool {
    SquareId::parse(raw).is_some()
}

/// Subdivision of a square into four equal parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quadrant {
    /// Top-left.
    Q1,
    /// Top-right.
    Q2,
    /// Bottom-left.
    Q3,
    /// Bottom-right.
    Q4,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [Quadrant::Q1, Quadrant::Q2, Quadrant::Q3, Quadrant::Q4];

    pub fn label(self) -> &'static str {
        match self {
            Quadrant::Q1 => "Q1",
            Quadrant::Q2 => "Q2",
            Quadrant::Q3 => "Q3",
            Quadrant::Q4 => "Q4",
        }
    }

    fn from_halves(right: bool, bottom: bool) -> Self {
        match (right, bottom) {
            (false, false) => Quadrant::Q1,
            (true, false) => Quadrant::Q2,
            (false, true) => Quadrant::Q3,
            (true, true) => Quadrant::Q4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned pixel rectangle; `y` grows southwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Bounds {
    /// Corners may be given in any order.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> Point {
        Point::new((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5)
    }

    /// True when the overlap has positive area. Shared edges do not count.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    /// Half-open containment: the west and north edges are inside, east and south are not.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x0 && p.x < self.x1 && p.y >= self.y0 && p.y < self.y1
    }

    pub fn expand(&self, dx: f64, dy: f64) -> Bounds {
        Bounds::new(self.x0 - dx, self.y0 - dy, self.x1 + dx, self.y1 + dy)
    }

    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }
}

/// The visible map region reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub bounds: Bounds,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(bounds: Bounds, zoom: f64) -> Self {
        Self { bounds, zoom }
    }
}

/// Fixed A–J × 1–12 grid with per-square pixel size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareGrid {
    square_w: f64,
    square_h: f64,
}

impl SquareGrid {
    pub fn new(square_w: f64, square_h: f64) -> Self {
        Self { square_w, square_h }
    }

    pub fn square_w(&self) -> f64 {
        self.square_w
    }

    pub fn square_h(&self) -> f64 {
        self.square_h
    }

    pub fn world_bounds(&self) -> Bounds {
        Bounds::new(
            0.0,
            0.0,
            self.square_w * GRID_COLUMNS.len() as f64,
            self.square_h * GRID_ROWS as f64,
        )
    }

    pub fn square_bounds(&self, id: SquareId) -> Bounds {
        let x0 = id.column_index() as f64 * self.square_w;
        let y0 = (id.row() - 1) as f64 * self.square_h;
        Bounds::new(x0, y0, x0 + self.square_w, y0 + self.square_h)
    }

    /// Bounds for a raw identifier; `None` when it is not a grid square.
    pub fn square_bounds_str(&self, raw: &str) -> Option<Bounds> {
        SquareId::parse(raw).map(|id| self.square_bounds(id))
    }

    pub fn quadrant_bounds(&self, id: SquareId, quadrant: Quadrant) -> Bounds {
        let b = self.square_bounds(id);
        let mid = b.center();
        match quadrant {
            Quadrant::Q1 => Bounds::new(b.x0, b.y0, mid.x, mid.y),
            Quadrant::Q2 => Bounds::new(mid.x, b.y0, b.x1, mid.y),
            Quadrant::Q3 => Bounds::new(b.x0, mid.y, mid.x, b.y1),
            Quadrant::Q4 => Bounds::new(mid.x, mid.y, b.x1, b.y1),
        }
    }

    /// Every square whose area overlaps `rect`, in row-major order.
    pub fn squares_in_bounds(&self, rect: &Bounds) -> Vec<SquareId> {
        if !rect.is_finite() || self.square_w <= 0.0 || self.square_h <= 0.0 {
            return Vec::new();
        }

        let cols = GRID_COLUMNS.len() as f64;
        let rows = GRID_ROWS as f64;

        // Index ranges are widened by one on each side and the exact overlap test
        // decides, so float rounding at square edges cannot drop a square.
        let col_start = ((rect.x0 / self.square_w).floor() - 1.0).clamp(0.0, cols) as u8;
        let col_end = ((rect.x1 / self.square_w).ceil() + 1.0).clamp(0.0, cols) as u8;
        let row_start = ((rect.y0 / self.square_h).floor() - 1.0).clamp(0.0, rows) as u8;
        let row_end = ((rect.y1 / self.square_h).ceil() + 1.0).clamp(0.0, rows) as u8;

        let mut squares = Vec::new();
        for row in row_start..row_end {
            for col in col_start..col_end {
                let Some(id) = SquareId::new(col, row + 1) else {
                    continue;
                };
                if self.square_bounds(id).intersects(rect) {
                    squares.push(id);
                }
            }
        }
        squares
    }

    /// Euclidean distance from the square's center to `p`.
    pub fn distance_to_point(&self, id: SquareId, p: Point) -> f64 {
        let c = self.square_bounds(id).center();
        let dx = c.x - p.x;
        let dy = c.y - p.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn hit_test_square(&self, p: Point) -> Option<SquareId> {
        if !self.world_bounds().contains(p) {
            return None;
        }
        let col = (p.x / self.square_w).floor() as u8;
        let row = (p.y / self.square_h).floor() as u8 + 1;
        SquareId::new(col, row)
    }

    pub fn hit_test_quadrant(&self, p: Point) -> Option<(SquareId, Quadrant)> {
        let id = self.hit_test_square(p)?;
        let mid = self.square_bounds(id).center();
        Some((id, Quadrant::from_halves(p.x >= mid.x, p.y >= mid.y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SquareGrid {
        SquareGrid::new(2400.0, 1666.0)
    }

    fn sq(raw: &str) -> SquareId {
        SquareId::parse(raw).expect("valid square id")
    }

    #[test]
    fn parse_accepts_grid_ids() {
        assert_eq!(sq("A1").to_string(), "A1");
        assert_eq!(sq("J12").to_string(), "J12");
        assert_eq!(sq("E4").column_index(), 4);
        assert_eq!(sq("E4").row(), 4);
    }

    #[test]
    fn parse_rejects_ids_outside_grid() {
        for raw in [
            "Z9", "K1", "A0", "A13", "", "E", "E4x", "4E", "E-1", "E004", "E04", "e4", " E4", "E4 ",
        ] {
            assert!(SquareId::parse(raw).is_none(), "{raw} should be rejected");
            assert!(!is_valid_square_id(raw));
        }
    }

    #[test]
    fn all_yields_every_square_once() {
        let all: Vec<_> = SquareId::all().collect();
        assert_eq!(all.len(), 120);
        assert_eq!(all[0], sq("A1"));
        assert_eq!(all[119], sq("J12"));
    }

    #[test]
    fn square_bounds_follow_grid_constants() {
        let b = grid().square_bounds(sq("E5"));
        assert_eq!(b, Bounds::new(9600.0, 6664.0, 12000.0, 8330.0));
        assert!(grid().square_bounds_str("Z9").is_none());
    }

    #[test]
    fn viewport_exactly_on_square_returns_only_that_square() {
        let g = grid();
        let rect = g.square_bounds(sq("E5"));
        assert_eq!(g.squares_in_bounds(&rect), vec![sq("E5")]);
    }

    #[test]
    fn partial_overlap_includes_neighbours() {
        let g = grid();
        let rect = g.square_bounds(sq("E5")).expand(1.0, 1.0);
        let squares = g.squares_in_bounds(&rect);
        assert_eq!(squares.len(), 9);
        assert!(squares.contains(&sq("D4")));
        assert!(squares.contains(&sq("F6")));
    }

    #[test]
    fn rect_past_grid_edge_is_clamped_without_dropping_edge_squares() {
        let g = grid();
        let rect = Bounds::new(-5000.0, -5000.0, 100.0, 100.0);
        assert_eq!(g.squares_in_bounds(&rect), vec![sq("A1")]);

        let world = g.world_bounds();
        let rect = Bounds::new(world.x1 - 10.0, world.y1 - 10.0, world.x1 + 9000.0, world.y1 + 9000.0);
        assert_eq!(g.squares_in_bounds(&rect), vec![sq("J12")]);
    }

    #[test]
    fn rect_outside_grid_is_empty() {
        let g = grid();
        assert!(g.squares_in_bounds(&Bounds::new(-10.0, -10.0, -1.0, -1.0)).is_empty());
        assert!(g
            .squares_in_bounds(&Bounds::new(f64::NAN, 0.0, 10.0, 10.0))
            .is_empty());
    }

    #[test]
    fn distance_is_measured_from_square_center() {
        let g = grid();
        let center = g.square_bounds(sq("E5")).center();
        assert_eq!(g.distance_to_point(sq("E5"), center), 0.0);
        assert_eq!(g.distance_to_point(sq("F5"), center), 2400.0);
    }

    #[test]
    fn hit_tests_map_points_back_to_squares() {
        let g = grid();
        assert_eq!(g.hit_test_square(Point::new(0.0, 0.0)), Some(sq("A1")));
        assert_eq!(g.hit_test_square(Point::new(9600.0, 6664.0)), Some(sq("E5")));
        assert_eq!(g.hit_test_square(Point::new(24_000.0, 0.0)), None);
        assert_eq!(g.hit_test_square(Point::new(-1.0, 5.0)), None);

        assert_eq!(
            g.hit_test_quadrant(Point::new(9601.0, 6665.0)),
            Some((sq("E5"), Quadrant::Q1))
        );
        assert_eq!(
            g.hit_test_quadrant(Point::new(11_999.0, 8329.0)),
            Some((sq("E5"), Quadrant::Q4))
        );
    }

    #[test]
    fn quadrants_tile_the_square() {
        let g = grid();
        let total: f64 = Quadrant::ALL
            .iter()
            .map(|&q| {
                let b = g.quadrant_bounds(sq("C3"), q);
                b.width() * b.height()
            })
            .sum();
        assert!((total - 2400.0 * 1666.0).abs() < 1e-6);
    }

    #[test]
    fn square_id_serializes_as_string() {
        let json = serde_json::to_string(&sq("H5")).expect("serialize");
        assert_eq!(json, "\"H5\"");
        let back: SquareId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, sq("H5"));
        assert!(serde_json::from_str::<SquareId>("\"Z9\"").is_err());
    }
}
