//! Toroidal Grid Primitives
//!
//! Coordinates, facing directions and line rasterisation on a grid that
//! wraps at both edges. Every coordinate that reaches the world model goes
//! through [`GridSize::wrap`], so nothing ever indexes outside the grid.

use std::f32::consts::{FRAC_PI_2, PI};

use serde::{Serialize, Deserialize};

/// A cell position on the grid (always wrapped when produced by `GridSize`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Coord {
    /// Column.
    pub x: i32,
    /// Row (grows downward).
    pub y: i32,
}

impl Coord {
    /// Create a coordinate without wrapping.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset by a delta without wrapping.
    #[inline]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Dimensions of a toroidal grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    /// Number of columns.
    pub width: u16,
    /// Number of rows.
    pub height: u16,
}

impl GridSize {
    /// Create a grid size. Zero dimensions are bumped to one.
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Total number of cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Wrap arbitrary coordinates onto the grid.
    #[inline]
    pub fn wrap(&self, x: i32, y: i32) -> Coord {
        Coord {
            x: x.rem_euclid(self.width as i32),
            y: y.rem_euclid(self.height as i32),
        }
    }

    /// Wrap an existing coordinate.
    #[inline]
    pub fn wrap_coord(&self, c: Coord) -> Coord {
        self.wrap(c.x, c.y)
    }

    /// Row-major index of a (wrapped) coordinate.
    #[inline]
    pub fn index(&self, c: Coord) -> usize {
        let c = self.wrap_coord(c);
        c.y as usize * self.width as usize + c.x as usize
    }
}

/// Facing direction of an entity.
///
/// Discriminants are the wire values; `+1 mod 4` is a clockwise turn
/// because rows grow downward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// +x
    #[default]
    East = 0,
    /// +y
    South = 1,
    /// -x
    West = 2,
    /// -y
    North = 3,
}

impl Direction {
    /// All directions in wire order.
    pub const ALL: [Direction; 4] =
        [Direction::East, Direction::South, Direction::West, Direction::North];

    /// Decode from the wire value (any value is taken modulo 4).
    pub fn from_u8(value: u8) -> Direction {
        Self::ALL[(value % 4) as usize]
    }

    /// Unit cell offset of one step forward.
    #[inline]
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
            Direction::North => (0, -1),
        }
    }

    /// Rotate 90 degrees clockwise.
    #[inline]
    pub fn rotate_cw(self) -> Direction {
        Self::from_u8((self as u8 + 1) % 4)
    }

    /// Rotate 90 degrees counter-clockwise.
    #[inline]
    pub fn rotate_ccw(self) -> Direction {
        Self::from_u8((self as u8 + 3) % 4)
    }

    /// Facing angle in radians, matching `atan2(dy, dx)` of [`Self::offset`].
    pub fn angle(self) -> f32 {
        match self {
            Direction::East => 0.0,
            Direction::South => FRAC_PI_2,
            Direction::West => PI,
            Direction::North => -FRAC_PI_2,
        }
    }
}

/// Wrap an angle into [-π, π].
pub fn wrap_angle(mut angle: f32) -> f32 {
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

/// Supercover Bresenham walk between two cells (unwrapped coordinates).
///
/// Returns every cell the segment touches, endpoints included. When the
/// segment passes exactly through a cell corner both side cells are emitted.
pub fn supercover_line(from: Coord, to: Coord) -> Vec<Coord> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let nx = dx.abs();
    let ny = dy.abs();
    let sx = dx.signum();
    let sy = dy.signum();

    let mut cells = Vec::with_capacity((nx + ny + 1) as usize);
    let mut current = from;
    cells.push(current);

    let (mut ix, mut iy) = (0, 0);
    while ix < nx || iy < ny {
        let decision = (1 + 2 * ix) * ny - (1 + 2 * iy) * nx;
        if decision == 0 {
            cells.push(current.offset(sx, 0));
            cells.push(current.offset(0, sy));
            current = current.offset(sx, sy);
            ix += 1;
            iy += 1;
        } else if decision < 0 {
            current = current.offset(sx, 0);
            ix += 1;
        } else {
            current = current.offset(0, sy);
            iy += 1;
        }
        cells.push(current);
    }

    cells
}
