// Geometry Module - Hypercube topology and four-plane coordinate types
use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::Arc;
use thiserror::Error;

pub const MIN_DIMENSIONS: usize = 1;
pub const MAX_DIMENSIONS: usize = 4;

/// One of the four spatial directions of the modeled space. `A` is the fourth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Plane {
    X,
    Y,
    Z,
    A,
}

impl Plane {
    pub const ALL: [Plane; 4] = [Plane::X, Plane::Y, Plane::Z, Plane::A];

    pub fn index(self) -> usize {
        match self {
            Plane::X => 0,
            Plane::Y => 1,
            Plane::Z => 2,
            Plane::A => 3,
        }
    }

    pub fn name(self) -> char {
        match self {
            Plane::X => 'x',
            Plane::Y => 'y',
            Plane::Z => 'z',
            Plane::A => 'a',
        }
    }
}

/// A 2-plane rotation subspace. Declaration order is the canonical rotation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    XY,
    XZ,
    YZ,
    XA,
    YA,
    ZA,
}

impl Axis {
    /// Canonical application order for rotations. Rotations in four dimensions
    /// do not commute, so projecting with any other order draws a different shape.
    pub const ALL: [Axis; 6] = [Axis::XY, Axis::XZ, Axis::YZ, Axis::XA, Axis::YA, Axis::ZA];

    pub fn planes(self) -> (Plane, Plane) {
        match self {
            Axis::XY => (Plane::X, Plane::Y),
            Axis::XZ => (Plane::X, Plane::Z),
            Axis::YZ => (Plane::Y, Plane::Z),
            Axis::XA => (Plane::X, Plane::A),
            Axis::YA => (Plane::Y, Plane::A),
            Axis::ZA => (Plane::Z, Plane::A),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::XY => 0,
            Axis::XZ => 1,
            Axis::YZ => 2,
            Axis::XA => 3,
            Axis::YA => 4,
            Axis::ZA => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::XY => "xy",
            Axis::XZ => "xz",
            Axis::YZ => "yz",
            Axis::XA => "xa",
            Axis::YA => "ya",
            Axis::ZA => "za",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "xy" | "yx" => Some(Axis::XY),
            "xz" | "zx" => Some(Axis::XZ),
            "yz" | "zy" => Some(Axis::YZ),
            "xa" | "ax" => Some(Axis::XA),
            "ya" | "ay" => Some(Axis::YA),
            "za" | "az" => Some(Axis::ZA),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position in the four-plane space. Planes a shape does not use stay at 0.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinates([f64; 4]);

impl Coordinates {
    pub const ORIGIN: Coordinates = Coordinates([0.0; 4]);

    pub fn new(x: f64, y: f64, z: f64, a: f64) -> Self {
        Coordinates([x, y, z, a])
    }

    pub fn get(&self, plane: Plane) -> f64 {
        self.0[plane.index()]
    }

    pub fn set(&mut self, plane: Plane, value: f64) {
        self.0[plane.index()] = value;
    }

    pub fn with(mut self, plane: Plane, value: f64) -> Self {
        self.set(plane, value);
        self
    }

    /// Adds `change` plane by plane.
    pub fn shift(&mut self, change: &Coordinates) {
        for plane in Plane::ALL {
            self[plane] += change[plane];
        }
    }

    pub fn shifted(mut self, change: &Coordinates) -> Self {
        self.shift(change);
        self
    }
}

impl Index<Plane> for Coordinates {
    type Output = f64;

    fn index(&self, plane: Plane) -> &f64 {
        &self.0[plane.index()]
    }
}

impl IndexMut<Plane> for Coordinates {
    fn index_mut(&mut self, plane: Plane) -> &mut f64 {
        &mut self.0[plane.index()]
    }
}

/// One value per rotation axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMap<T>([T; 6]);

impl<T: Copy> AxisMap<T> {
    pub fn splat(value: T) -> Self {
        AxisMap([value; 6])
    }

    pub fn from_fn<F: FnMut(Axis) -> T>(mut f: F) -> Self {
        AxisMap(Axis::ALL.map(&mut f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, T)> + '_ {
        Axis::ALL.iter().map(move |&axis| (axis, self[axis]))
    }
}

impl<T: Copy + Default> Default for AxisMap<T> {
    fn default() -> Self {
        AxisMap::splat(T::default())
    }
}

impl<T> Index<Axis> for AxisMap<T> {
    type Output = T;

    fn index(&self, axis: Axis) -> &T {
        &self.0[axis.index()]
    }
}

impl<T> IndexMut<Axis> for AxisMap<T> {
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        &mut self.0[axis.index()]
    }
}

/// Angle in degrees per axis.
pub type Rotation = AxisMap<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub usize);

/// Undirected edge stored with `from < to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub from: VertexId,
    pub to: VertexId,
}

impl Edge {
    pub fn new(a: VertexId, b: VertexId) -> Self {
        if a <= b {
            Edge { from: a, to: b }
        } else {
            Edge { from: b, to: a }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("hypercube dimensions must be between {min} and {max}, got {requested}")]
    InvalidDimension { requested: usize, min: usize, max: usize },
    #[error("side length must be a positive finite number, got {0}")]
    InvalidSideLength(f64),
}

/// Immutable vertex/edge graph. Shared between per-frame shape snapshots.
#[derive(Debug)]
pub struct Topology {
    dimensions: usize,
    side_length: f64,
    vertices: Vec<Coordinates>,
    edges: Vec<Edge>,
}

/// The polytope plus its current rotation and position.
///
/// Topology is fixed at construction. Rotation and position are replaced
/// wholesale by building a new snapshot with `with_rotation`/`with_position`.
#[derive(Debug, Clone)]
pub struct Shape {
    topology: Arc<Topology>,
    pub position: Coordinates,
    pub rotation: Rotation,
}

impl Shape {
    pub fn dimensions(&self) -> usize {
        self.topology.dimensions
    }

    pub fn side_length(&self) -> f64 {
        self.topology.side_length
    }

    pub fn vertices(&self) -> &[Coordinates] {
        &self.topology.vertices
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Coordinates> {
        self.topology.vertices.get(id.0)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.topology.edges
    }

    pub fn with_rotation(&self, rotation: Rotation) -> Shape {
        Shape {
            topology: Arc::clone(&self.topology),
            position: self.position,
            rotation,
        }
    }

    pub fn with_position(&self, position: Coordinates) -> Shape {
        Shape {
            topology: Arc::clone(&self.topology),
            position,
            rotation: self.rotation,
        }
    }

    pub fn shares_topology(&self, other: &Shape) -> bool {
        Arc::ptr_eq(&self.topology, &other.topology)
    }
}

/// True when two vertices agree on every plane but one, and on that plane
/// their values are non-zero negatives of each other.
pub fn are_adjacent(a: &Coordinates, b: &Coordinates) -> bool {
    let mut differing = 0;
    for plane in Plane::ALL {
        let (va, vb) = (a[plane], b[plane]);
        if va == vb {
            continue;
        }
        if va == -vb && va != 0.0 {
            differing += 1;
        } else {
            return false;
        }
    }
    differing == 1
}

/// Build the `dimensions`-cube centered on the origin, spanning
/// `±side_length/2` on each of the first `dimensions` planes.
pub fn build_hypercube(dimensions: usize, side_length: f64) -> Result<Shape, GeometryError> {
    if !(MIN_DIMENSIONS..=MAX_DIMENSIONS).contains(&dimensions) {
        return Err(GeometryError::InvalidDimension {
            requested: dimensions,
            min: MIN_DIMENSIONS,
            max: MAX_DIMENSIONS,
        });
    }
    if !side_length.is_finite() || side_length <= 0.0 {
        return Err(GeometryError::InvalidSideLength(side_length));
    }

    let n = side_length / 2.0;

    // Cartesian product with {+n, -n}, one plane at a time
    let mut vertices = vec![Coordinates::ORIGIN];
    for &plane in &Plane::ALL[..dimensions] {
        let mut extended = Vec::with_capacity(vertices.len() * 2);
        for sign in [1.0, -1.0] {
            for coordinates in &vertices {
                extended.push(coordinates.with(plane, n * sign));
            }
        }
        vertices = extended;
    }

    // Visiting each unordered pair once keeps every edge canonical
    let mut edges = Vec::with_capacity(dimensions << dimensions.saturating_sub(1));
    for i in 0..vertices.len() {
        for j in (i + 1)..vertices.len() {
            if are_adjacent(&vertices[i], &vertices[j]) {
                edges.push(Edge::new(VertexId(i), VertexId(j)));
            }
        }
    }

    Ok(Shape {
        topology: Arc::new(Topology {
            dimensions,
            side_length,
            vertices,
            edges,
        }),
        position: Coordinates::ORIGIN,
        rotation: Rotation::default(),
    })
}
