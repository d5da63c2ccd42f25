// Renderer Module - rotates, translates and perspective-projects shapes onto a drawing surface
use crate::geometry::{Axis, Coordinates, Plane, Shape};
use crate::surface::{CompositeMode, DrawingSurface};
use crate::types::Rgba;

/// Viewer state. Only `field_of_view` takes part in the projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Coordinates,
    pub field_of_view: f64,
}

impl Camera {
    pub fn new(field_of_view: f64) -> Self {
        Camera { position: Coordinates::ORIGIN, field_of_view }
    }
}

/// Polar form of a two-plane sub-coordinate. `angle` is in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    pub angle: f64,
    pub length: f64,
}

/// Paint used for one frame: the trail overlay and the edge stroke.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub trail: Rgba,
    pub line: Rgba,
    pub line_width: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        StrokeStyle {
            trail: Rgba::new(0.0, 0.0, 0.0, 0.1),
            line: Rgba::new(1.0, 1.0, 1.0, 0.125),
            line_width: 2.0,
        }
    }
}

/// Reduce an angle into `[0, 360)`. Non-finite input maps to 0.
pub fn normalize_degrees(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let reduced = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if reduced >= 360.0 {
        0.0
    } else {
        reduced
    }
}

fn reference_angle(c1: f64, c2: f64) -> f64 {
    (c2.abs() / c1.abs()).atan().to_degrees()
}

fn radius(c1: f64, c2: f64) -> f64 {
    (c1 * c1 + c2 * c2).sqrt()
}

fn adjacent(length: f64, angle: f64) -> f64 {
    length * angle.to_radians().cos()
}

fn opposite(length: f64, angle: f64) -> f64 {
    length * angle.to_radians().sin()
}

/// Polar decomposition with one branch per sign combination.
///
/// Axis-aligned inputs get exact angles (0, 90, 180, 270) and the origin
/// maps to a zero vector, so no branch divides by zero.
pub fn coordinates_to_vector(c1: f64, c2: f64) -> Vector {
    if c1 > 0.0 && c2 == 0.0 {
        Vector { angle: 0.0, length: c1.abs() }
    } else if c1 > 0.0 && c2 > 0.0 {
        Vector { angle: reference_angle(c1, c2), length: radius(c1, c2) }
    } else if c1 == 0.0 && c2 > 0.0 {
        Vector { angle: 90.0, length: c2.abs() }
    } else if c1 < 0.0 && c2 > 0.0 {
        Vector { angle: 180.0 - reference_angle(c1, c2), length: radius(c1, c2) }
    } else if c1 < 0.0 && c2 == 0.0 {
        Vector { angle: 180.0, length: c1.abs() }
    } else if c1 < 0.0 && c2 < 0.0 {
        Vector { angle: reference_angle(c1, c2) + 180.0, length: radius(c1, c2) }
    } else if c1 == 0.0 && c2 < 0.0 {
        Vector { angle: 270.0, length: c2.abs() }
    } else if c1 > 0.0 && c2 < 0.0 {
        Vector { angle: 360.0 - reference_angle(c1, c2), length: radius(c1, c2) }
    } else {
        // origin, or a NaN component
        Vector { angle: 0.0, length: 0.0 }
    }
}

/// Inverse of `coordinates_to_vector`. The angle is normalised first.
pub fn vector_to_coordinates(vector: Vector) -> (f64, f64) {
    let length = if vector.length.is_finite() { vector.length } else { 0.0 };
    let angle = normalize_degrees(vector.angle);

    if angle == 0.0 {
        (length, 0.0)
    } else if angle < 90.0 {
        (adjacent(length, angle), opposite(length, angle))
    } else if angle == 90.0 {
        (0.0, length)
    } else if angle < 180.0 {
        let reference = 180.0 - angle;
        (-adjacent(length, reference), opposite(length, reference))
    } else if angle == 180.0 {
        (-length, 0.0)
    } else if angle < 270.0 {
        let reference = angle - 180.0;
        (-adjacent(length, reference), -opposite(length, reference))
    } else if angle == 270.0 {
        (0.0, -length)
    } else {
        let reference = 360.0 - angle;
        (adjacent(length, reference), -opposite(length, reference))
    }
}

/// Rotate the `axis` sub-coordinate of `coordinates` by `amount` degrees.
pub fn rotate(coordinates: &mut Coordinates, axis: Axis, amount: f64) {
    let (p1, p2) = axis.planes();
    let mut vector = coordinates_to_vector(coordinates[p1], coordinates[p2]);
    vector.angle = normalize_degrees(vector.angle + amount);
    let (c1, c2) = vector_to_coordinates(vector);
    coordinates[p1] = c1;
    coordinates[p2] = c2;
}

/// Shape-local vertex to scene space: all six rotations in canonical
/// order, then the shape's position.
pub fn shape_to_scene(vertex: &Coordinates, shape: &Shape) -> Coordinates {
    let mut coordinates = *vertex;
    for axis in Axis::ALL {
        rotate(&mut coordinates, axis, shape.rotation[axis]);
    }
    coordinates.shifted(&shape.position)
}

fn depth_factor(field_of_view: f64, depth: f64) -> f64 {
    if !(field_of_view.is_finite() && field_of_view > 0.0) {
        return 1.0;
    }
    let factor = field_of_view.powf(depth);
    if factor.is_finite() {
        factor
    } else {
        1.0
    }
}

/// Two-stage depth contraction followed by the surface origin offset.
///
/// `x`, `y` and `a` scale by `fov^z`; the updated `x`, `y` and `z` then
/// scale by `fov^a`.
pub fn scene_to_surface(coordinates: &Coordinates, origin: &Coordinates, field_of_view: f64) -> Coordinates {
    let mut c = *coordinates;

    let by_z = depth_factor(field_of_view, c[Plane::Z]);
    for plane in [Plane::X, Plane::Y, Plane::A] {
        c[plane] *= by_z;
    }

    let by_a = depth_factor(field_of_view, c[Plane::A]);
    for plane in [Plane::X, Plane::Y, Plane::Z] {
        c[plane] *= by_a;
    }

    c.shifted(origin)
}

/// Surface centre on `x`/`y`, 0 on `z`/`a`.
pub fn surface_origin<S: DrawingSurface + ?Sized>(surface: &S) -> Coordinates {
    Coordinates::new(surface.width() / 2.0, surface.height() / 2.0, 0.0, 0.0)
}

pub fn project_vertex(vertex: &Coordinates, shape: &Shape, origin: &Coordinates, field_of_view: f64) -> (f64, f64) {
    let scene = shape_to_scene(vertex, shape);
    let projected = scene_to_surface(&scene, origin, field_of_view);
    (projected[Plane::X], projected[Plane::Y])
}

/// Draw one frame: fade previous frames with the trail overlay, then stroke
/// every edge of every shape as a single screen-composited path per shape.
///
/// Returns `false` without touching the surface when it is not ready.
pub fn draw_scene<S: DrawingSurface + ?Sized>(
    surface: &mut S,
    shapes: &[Shape],
    camera: &Camera,
    style: &StrokeStyle,
) -> bool {
    if !surface.is_ready() {
        return false;
    }

    let origin = surface_origin(surface);
    let (width, height) = (surface.width(), surface.height());

    surface.set_global_alpha(1.0);
    surface.set_composite_mode(CompositeMode::SourceOver);
    surface.set_fill_color(style.trail);
    surface.fill_rect(0.0, 0.0, width, height);

    for shape in shapes {
        draw_shape(surface, shape, &origin, camera.field_of_view, style);
    }
    true
}

fn draw_shape<S: DrawingSurface + ?Sized>(
    surface: &mut S,
    shape: &Shape,
    origin: &Coordinates,
    field_of_view: f64,
    style: &StrokeStyle,
) {
    surface.set_stroke_color(style.line);
    surface.set_composite_mode(CompositeMode::Screen);
    surface.set_line_width(style.line_width);
    surface.set_global_alpha(1.0);

    // project each vertex once; edges index into the projected list
    let projected: Vec<(f64, f64)> = shape
        .vertices()
        .iter()
        .map(|vertex| project_vertex(vertex, shape, origin, field_of_view))
        .collect();

    surface.begin_path();
    for edge in shape.edges() {
        let (Some(&start), Some(&end)) = (projected.get(edge.from.0), projected.get(edge.to.0)) else {
            continue;
        };
        surface.move_to(start.0, start.1);
        surface.line_to(end.0, end.1);
    }
    surface.stroke();
}
