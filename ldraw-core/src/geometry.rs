/// Bounding boxes and flattened geometry
use nalgebra::{Matrix4, Point3, Vector3};

use crate::color::ColorCode;

/// Axis-aligned bounding box. An empty box has `min > max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Box3 {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Box3 {
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Point3<f64>]) -> Self {
        let mut bounds = Self::empty();
        for point in points {
            bounds.include_point(point);
        }
        bounds
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn include_point(&mut self, point: &Point3<f64>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    pub fn union(&self, other: &Box3) -> Box3 {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Box3 {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Bounds of the eight transformed corners.
    pub fn transformed(&self, matrix: &Matrix4<f64>) -> Box3 {
        if self.is_empty() {
            return *self;
        }
        let mut bounds = Box3::empty();
        for corner in self.corners() {
            bounds.include_point(&matrix.transform_point(&corner));
        }
        bounds
    }

    pub fn corners(&self) -> [Point3<f64>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }

    pub fn size(&self) -> Vector3<f64> {
        if self.is_empty() {
            Vector3::zeros()
        } else {
            self.max - self.min
        }
    }
}

impl Default for Box3 {
    fn default() -> Self {
        Self::empty()
    }
}

/// A 3D vertex with position and normal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Point3<f64>,
    pub normal: Vector3<f64>,
}

impl Vertex {
    pub fn new(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self { position, normal }
    }
}

/// A filled triangle in world space
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub vertices: [Vertex; 3],
    pub color: ColorCode,
}

impl Face {
    /// Build a face whose vertex normals are the face normal.
    pub fn flat(points: [Point3<f64>; 3], color: ColorCode) -> Self {
        let normal = face_normal(&points);
        Self {
            vertices: points.map(|p| Vertex::new(p, normal)),
            color,
        }
    }

    /// Calculate the face normal from the triangle's vertices
    pub fn calculate_normal(&self) -> Vector3<f64> {
        face_normal(&self.vertices.map(|v| v.position))
    }
}

/// A drawn edge in world space
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub points: [Point3<f64>; 2],
    pub color: ColorCode,
}

/// Geometry of a model with every part reference expanded.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub faces: Vec<Face>,
    pub segments: Vec<Segment>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_face(&mut self, face: Face) {
        self.faces.push(face);
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.segments.is_empty()
    }

    pub fn bounds(&self) -> Box3 {
        let mut bounds = Box3::empty();
        for face in &self.faces {
            for vertex in &face.vertices {
                bounds.include_point(&vertex.position);
            }
        }
        for segment in &self.segments {
            for point in &segment.points {
                bounds.include_point(point);
            }
        }
        bounds
    }
}

fn face_normal(points: &[Point3<f64>; 3]) -> Vector3<f64> {
    let edge1 = points[1] - points[0];
    let edge2 = points[2] - points[0];
    edge1
        .cross(&edge2)
        .try_normalize(1e-12)
        .unwrap_or_else(Vector3::zeros)
}
