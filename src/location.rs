use core::ops::{Add, Sub, Mul};
use serde::{Deserialize, Serialize};


/// position and rotation on the machine, in millimeters and degrees
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: f64,
}

impl Location {
    pub const ORIGIN: Self = Self::new(0., 0., 0., 0.);

    pub const fn new(x: f64, y: f64, z: f64, rotation: f64) -> Self {
        Self {x, y, z, rotation}
    }
    /// rotate the XY position around the origin, rotation itself is kept
    pub fn rotate_xy(self, degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
            .. self
        }
    }
    /**
        interpret `self` as an offset expressed in the frame of `base`

        the offset is rotated by the base rotation before being added, and rotations add up
    */
    pub fn offset_with_rotation_from(self, base: Self) -> Self {
        base + self.rotate_xy(base.rotation)
    }
    /// distance to the origin in the XY plane
    pub fn planar_distance(self) -> f64 {
        self.x.hypot(self.y)
    }
}

impl Add for Location {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z, self.rotation + other.rotation)
    }
}
impl Sub for Location {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z, self.rotation - other.rotation)
    }
}
impl Mul<f64> for Location {
    type Output = Self;
    fn mul(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor, self.rotation * factor)
    }
}
