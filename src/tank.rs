//! # Tank Volume Model
//!
//! Converts a sensor-to-surface distance into water level, fill percentage
//! and stored volume using the configured tank geometry.
//!
//! ## Geometry
//!
//! The sensor is mounted above the tank looking down. `sensor_offset_mm` is
//! the distance from the sensor face to the brim (top of the usable depth):
//!
//! ```text
//! level_mm = clamp(depth_mm - distance_mm - sensor_offset_mm, 0, depth_mm)
//! percent  = 100 * level_mm / depth_mm
//! liters   = area_mm2 * level_mm / 1_000_000
//! ```
//!
//! | Shape | Cross-section area |
//! |-------|--------------------|
//! | Cylinder | π · d² / 4 |
//! | Rectangular | length · width |
//! | Custom | stored area |
//!
//! ## Usage
//!
//! ```
//! use tank_bridge::tank::{TankGeometry, TankShape};
//!
//! let tank = TankGeometry {
//!     shape: TankShape::Cylinder,
//!     cylinder_diameter_mm: 1000,
//!     depth_mm: 1500,
//!     sensor_offset_mm: 25,
//!     ..TankGeometry::default()
//! };
//!
//! let reading = tank.reading(500);
//! assert_eq!(reading.level_mm, 975);
//! assert_eq!(reading.percent, Some(65.0));
//! ```

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Cubic millimetres per litre.
const MM3_PER_LITER: f64 = 1_000_000.0;

/// Tank cross-section shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TankShape {
    /// Cross-section area entered directly
    Custom,
    /// Vertical cylinder, uses `cylinder_diameter_mm`
    #[default]
    Cylinder,
    /// Rectangular box, uses `rect_length_mm` and `rect_width_mm`
    Rectangular,
}

impl TankShape {
    /// Numeric code used by the configuration store.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            TankShape::Custom => 0,
            TankShape::Cylinder => 1,
            TankShape::Rectangular => 2,
        }
    }

    /// Shape for a configuration store code, `None` if unknown.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TankShape::Custom),
            1 => Some(TankShape::Cylinder),
            2 => Some(TankShape::Rectangular),
            _ => None,
        }
    }
}

/// Tank dimensions, all in millimetres.
///
/// Only the parameters of the active `shape` are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TankGeometry {
    pub shape: TankShape,
    pub cylinder_diameter_mm: u32,
    pub rect_length_mm: u32,
    pub rect_width_mm: u32,
    pub custom_area_mm2: u32,
    pub depth_mm: u32,
    pub sensor_offset_mm: i32,
}

/// One converted measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Filtered sensor distance
    pub distance_mm: i32,
    /// Water height above the tank floor, within `[0, depth_mm]`
    pub level_mm: i32,
    /// Fill level, `None` when the depth is not configured
    pub percent: Option<f64>,
    /// Stored volume, `None` when the cross-section area is unknown
    pub liters: Option<f64>,
}

impl TankGeometry {
    /// Cross-section area of the active shape in mm².
    ///
    /// Returns 0.0 when the governing parameters are not set.
    ///
    /// # Examples
    ///
    /// ```
    /// use tank_bridge::tank::{TankGeometry, TankShape};
    ///
    /// let tank = TankGeometry {
    ///     shape: TankShape::Rectangular,
    ///     rect_length_mm: 2000,
    ///     rect_width_mm: 500,
    ///     ..TankGeometry::default()
    /// };
    /// assert_eq!(tank.area_mm2(), 1_000_000.0);
    /// ```
    #[must_use]
    pub fn area_mm2(&self) -> f64 {
        match self.shape {
            TankShape::Cylinder => {
                let d = f64::from(self.cylinder_diameter_mm);
                PI * d * d / 4.0
            }
            TankShape::Rectangular => {
                f64::from(self.rect_length_mm) * f64::from(self.rect_width_mm)
            }
            TankShape::Custom => f64::from(self.custom_area_mm2),
        }
    }

    /// Water level for a sensor distance, clamped to `[0, depth_mm]`.
    #[must_use]
    pub fn level_mm(&self, distance_mm: i32) -> i32 {
        let depth = i64::from(self.depth_mm);
        let level = depth - i64::from(distance_mm) - i64::from(self.sensor_offset_mm);
        // depth_mm fits i32 for any real tank; saturate rather than wrap
        level.clamp(0, depth).min(i64::from(i32::MAX)) as i32
    }

    /// Convert a filtered distance into a full reading.
    #[must_use]
    pub fn reading(&self, distance_mm: i32) -> Reading {
        let level_mm = self.level_mm(distance_mm);

        let percent = (self.depth_mm > 0)
            .then(|| 100.0 * f64::from(level_mm) / f64::from(self.depth_mm));

        let area = self.area_mm2();
        let liters = (area > 0.0).then(|| area * f64::from(level_mm) / MM3_PER_LITER);

        Reading {
            distance_mm,
            level_mm,
            percent,
            liters,
        }
    }
}
