//! Spawn point selection.
//!
//! The map is crossed by two horizontal and two vertical roads at the thirds
//! of each axis. Players never spawn on a road: a candidate is drawn uniformly
//! over the map and redrawn until it keeps at least `road_margin` from every
//! road centerline.

use rand::Rng;
use shared::{ROAD_MARGIN, WORLD_HEIGHT, WORLD_WIDTH};

/// Bail-out for rejection sampling on maps whose clear area is vanishingly small.
const MAX_SPAWN_ATTEMPTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapLayout {
    pub width: f32,
    pub height: f32,
    pub road_margin: f32,
}

impl Default for MapLayout {
    fn default() -> Self {
        Self::new(WORLD_WIDTH, WORLD_HEIGHT, ROAD_MARGIN)
    }
}

impl MapLayout {
    pub fn new(width: f32, height: f32, road_margin: f32) -> Self {
        Self {
            width,
            height,
            road_margin,
        }
    }

    /// Y coordinates of the horizontal road centerlines.
    pub fn horizontal_roads(&self) -> [f32; 2] {
        [self.height / 3.0, 2.0 * self.height / 3.0]
    }

    /// X coordinates of the vertical road centerlines.
    pub fn vertical_roads(&self) -> [f32; 2] {
        [self.width / 3.0, 2.0 * self.width / 3.0]
    }

    fn clear_of(roads: [f32; 2], margin: f32, value: f32) -> bool {
        roads.iter().all(|road| (value - road).abs() >= margin)
    }

    /// True when `(x, y)` is inside the map and off every road band.
    pub fn is_clear(&self, x: f32, y: f32) -> bool {
        (0.0..=self.width).contains(&x)
            && (0.0..=self.height).contains(&y)
            && Self::clear_of(self.horizontal_roads(), self.road_margin, y)
            && Self::clear_of(self.vertical_roads(), self.road_margin, x)
    }

    /// First clear coordinate along one axis, if any.
    ///
    /// The clear set is a union of closed intervals whose ends are the axis
    /// bounds or a road offset by the margin, so checking those is exhaustive.
    fn first_clear_on_axis(len: f32, roads: [f32; 2], margin: f32) -> Option<f32> {
        let mut candidates = vec![0.0, len];
        for road in roads {
            candidates.push(road - margin);
            candidates.push(road + margin);
        }

        candidates
            .into_iter()
            .filter(|c| (0.0..=len).contains(c))
            .find(|c| Self::clear_of(roads, margin, *c))
    }

    fn fallback_point(&self) -> Option<(f32, f32)> {
        let x = Self::first_clear_on_axis(self.width, self.vertical_roads(), self.road_margin)?;
        let y = Self::first_clear_on_axis(self.height, self.horizontal_roads(), self.road_margin)?;
        Some((x, y))
    }

    /// Whether any spawn point exists at all with this margin.
    pub fn has_spawn_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.fallback_point().is_some()
    }

    /// Draws a spawn point outside the road bands.
    pub fn random_spawn_point<R: Rng>(&self, rng: &mut R) -> (f32, f32) {
        for _ in 0..MAX_SPAWN_ATTEMPTS {
            let x = rng.gen_range(0.0..self.width);
            let y = rng.gen_range(0.0..self.height);

            if self.is_clear(x, y) {
                return (x, y);
            }
        }

        // Only reachable when the clear area is degenerate; validated configs
        // always have a fallback.
        self.fallback_point().unwrap_or((0.0, 0.0))
    }
}
