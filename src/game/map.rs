//! Tiled game map
//!
//! Maps are generated deterministically from the map name, so every process
//! hosting (or replaying) a game materializes the same terrain without any
//! asset pipeline.

use serde::{Deserialize, Serialize};

use super::random::GameRng;

/// Index of one tile in row-major order.
pub type TileIdx = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Land,
    Water,
}

/// The game board: a fixed grid of land and water tiles.
pub struct GameMap {
    width: u32,
    height: u32,
    terrain: Vec<Terrain>,
}

impl GameMap {
    pub const DEFAULT_SIZE: u32 = 64;

    /// Generate the map for a named map. The name seeds the generator, so
    /// "highlands" is the same board everywhere.
    pub fn generate(name: &str) -> Self {
        Self::generate_sized(name, Self::DEFAULT_SIZE, Self::DEFAULT_SIZE)
    }

    pub fn generate_sized(name: &str, width: u32, height: u32) -> Self {
        let mut rng = GameRng::fork(name, "terrain");
        let mut terrain = vec![Terrain::Water; (width * height) as usize];

        // Land is grown by random walks from a handful of seed continents.
        // Walk length is tuned to give roughly 40-55% land coverage.
        let continents = 3 + rng.gen_range_u32(0, 3);
        let steps_per_walk = (width * height) / 4;
        for _ in 0..continents {
            let mut x = rng.gen_range_u32(width / 4, width - width / 4);
            let mut y = rng.gen_range_u32(height / 4, height - height / 4);
            for _ in 0..steps_per_walk {
                terrain[(y * width + x) as usize] = Terrain::Land;
                match rng.gen_range_u32(0, 4) {
                    0 if x > 1 => x -= 1,
                    1 if x < width - 2 => x += 1,
                    2 if y > 1 => y -= 1,
                    _ if y < height - 2 => y += 1,
                    _ => {}
                }
            }
        }

        Self {
            width,
            height,
            terrain,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_count(&self) -> u32 {
        self.width * self.height
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    pub fn tile(&self, x: u32, y: u32) -> TileIdx {
        y * self.width + x
    }

    pub fn xy(&self, tile: TileIdx) -> (u32, u32) {
        (tile % self.width, tile / self.width)
    }

    pub fn terrain(&self, tile: TileIdx) -> Terrain {
        self.terrain[tile as usize]
    }

    pub fn is_land(&self, tile: TileIdx) -> bool {
        self.terrain(tile) == Terrain::Land
    }

    pub fn is_water(&self, tile: TileIdx) -> bool {
        self.terrain(tile) == Terrain::Water
    }

    pub fn land_tiles(&self) -> u32 {
        self.terrain.iter().filter(|t| **t == Terrain::Land).count() as u32
    }

    /// 4-neighborhood of a tile, in deterministic (N, S, W, E) order.
    pub fn neighbors(&self, tile: TileIdx) -> Vec<TileIdx> {
        let (x, y) = self.xy(tile);
        let mut out = Vec::with_capacity(4);
        if y > 0 {
            out.push(self.tile(x, y - 1));
        }
        if y + 1 < self.height {
            out.push(self.tile(x, y + 1));
        }
        if x > 0 {
            out.push(self.tile(x - 1, y));
        }
        if x + 1 < self.width {
            out.push(self.tile(x + 1, y));
        }
        out
    }

    /// Chebyshev distance between two tiles.
    pub fn distance(&self, a: TileIdx, b: TileIdx) -> u32 {
        let (ax, ay) = self.xy(a);
        let (bx, by) = self.xy(b);
        ax.abs_diff(bx).max(ay.abs_diff(by))
    }

    /// Manhattan distance, used as the A* heuristic.
    pub fn manhattan(&self, a: TileIdx, b: TileIdx) -> u32 {
        let (ax, ay) = self.xy(a);
        let (bx, by) = self.xy(b);
        ax.abs_diff(bx) + ay.abs_diff(by)
    }

    /// All tiles within a Chebyshev radius, in index order.
    pub fn tiles_within(&self, center: TileIdx, radius: u32) -> Vec<TileIdx> {
        let (cx, cy) = self.xy(center);
        let mut out = Vec::new();
        let y0 = cy.saturating_sub(radius);
        let y1 = (cy + radius).min(self.height - 1);
        let x0 = cx.saturating_sub(radius);
        let x1 = (cx + radius).min(self.width - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                out.push(self.tile(x, y));
            }
        }
        out
    }

    /// A land tile with at least one water neighbor.
    pub fn is_shore(&self, tile: TileIdx) -> bool {
        self.is_land(tile) && self.neighbors(tile).iter().any(|n| self.is_water(*n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic_per_name() {
        let a = GameMap::generate("highlands");
        let b = GameMap::generate("highlands");
        assert_eq!(a.terrain, b.terrain);

        let c = GameMap::generate("archipelago");
        assert_ne!(a.terrain, c.terrain);
    }

    #[test]
    fn map_has_both_terrains() {
        let map = GameMap::generate("highlands");
        let land = map.land_tiles();
        assert!(land > 0, "map should have land");
        assert!(land < map.tile_count(), "map should have water");
    }

    #[test]
    fn neighbors_respect_bounds() {
        let map = GameMap::generate_sized("t", 8, 8);
        assert_eq!(map.neighbors(map.tile(0, 0)).len(), 2);
        assert_eq!(map.neighbors(map.tile(3, 0)).len(), 3);
        assert_eq!(map.neighbors(map.tile(3, 3)).len(), 4);
    }

    #[test]
    fn distances() {
        let map = GameMap::generate_sized("t", 16, 16);
        let a = map.tile(1, 1);
        let b = map.tile(4, 5);
        assert_eq!(map.distance(a, b), 4);
        assert_eq!(map.manhattan(a, b), 7);
    }
}
