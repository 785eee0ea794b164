//! Splitting an image into independently computed tiles.

use glam::UVec2;

/// A rectangle of texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    /// Top-left corner.
    pub origin: UVec2,
    /// Width and height.
    pub size: UVec2,
}

impl TileRect {
    /// Number of texels covered.
    #[must_use]
    pub const fn texel_count(&self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    /// Iterate over the absolute coordinates of every texel, row by row.
    pub fn texels(&self) -> impl Iterator<Item = UVec2> + '_ {
        (0..self.size.y).flat_map(move |y| {
            (0..self.size.x).map(move |x| self.origin + UVec2::new(x, y))
        })
    }
}

/// Square tiles covering an image; tiles on the right and bottom edges are
/// clipped to the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    extent: UVec2,
    tiles: Vec<TileRect>,
}

impl TileLayout {
    /// Tile a `width` x `height` image with tiles of `tile_size`.
    #[must_use]
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let extent = UVec2::new(width, height);
        let tile = UVec2::splat(tile_size.max(1));
        let counts = (extent + tile - UVec2::ONE) / tile;

        let mut tiles = Vec::with_capacity((counts.x * counts.y) as usize);
        for ty in 0..counts.y {
            for tx in 0..counts.x {
                let origin = UVec2::new(tx, ty) * tile;
                let size = (extent - origin).min(tile);
                tiles.push(TileRect { origin, size });
            }
        }

        Self { extent, tiles }
    }

    /// Image size.
    #[must_use]
    pub const fn extent(&self) -> UVec2 {
        self.extent
    }

    /// Every tile, row-major.
    #[must_use]
    pub fn tiles(&self) -> &[TileRect] {
        &self.tiles
    }

    /// Number of tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the layout has no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
