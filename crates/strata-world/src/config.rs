//! Height map configuration.

use crate::error::{Result, WorldError};
use crate::WorldSeed;

/// Highest octave count the fractal noise supports.
pub const MAX_OCTAVES: usize = 32;

/// Height map generator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMapConfig {
    /// Seed for the first image; each recompute advances it by one.
    pub seed: WorldSeed,
    /// Image width in texels.
    pub width: u32,
    /// Image height in texels.
    pub height: u32,
    /// Edge length of the square tiles computed as independent jobs.
    pub tile_size: u32,
    /// Horizontal scale of terrain features, in texels.
    pub scale: f64,
    /// Number of noise octaves for detail.
    pub octaves: usize,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
}

impl Default for HeightMapConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            width: 1024,
            height: 1024,
            tile_size: 128,
            scale: 256.0,
            octaves: 6,
            lacunarity: 2.0,
            persistence: 0.5,
        }
    }
}

impl HeightMapConfig {
    /// Check the configuration before scheduling work.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(WorldError::InvalidConfig(format!(
                "image size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.tile_size == 0 {
            return Err(WorldError::InvalidConfig("tile size is zero".to_string()));
        }
        if !(1..=MAX_OCTAVES).contains(&self.octaves) {
            return Err(WorldError::InvalidConfig(format!(
                "octave count {} outside 1..={MAX_OCTAVES}",
                self.octaves
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(WorldError::InvalidConfig(format!(
                "scale {} must be positive",
                self.scale
            )));
        }
        Ok(())
    }

    /// Number of texels in the image.
    #[must_use]
    pub const fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(HeightMapConfig::default().validate().is_ok());
    }

    #[test]
    fn degenerate_configs_are_rejected() {
        let empty = HeightMapConfig {
            width: 0,
            ..Default::default()
        };
        let no_tiles = HeightMapConfig {
            tile_size: 0,
            ..Default::default()
        };
        let too_many_octaves = HeightMapConfig {
            octaves: MAX_OCTAVES + 1,
            ..Default::default()
        };
        let flat = HeightMapConfig {
            scale: 0.0,
            ..Default::default()
        };

        for config in [empty, no_tiles, too_many_octaves, flat] {
            assert!(matches!(
                config.validate(),
                Err(WorldError::InvalidConfig(_))
            ));
        }
    }
}
