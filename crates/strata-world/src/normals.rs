//! Normal maps derived from height maps.

use glam::Vec3;

/// Pack a unit normal into RGBA8 with alpha 255.
#[must_use]
pub fn pack_normal(normal: Vec3) -> u32 {
    let n = (normal.normalize_or_zero() * 0.5 + Vec3::splat(0.5)) * 255.0;
    let [x, y, z] = n.round().clamp(Vec3::ZERO, Vec3::splat(255.0)).to_array();
    // Clamped to 0..=255 above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (x, y, z) = (x as u32, y as u32, z as u32);
    (255 << 24) | (z << 16) | (y << 8) | x
}

/// Inverse of [`pack_normal`], up to quantization.
#[must_use]
pub fn unpack_normal(packed: u32) -> Vec3 {
    let channel = |shift: u32| f32::from(((packed >> shift) & 0xff) as u8) / 255.0;
    Vec3::new(channel(0), channel(8), channel(16)) * 2.0 - Vec3::ONE
}

/// Fill `normals` with the surface normals of `heights`.
///
/// Gradients use central differences with wrap-around at the edges, in a
/// space where the image spans one unit on each axis.
pub fn fill_normals(heights: &[f32], width: u32, height: u32, normals: &mut [u32]) {
    debug_assert_eq!(heights.len(), width as usize * height as usize);
    debug_assert_eq!(normals.len(), heights.len());

    let (w, h) = (width as usize, height as usize);
    #[allow(clippy::cast_precision_loss)]
    let (texel_x, texel_y) = (1.0 / w as f32, 1.0 / h as f32);
    let sample = |x: usize, y: usize| heights[y * w + x];

    for y in 0..h {
        let (y0, y1) = ((y + h - 1) % h, (y + 1) % h);
        for x in 0..w {
            let (x0, x1) = ((x + w - 1) % w, (x + 1) % w);
            let dhdx = (sample(x1, y) - sample(x0, y)) / (2.0 * texel_x);
            let dhdy = (sample(x, y1) - sample(x, y0)) / (2.0 * texel_y);
            normals[y * w + x] = pack_normal(Vec3::new(-dhdx, -dhdy, 1.0));
        }
    }
}
