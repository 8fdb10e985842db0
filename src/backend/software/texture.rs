//! Texel storage and sampling for the software device.

use glam::{Vec2, Vec4};
use half::f16;

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{TextureDescriptor, TextureFormat, TextureUsage};
use crate::shading::{linear_to_srgb, srgb_to_linear, HDR_MAX};

/// Address mode used when a sample falls outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Clamp,
    Repeat,
}

/// A texture held in CPU memory as linear RGBA texels.
///
/// Stored values are already quantised to what the format can represent,
/// so reading a texel back gives exactly what a GPU would return.
#[derive(Debug)]
pub struct SoftTexture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub texels: Vec<Vec4>,
}

impl SoftTexture {
    pub fn new(desc: &TextureDescriptor) -> Self {
        let fill = if desc.format.is_depth() {
            Vec4::new(1.0, 0.0, 0.0, 0.0)
        } else {
            Vec4::ZERO
        };
        Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            usage: desc.usage,
            texels: vec![fill; (desc.width as usize) * (desc.height as usize)],
        }
    }

    /// Fail unless the texture was created with every flag in `usage`.
    pub fn require(&self, usage: TextureUsage) -> BackendResult<()> {
        if self.usage.contains(usage) {
            Ok(())
        } else {
            Err(BackendError::MissingUsage(usage - self.usage))
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }

    /// Replace every texel with data in the texture's own byte layout.
    pub fn write_bytes(&mut self, data: &[u8]) -> BackendResult<()> {
        let bpp = self.format.bytes_per_pixel() as usize;
        let expected = self.texels.len() * bpp;
        if data.len() != expected {
            return Err(BackendError::TextureCreationFailed(format!(
                "expected {expected} bytes of texel data, got {}",
                data.len()
            )));
        }
        let format = self.format;
        for (texel, bytes) in self.texels.iter_mut().zip(data.chunks_exact(bpp)) {
            *texel = quantize(format, decode_texel(format, bytes));
        }
        Ok(())
    }

    pub fn clear(&mut self, value: Vec4) {
        let value = quantize(self.format, value);
        self.texels.fill(value);
    }

    pub fn view(&self) -> TexelView<'_> {
        TexelView {
            width: self.width,
            height: self.height,
            texels: &self.texels,
        }
    }
}

/// Read-only access to a texture's texels.
#[derive(Debug, Clone, Copy)]
pub struct TexelView<'a> {
    pub width: u32,
    pub height: u32,
    pub texels: &'a [Vec4],
}

impl<'a> TexelView<'a> {
    /// Fetch one texel, clamping coordinates to the edge.
    pub fn load(&self, x: i64, y: i64) -> Vec4 {
        if self.width == 0 || self.height == 0 {
            return Vec4::ZERO;
        }
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.texels
            .get(y * self.width as usize + x)
            .copied()
            .unwrap_or(Vec4::ZERO)
    }

    /// Bilinear sample at a normalized coordinate (texel centers at `(i + 0.5) / size`).
    pub fn sample(&self, uv: Vec2, wrap: Wrap) -> Vec4 {
        if self.width == 0 || self.height == 0 {
            return Vec4::ZERO;
        }
        let uv = match wrap {
            Wrap::Clamp => uv.clamp(Vec2::ZERO, Vec2::ONE),
            Wrap::Repeat => uv - uv.floor(),
        };
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let fetch = |tx: i64, ty: i64| match wrap {
            Wrap::Clamp => self.load(tx, ty),
            Wrap::Repeat => self.load(
                tx.rem_euclid(self.width as i64),
                ty.rem_euclid(self.height as i64),
            ),
        };

        let top = fetch(x0, y0).lerp(fetch(x0 + 1, y0), fx);
        let bottom = fetch(x0, y0 + 1).lerp(fetch(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

/// A texture temporarily moved out of the texture table to be rendered into.
#[derive(Debug)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub texels: Vec<Vec4>,
}

impl RenderTarget {
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.texels[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        let index = (y * self.width + x) as usize;
        self.texels[index] = quantize(self.format, value);
    }
}

/// Round a value to what `format` can store.
pub fn quantize(format: TextureFormat, value: Vec4) -> Vec4 {
    let finite = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(f32::MIN, f32::MAX) };
    let v = Vec4::new(
        finite(value.x),
        finite(value.y),
        finite(value.z),
        finite(value.w),
    );
    let unorm8 = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0;
    match format {
        TextureFormat::Rgba8Unorm => Vec4::new(unorm8(v.x), unorm8(v.y), unorm8(v.z), unorm8(v.w)),
        TextureFormat::Rgba8UnormSrgb => {
            let encode = |c: f32| srgb_to_linear(unorm8(linear_to_srgb(c.clamp(0.0, 1.0))));
            Vec4::new(encode(v.x), encode(v.y), encode(v.z), unorm8(v.w))
        }
        TextureFormat::Rgba16Float => {
            let half = |c: f32| f16::from_f32(c.clamp(-HDR_MAX, HDR_MAX)).to_f32();
            Vec4::new(half(v.x), half(v.y), half(v.z), half(v.w))
        }
        TextureFormat::Rgba32Float => v,
        TextureFormat::R32Uint => Vec4::new(v.x.max(0.0).round(), 0.0, 0.0, 0.0),
        TextureFormat::Depth32Float => Vec4::new(v.x.clamp(0.0, 1.0), 0.0, 0.0, 0.0),
    }
}

/// Decode one texel stored little-endian in `format` to linear RGBA.
pub fn decode_texel(format: TextureFormat, bytes: &[u8]) -> Vec4 {
    let f32_at = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    match format {
        TextureFormat::Rgba8Unorm => Vec4::new(
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            bytes[3] as f32 / 255.0,
        ),
        TextureFormat::Rgba8UnormSrgb => Vec4::new(
            srgb_to_linear(bytes[0] as f32 / 255.0),
            srgb_to_linear(bytes[1] as f32 / 255.0),
            srgb_to_linear(bytes[2] as f32 / 255.0),
            bytes[3] as f32 / 255.0,
        ),
        TextureFormat::Rgba16Float => {
            let h = |i: usize| f16::from_le_bytes([bytes[i], bytes[i + 1]]).to_f32();
            Vec4::new(h(0), h(2), h(4), h(6))
        }
        TextureFormat::Rgba32Float => Vec4::new(f32_at(0), f32_at(4), f32_at(8), f32_at(12)),
        TextureFormat::R32Uint => {
            let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Vec4::new(value as f32, 0.0, 0.0, 0.0)
        }
        TextureFormat::Depth32Float => Vec4::new(f32_at(0), 0.0, 0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(format: TextureFormat, width: u32, height: u32) -> SoftTexture {
        SoftTexture::new(&TextureDescriptor {
            label: None,
            width,
            height,
            format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        let mut tex = texture(TextureFormat::Rgba8Unorm, 2, 2);
        assert!(tex.write_bytes(&[0; 15]).is_err());
        assert!(tex.write_bytes(&[255; 16]).is_ok());
        assert_eq!(tex.texels[3], Vec4::ONE);
    }

    #[test]
    fn test_quantize_unorm_and_nan() {
        let q = quantize(TextureFormat::Rgba8Unorm, Vec4::new(f32::NAN, 2.0, -1.0, 0.5));
        assert_eq!(q.x, 0.0);
        assert_eq!(q.y, 1.0);
        assert_eq!(q.z, 0.0);
        assert!((q.w - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_hdr_keeps_large_values() {
        let q = quantize(TextureFormat::Rgba16Float, Vec4::splat(42.0));
        assert_eq!(q, Vec4::splat(42.0));
    }

    #[test]
    fn test_overbright_half_floats_saturate() {
        let q = quantize(
            TextureFormat::Rgba16Float,
            Vec4::new(1e6, f32::INFINITY, -1e9, f32::NAN),
        );
        assert_eq!(q, Vec4::new(HDR_MAX, HDR_MAX, -HDR_MAX, 0.0));
        assert!(q.is_finite());
    }

    #[test]
    fn test_bilinear_sample_between_texels() {
        let mut tex = texture(TextureFormat::Rgba32Float, 2, 1);
        tex.texels = vec![Vec4::ZERO, Vec4::ONE];
        let mid = tex.view().sample(Vec2::new(0.5, 0.5), Wrap::Clamp);
        assert!((mid - Vec4::splat(0.5)).length() < 1e-6);
        let left = tex.view().sample(Vec2::new(0.25, 0.5), Wrap::Clamp);
        assert_eq!(left, Vec4::ZERO);
        // Repeat blends the right edge with the first column.
        let wrapped = tex.view().sample(Vec2::new(1.0, 0.5), Wrap::Repeat);
        assert!((wrapped - Vec4::splat(0.5)).length() < 1e-6);
    }

    #[test]
    fn test_load_clamps_to_edge() {
        let mut tex = texture(TextureFormat::Rgba32Float, 2, 1);
        tex.texels = vec![Vec4::ZERO, Vec4::ONE];
        assert_eq!(tex.view().load(-5, 0), Vec4::ZERO);
        assert_eq!(tex.view().load(9, 3), Vec4::ONE);
    }
}
