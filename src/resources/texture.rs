//! Texture data and the path-keyed texture cache

use std::collections::HashMap;
use std::path::{Component, Path};

use half::f16;
use image::{DynamicImage, GenericImageView};

use crate::backend::{
    BackendError, BackendResult, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle,
    TextureUsage,
};

/// Decoded texel data ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Tightly packed RGBA8 pixels. Fails when `data` does not cover the size.
    pub fn rgba8(width: u32, height: u32, data: Vec<u8>, name: &str) -> Result<Self, String> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(format!(
                "texture '{name}' is {width}x{height} but has {} bytes",
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: name.to_string(),
        })
    }

    /// Decode an image file. The cache key stays the caller's path.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| format!("{path}: {e}"))?;
        Ok(Self::from_image(img, &name))
    }

    /// Decode an encoded image (PNG, JPEG, HDR) from memory
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, String> {
        let img = image::load_from_memory(bytes).map_err(|e| format!("{name}: {e}"))?;
        Ok(Self::from_image(img, name))
    }

    /// Float images (HDR irradiance maps) keep their range as filterable
    /// `Rgba16Float`; everything else becomes sRGB RGBA8.
    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        match img {
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => Self {
                width,
                height,
                format: TextureFormat::Rgba16Float,
                data: img
                    .to_rgba32f()
                    .as_raw()
                    .iter()
                    .flat_map(|v| f16::from_f32(*v).to_le_bytes())
                    .collect(),
                name: name.to_string(),
            },
            _ => Self {
                width,
                height,
                format: TextureFormat::Rgba8UnormSrgb,
                data: img.to_rgba8().into_raw(),
                name: name.to_string(),
            },
        }
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Flat tangent-space normal, stored linear
    pub fn default_normal() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            ..Self::solid_color([128, 128, 255, 255], "default_normal")
        }
    }

    /// Checkerboard with 8x8 pixel cells
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                data.extend_from_slice(if is_even { &color1 } else { &color2 });
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }

    /// Create the device texture and upload the texels
    pub fn upload<B: GraphicsBackend>(&self, backend: &mut B) -> BackendResult<TextureHandle> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            format: self.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        if let Err(err) = backend.write_texture(handle, &self.data) {
            backend.destroy_texture(handle);
            return Err(err);
        }
        Ok(handle)
    }
}

/// Normalize a texture path so that different spellings of the same file
/// share one cache entry.
///
/// Separators become `/`, `.` segments and repeated separators are dropped,
/// and `..` is resolved lexically. A `..` that climbs above a relative root
/// is kept.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
            Component::ParentDir => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[derive(Debug)]
struct CacheEntry {
    path: String,
    ref_count: u32,
}

/// Reference-counted textures keyed by normalized path.
///
/// The cache is the only owner of the device textures it creates; callers
/// hold plain [`TextureHandle`]s and give them back with `release`.
#[derive(Debug, Default)]
pub struct TextureCache {
    by_path: HashMap<String, TextureHandle>,
    entries: HashMap<TextureHandle, CacheEntry>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the texture for `path`, loading it on first use.
    ///
    /// Every successful call adds one reference. Loader failures are reported
    /// as [`BackendError::TextureCreationFailed`] and leave the cache unchanged.
    pub fn acquire<B, F>(&mut self, backend: &mut B, path: &str, loader: F) -> BackendResult<TextureHandle>
    where
        B: GraphicsBackend,
        F: FnOnce(&str) -> Result<TextureData, String>,
    {
        let key = normalize_path(path);
        if let Some(&handle) = self.by_path.get(&key) {
            if let Some(entry) = self.entries.get_mut(&handle) {
                entry.ref_count += 1;
                return Ok(handle);
            }
        }

        let data = loader(&key).map_err(|err| {
            log::warn!("Failed to load texture '{key}': {err}");
            BackendError::TextureCreationFailed(format!("{key}: {err}"))
        })?;
        let handle = data.upload(backend)?;
        log::debug!("Loaded texture '{key}' ({}x{})", data.width, data.height);
        self.by_path.insert(key.clone(), handle);
        self.entries.insert(
            handle,
            CacheEntry {
                path: key,
                ref_count: 1,
            },
        );
        Ok(handle)
    }

    /// Drop one reference; the device texture is destroyed with the last one.
    /// Returns false for handles the cache does not own.
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B, handle: TextureHandle) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            log::warn!("Released texture {handle:?} that the cache does not own");
            return false;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            if let Some(entry) = self.entries.remove(&handle) {
                self.by_path.remove(&entry.path);
                log::debug!("Destroyed texture '{}'", entry.path);
            }
            backend.destroy_texture(handle);
        }
        true
    }

    pub fn ref_count(&self, handle: TextureHandle) -> u32 {
        self.entries.get(&handle).map_or(0, |e| e.ref_count)
    }

    pub fn get(&self, path: &str) -> Option<TextureHandle> {
        self.by_path.get(&normalize_path(path)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroy every cached texture regardless of reference counts
    pub fn clear<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (handle, _) in self.entries.drain() {
            backend.destroy_texture(handle);
        }
        self.by_path.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use rstest::rstest;

    #[rstest]
    #[case("textures/brick.png", "textures/brick.png")]
    #[case("textures\\brick.png", "textures/brick.png")]
    #[case("./textures//brick.png", "textures/brick.png")]
    #[case("textures/old/../brick.png", "textures/brick.png")]
    #[case("../shared/brick.png", "../shared/brick.png")]
    #[case("/assets/./a/../brick.png", "/assets/brick.png")]
    fn test_normalize_path(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_path(input), expected);
    }

    #[test]
    fn test_decode_png_from_memory() {
        let pixels = image::RgbaImage::from_raw(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 128]).unwrap();
        let mut encoded = Vec::new();
        DynamicImage::ImageRgba8(pixels)
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageOutputFormat::Png)
            .unwrap();

        let data = TextureData::from_bytes(&encoded, "two_pixels").unwrap();
        assert_eq!((data.width, data.height), (2, 1));
        assert_eq!(data.format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(data.data, vec![255, 0, 0, 255, 0, 0, 255, 128]);
    }

    #[test]
    fn test_undecodable_images_are_errors() {
        assert!(TextureData::from_bytes(b"not an image", "junk").is_err());
        assert!(TextureData::from_file("missing/nothing_here.png").is_err());
    }

    #[test]
    fn test_acquire_loads_once_and_release_destroys_last() {
        let mut backend = SoftwareBackend::new();
        let mut cache = TextureCache::new();
        let mut loads = 0;

        let first = cache
            .acquire(&mut backend, "tex/a.png", |_| {
                loads += 1;
                Ok(TextureData::white())
            })
            .unwrap();
        let second = cache
            .acquire(&mut backend, "tex/./a.png", |_| {
                loads += 1;
                Ok(TextureData::white())
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(loads, 1);
        assert_eq!(cache.ref_count(first), 2);
        assert_eq!(backend.live_texture_count(), 1);

        assert!(cache.release(&mut backend, first));
        assert_eq!(backend.live_texture_count(), 1);
        assert!(cache.release(&mut backend, first));
        assert_eq!(backend.live_texture_count(), 0);
        assert!(cache.is_empty());
        assert!(!cache.release(&mut backend, first));
    }

    #[test]
    fn test_loader_failure_leaves_cache_untouched() {
        let mut backend = SoftwareBackend::new();
        let mut cache = TextureCache::new();
        let result = cache.acquire(&mut backend, "missing.png", |_| Err("not found".into()));
        assert!(matches!(result, Err(BackendError::TextureCreationFailed(_))));
        assert!(cache.get("missing.png").is_none());
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_rgba8_checks_length() {
        assert!(TextureData::rgba8(2, 2, vec![0; 16], "ok").is_ok());
        assert!(TextureData::rgba8(2, 2, vec![0; 15], "short").is_err());
        assert_eq!(TextureData::checkerboard(16, [0; 4], [255; 4]).data.len(), 16 * 16 * 4);
    }
}
