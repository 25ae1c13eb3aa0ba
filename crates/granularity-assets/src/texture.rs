use std::path::Path;

use image::ColorType;

use crate::error::AssetError;

/// Pixel format of a loaded texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8-bit RGBA, 4 bytes per texel
    Rgba8,
    /// 32-bit float RGBA, 16 bytes per texel
    Rgba32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// A loaded texture asset with raw, tightly packed texel data.
#[derive(Debug, Clone)]
pub struct TextureAsset {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: TextureFormat,
}

/// Load an image file as a texture. High dynamic range sources (Radiance HDR,
/// OpenEXR, float DDS) keep their range as `Rgba32Float`; everything else is
/// converted to `Rgba8`.
pub fn load_texture(path: &Path) -> Result<TextureAsset, AssetError> {
    let img = image::open(path)
        .map_err(|e| AssetError::ImageLoadFailed(path.to_path_buf(), e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    let is_hdr = matches!(
        img.color(),
        ColorType::Rgb32F | ColorType::Rgba32F | ColorType::Rgb16 | ColorType::Rgba16
    );

    if is_hdr {
        let texels = img.to_rgba32f().into_raw();
        Ok(TextureAsset {
            width,
            height,
            data: texels.iter().flat_map(|v| v.to_ne_bytes()).collect(),
            format: TextureFormat::Rgba32Float,
        })
    } else {
        Ok(TextureAsset {
            width,
            height,
            data: img.to_rgba8().into_raw(),
            format: TextureFormat::Rgba8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_is_reported() {
        let result = load_texture(Path::new("/nonexistent/env.hdr"));
        assert!(matches!(result, Err(AssetError::ImageLoadFailed(..))));
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(TextureFormat::Rgba8.bytes_per_texel(), 4);
        assert_eq!(TextureFormat::Rgba32Float.bytes_per_texel(), 16);
    }
}
