//! Adaptive image packer.
//!
//! Shrinks a local image until its encoded bytes fit a budget so it can be
//! embedded (base64) into a workflow. Files already under budget are
//! passed through untouched. Anything larger is flattened onto white,
//! downscaled to `max_dimension`, then re-encoded as JPEG at decreasing
//! quality, and finally shrunk in 20% steps until it fits or the longer
//! side would drop below [`MIN_DIMENSION`].
//!
//! Decoding and encoding live behind the `image-codec` cargo feature. When
//! the feature is off, only the pass-through path works and oversized
//! inputs fail with [`CoreError::MissingDependency`].

use std::path::Path;

use crate::error::CoreError;

/// Default payload budget in bytes.
pub const DEFAULT_MAX_BYTES: u64 = 1_000_000;
/// Default cap on the longer image side, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
/// Default first JPEG quality tried.
pub const DEFAULT_START_QUALITY: u8 = 85;
/// Default lowest JPEG quality before dimensions are reduced instead.
pub const DEFAULT_MIN_QUALITY: u8 = 20;

/// JPEG quality decrement per attempt.
pub const QUALITY_STEP: i32 = 5;
/// Per-attempt scale factor once quality is exhausted.
pub const SCALE_STEP: f64 = 0.8;
/// No downscaling below this longer-side length.
pub const MIN_DIMENSION: u32 = 128;

/// Budget and quality bounds for [`pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    pub max_bytes: u64,
    pub max_dimension: u32,
    pub start_quality: u8,
    pub min_quality: u8,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_dimension: DEFAULT_MAX_DIMENSION,
            start_quality: DEFAULT_START_QUALITY,
            min_quality: DEFAULT_MIN_QUALITY,
        }
    }
}

/// Result of [`pack`].
#[derive(Debug, Clone)]
pub struct PackedImage {
    pub bytes: Vec<u8>,
    /// Original file name, or the same stem with `.jpg` when re-encoded.
    pub file_name: String,
    pub recompressed: bool,
}

/// Whether this build can decode and re-encode images.
pub fn codec_available() -> bool {
    cfg!(feature = "image-codec")
}

/// Produce a payload for `path` that fits `options.max_bytes` when possible.
///
/// Returns the best effort reached at the dimension floor rather than
/// failing when the budget cannot be met.
pub fn pack(path: impl AsRef<Path>, options: &PackOptions) -> Result<PackedImage, CoreError> {
    let path = path.as_ref();
    let raw_len = std::fs::metadata(path)?.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    if raw_len <= options.max_bytes {
        return Ok(PackedImage {
            bytes: std::fs::read(path)?,
            file_name,
            recompressed: false,
        });
    }

    tracing::debug!(
        path = %path.display(),
        raw_len,
        max_bytes = options.max_bytes,
        "Image over budget, recompressing",
    );
    let bytes = codec::recompress(path, options)?;
    tracing::debug!(path = %path.display(), packed_len = bytes.len(), "Image packed");

    Ok(PackedImage {
        bytes,
        file_name: jpeg_name(&file_name),
        recompressed: true,
    })
}

/// Replace the extension of `name` with `.jpg`.
pub fn jpeg_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    format!("{stem}.jpg")
}

#[cfg(feature = "image-codec")]
mod codec {
    use std::path::Path;

    use image::codecs::jpeg::JpegEncoder;
    use image::imageops::{self, FilterType};
    use image::{DynamicImage, ImageReader, Rgb, RgbImage};

    use super::{PackOptions, MIN_DIMENSION, QUALITY_STEP, SCALE_STEP};
    use crate::error::CoreError;

    pub(super) fn recompress(path: &Path, options: &PackOptions) -> Result<Vec<u8>, CoreError> {
        let decoded = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| {
                CoreError::UnsupportedInput(format!("Failed to decode {}: {e}", path.display()))
            })?;

        let mut rgb = flatten_onto_white(decoded);

        let (width, height) = rgb.dimensions();
        let longer = width.max(height);
        if longer > options.max_dimension {
            let scale = f64::from(options.max_dimension) / f64::from(longer);
            let w = ((f64::from(width) * scale).round() as u32).max(1);
            let h = ((f64::from(height) * scale).round() as u32).max(1);
            rgb = imageops::resize(&rgb, w, h, FilterType::Lanczos3);
        }

        let floor = options.min_quality.clamp(1, 100);
        let effective = |q: i32| q.clamp(i32::from(floor), 100) as u8;
        let budget = options.max_bytes;

        let mut quality = i32::from(options.start_quality);
        let mut data = encode_jpeg(&rgb, effective(quality))?;
        while data.len() as u64 > budget && quality >= i32::from(floor) {
            quality -= QUALITY_STEP;
            data = encode_jpeg(&rgb, effective(quality))?;
        }

        while data.len() as u64 > budget {
            let (width, height) = rgb.dimensions();
            let w = ((f64::from(width) * SCALE_STEP) as u32).max(1);
            let h = ((f64::from(height) * SCALE_STEP) as u32).max(1);
            if w.max(h) < MIN_DIMENSION {
                tracing::debug!(
                    width,
                    height,
                    len = data.len(),
                    "Dimension floor reached, keeping best effort",
                );
                break;
            }
            rgb = imageops::resize(&rgb, w, h, FilterType::Lanczos3);
            data = encode_jpeg(&rgb, floor)?;
        }

        Ok(data)
    }

    fn flatten_onto_white(image: DynamicImage) -> RgbImage {
        if !image.color().has_alpha() {
            return image.to_rgb8();
        }
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        RgbImage::from_fn(width, height, |x, y| {
            let [r, g, b, a] = rgba.get_pixel(x, y).0;
            Rgb([blend(r, a), blend(g, a), blend(b, a)])
        })
    }

    fn blend(channel: u8, alpha: u8) -> u8 {
        let a = u32::from(alpha);
        ((u32::from(channel) * a + 255 * (255 - a) + 127) / 255) as u8
    }

    fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality)
            .encode_image(image)
            .map_err(|e| CoreError::UnsupportedInput(format!("JPEG encoding failed: {e}")))?;
        Ok(buf)
    }
}

#[cfg(not(feature = "image-codec"))]
mod codec {
    use std::path::Path;

    use super::PackOptions;
    use crate::error::CoreError;

    pub(super) fn recompress(path: &Path, _options: &PackOptions) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::MissingDependency(format!(
            "{} exceeds the size budget and resizing requires the `image-codec` feature",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn under_budget_returns_exact_bytes_without_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-really-an-image.png");
        let bytes = b"opaque payload the packer must not touch".to_vec();
        std::fs::write(&path, &bytes).unwrap();

        let packed = pack(&path, &PackOptions::default()).unwrap();
        assert_eq!(packed.bytes, bytes);
        assert_eq!(packed.file_name, "not-really-an-image.png");
        assert!(!packed.recompressed);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            pack(dir.path().join("absent.png"), &PackOptions::default()),
            Err(CoreError::Io(_))
        );
    }

    #[test]
    fn jpeg_name_swaps_extension() {
        assert_eq!(jpeg_name("photo.png"), "photo.jpg");
        assert_eq!(jpeg_name("scan"), "scan.jpg");
        assert_eq!(jpeg_name("archive.tar.webp"), "archive.tar.jpg");
    }

    #[cfg(not(feature = "image-codec"))]
    #[test]
    fn oversized_input_without_codec_is_missing_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        let options = PackOptions {
            max_bytes: 10,
            ..PackOptions::default()
        };
        assert_matches!(pack(&path, &options), Err(CoreError::MissingDependency(_)));
    }

    #[cfg(feature = "image-codec")]
    mod codec_tests {
        use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};
        use rand::Rng;

        use super::*;

        fn noise_png(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
            let mut rng = rand::rng();
            let img = RgbImage::from_fn(width, height, |_, _| Rgb(rng.random::<[u8; 3]>()));
            let path = dir.join(name);
            img.save(&path).unwrap();
            path
        }

        #[test]
        fn oversized_image_fits_default_budget() {
            let dir = tempfile::tempdir().unwrap();
            let path = noise_png(dir.path(), "noise.png", 1000, 700);
            assert!(std::fs::metadata(&path).unwrap().len() > DEFAULT_MAX_BYTES);

            let packed = pack(&path, &PackOptions::default()).unwrap();
            assert!(packed.recompressed);
            assert_eq!(packed.file_name, "noise.jpg");

            let decoded = image::load_from_memory(&packed.bytes).unwrap();
            let longer = decoded.width().max(decoded.height());
            assert!(packed.bytes.len() as u64 <= DEFAULT_MAX_BYTES || longer < 160);
        }

        #[test]
        fn downscales_to_max_dimension_preserving_aspect() {
            let dir = tempfile::tempdir().unwrap();
            let path = noise_png(dir.path(), "wide.png", 1200, 600);
            let options = PackOptions {
                max_bytes: 1,
                max_dimension: 400,
                ..PackOptions::default()
            };

            // Budget is unreachable, so the result is the floor-sized attempt.
            let packed = pack(&path, &options).unwrap();
            let decoded = image::load_from_memory(&packed.bytes).unwrap();
            let (w, h) = decoded.dimensions();
            assert!(w >= MIN_DIMENSION && w < 160, "width {w}");
            assert!((w as f64 / h as f64 - 2.0).abs() < 0.05, "{w}x{h}");
        }

        #[test]
        fn unreachable_budget_stops_at_dimension_floor() {
            let dir = tempfile::tempdir().unwrap();
            let path = noise_png(dir.path(), "square.png", 600, 600);
            let options = PackOptions {
                max_bytes: 1,
                max_dimension: 512,
                ..PackOptions::default()
            };

            let packed = pack(&path, &options).unwrap();
            assert!(!packed.bytes.is_empty());
            let decoded = image::load_from_memory(&packed.bytes).unwrap();
            // 512 -> 409 -> 327 -> 261 -> 208 -> 166 -> 132, next would be 105.
            assert_eq!(decoded.width(), 132);
        }

        #[test]
        fn transparency_is_flattened_onto_white() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("clear.png");
            RgbaImage::from_pixel(300, 300, Rgba([0, 0, 0, 0]))
                .save(&path)
                .unwrap();
            let options = PackOptions {
                max_bytes: 10,
                ..PackOptions::default()
            };

            let packed = pack(&path, &options).unwrap();
            let decoded = image::load_from_memory(&packed.bytes).unwrap().to_rgb8();
            let Rgb([r, g, b]) = *decoded.get_pixel(decoded.width() / 2, decoded.height() / 2);
            assert!(r > 240 && g > 240 && b > 240, "got {r},{g},{b}");
        }

        #[test]
        fn undecodable_input_is_unsupported() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("junk.png");
            std::fs::write(&path, vec![0x5a; 4096]).unwrap();
            let options = PackOptions {
                max_bytes: 100,
                ..PackOptions::default()
            };
            assert_matches!(pack(&path, &options), Err(CoreError::UnsupportedInput(_)));
        }
    }
}
