use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::config::PreprocessConfig;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

pub fn load(path: &Path) -> Result<DynamicImage, PreprocessError> {
    Ok(image::open(path)?)
}

pub fn decode(data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    Ok(image::load_from_memory(data)?)
}

/// Load an image file, clean it up, and return PNG bytes ready for OCR.
pub fn prepare_for_ocr(path: &Path, cfg: &PreprocessConfig) -> Result<Vec<u8>, PreprocessError> {
    encode_as_png(&preprocess(&load(path)?, cfg))
}

/// Process raw image bytes (JPEG / PNG / WEBP / …) and return cleaned PNG bytes.
pub fn prepare_for_ocr_from_bytes(
    data: &[u8],
    cfg: &PreprocessConfig,
) -> Result<Vec<u8>, PreprocessError> {
    encode_as_png(&preprocess(&decode(data)?, cfg))
}

/// Grayscale, adaptive equalization, local threshold, median, dilation.
///
/// Contrast is normalized before thresholding; denoising and dilation only
/// ever see the binary image.
pub fn preprocess(img: &DynamicImage, cfg: &PreprocessConfig) -> GrayImage {
    let gray = if cfg.max_edge > 0 && (img.width() > cfg.max_edge || img.height() > cfg.max_edge) {
        img.resize(cfg.max_edge, cfg.max_edge, FilterType::Lanczos3).to_luma8()
    } else {
        img.to_luma8()
    };

    let equalized = equalize_adaptive(&gray, cfg.clahe_tiles, cfg.clahe_clip_limit);
    let binary = adaptive_threshold(&equalized, cfg.threshold_block_size, cfg.threshold_offset);
    let denoised = median_filter(&binary, cfg.median_kernel);
    dilate(&denoised, cfg.dilate_kernel, cfg.dilate_iterations)
}

pub fn encode_as_png(img: &GrayImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

// ── Contrast-limited adaptive histogram equalization ─────────────────────────

/// Equalize each tile of a `tiles × tiles` grid separately, clipping every
/// histogram bin at `clip_limit` times the mean bin height. Each output pixel
/// blends the mappings of the four nearest tile centres bilinearly.
pub fn equalize_adaptive(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let tiles_x = tiles.clamp(1, w);
    let tiles_y = tiles.clamp(1, h);
    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;
    let tile_of = |p: u32, size: f32, n: u32| ((p as f32 / size) as u32).min(n - 1);

    let mut hists = vec![[0u32; 256]; (tiles_x * tiles_y) as usize];
    for (x, y, p) in gray.enumerate_pixels() {
        let t = tile_of(y, tile_h, tiles_y) * tiles_x + tile_of(x, tile_w, tiles_x);
        hists[t as usize][p[0] as usize] += 1;
    }
    let luts: Vec<[u8; 256]> = hists.iter().map(|hist| tile_lut(hist, clip_limit)).collect();

    ImageBuffer::from_fn(w, h, |x, y| {
        let (tx0, tx1, ax) = neighbour_tiles(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbour_tiles(y, tile_h, tiles_y);
        let v = gray.get_pixel(x, y)[0] as usize;
        let mapped = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;

        let top = mapped(tx0, ty0) * (1.0 - ax) + mapped(tx1, ty0) * ax;
        let bottom = mapped(tx0, ty1) * (1.0 - ax) + mapped(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// The two tile indices whose centres bracket pixel `p`, and the weight of the second.
fn neighbour_tiles(p: u32, size: f32, n: u32) -> (u32, u32, f32) {
    let pos = (p as f32 + 0.5) / size - 0.5;
    if pos <= 0.0 {
        return (0, 0, 0.0);
    }
    let lo = pos.floor() as u32;
    if lo >= n - 1 {
        return (n - 1, n - 1, 0.0);
    }
    (lo, lo + 1, pos - lo as f32)
}

fn tile_lut(hist: &[u32; 256], clip_limit: f32) -> [u8; 256] {
    let area: u32 = hist.iter().sum();
    let mut hist = *hist;

    if clip_limit > 0.0 {
        let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }

        // Spread the clipped mass evenly, then the remainder one count at a time.
        let batch = excess / 256;
        let mut residual = excess % 256;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1) as usize;
            for bin in hist.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *bin += 1;
                residual -= 1;
            }
        }
    }

    let scale = if area > 0 { 255.0 / area as f32 } else { 0.0 };
    let mut lut = [0u8; 256];
    let mut sum = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        sum += bin;
        lut[i] = (sum as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

// ── Local thresholding ───────────────────────────────────────────────────────

/// Binarize against a Gaussian-weighted local mean over a `block_size` window:
/// white where the pixel exceeds `mean - offset`, black elsewhere.
pub fn adaptive_threshold(gray: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let block = block_size.max(3) | 1;
    let sigma = 0.3 * ((block as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let mean = gaussian_blur(gray, &gaussian_kernel(block as usize, sigma));

    ImageBuffer::from_fn(w, h, |x, y| {
        let p = gray.get_pixel(x, y)[0] as f32;
        let local = mean[(y * w + x) as usize];
        Luma([if p > local - offset { 255 } else { 0 }])
    })
}

fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let r = (size / 2) as f32;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - r;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|v| v / total).collect()
}

/// Separable convolution with edge pixels replicated outward.
fn gaussian_blur(gray: &GrayImage, kernel: &[f32]) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let r = (kernel.len() / 2) as isize;
    let src: Vec<f32> = gray.pixels().map(|p| p[0] as f32).collect();
    let clamp = |v: isize, n: usize| v.clamp(0, n as isize - 1) as usize;

    let mut horizontal = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            horizontal[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, wt)| wt * src[y * w + clamp(x as isize + k as isize - r, w)])
                .sum();
        }
    }

    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, wt)| wt * horizontal[clamp(y as isize + k as isize - r, h) * w + x])
                .sum();
        }
    }
    out
}

// ── Morphology ───────────────────────────────────────────────────────────────

/// Square median filter; even sizes are rounded up to the next odd one.
pub fn median_filter(img: &GrayImage, kernel: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if kernel < 2 || w == 0 || h == 0 {
        return img.clone();
    }

    let k = kernel | 1;
    let r = (k / 2) as i64;
    let mut window = Vec::with_capacity((k * k) as usize);

    ImageBuffer::from_fn(w, h, |x, y| {
        window.clear();
        for dy in -r..=r {
            for dx in -r..=r {
                let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                window.push(img.get_pixel(sx, sy)[0]);
            }
        }
        window.sort_unstable();
        Luma([window[window.len() / 2]])
    })
}

/// Max filter with a `kernel × kernel` square anchored at its centre.
/// Pixels outside the image are ignored.
pub fn dilate(img: &GrayImage, kernel: u32, iterations: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if kernel == 0 || w == 0 || h == 0 {
        return img.clone();
    }

    let anchor = (kernel / 2) as i64;
    let mut current = img.clone();
    for _ in 0..iterations {
        let src = current;
        current = ImageBuffer::from_fn(w, h, |x, y| {
            let mut max = 0u8;
            for ky in 0..kernel as i64 {
                for kx in 0..kernel as i64 {
                    let sx = x as i64 + kx - anchor;
                    let sy = y as i64 + ky - anchor;
                    if sx >= 0 && sy >= 0 && sx < w as i64 && sy < h as i64 {
                        max = max.max(src.get_pixel(sx as u32, sy as u32)[0]);
                    }
                }
            }
            Luma([max])
        });
    }
    current
}
