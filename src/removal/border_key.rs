// Built-in remover that keys out the background colour found on the image border.
// Works well for product shots and scans on a plain backdrop; anything fancier
// should go through `CommandRemover` and a real segmentation model.

use super::{BackgroundRemover, RemovalError};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::io::Cursor;
use tracing::debug;

pub const DEFAULT_TOLERANCE: u8 = 32;

#[derive(Debug, Clone)]
pub struct BorderKeyRemover {
    // Maximum per-channel distance from the background colour that still counts as background
    tolerance: u8,
}

impl BorderKeyRemover {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }
}

impl Default for BorderKeyRemover {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

#[async_trait]
impl BackgroundRemover for BorderKeyRemover {
    fn name(&self) -> &str {
        "border-key"
    }

    async fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, RemovalError> {
        let data = image.to_vec();
        let tolerance = self.tolerance;
        tokio::task::spawn_blocking(move || key_out_background(&data, tolerance))
            .await
            .map_err(|e| RemovalError::Worker(e.to_string()))?
    }
}

fn key_out_background(data: &[u8], tolerance: u8) -> Result<Vec<u8>, RemovalError> {
    let mut rgba = image::load_from_memory(data)
        .map_err(|e| RemovalError::Decode(e.to_string()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();

    if width > 0 && height > 0 {
        let background = estimate_background(&rgba);
        debug!(
            "Keying {}x{} image against background {:?} (tolerance {})",
            width, height, background.0, tolerance
        );
        let cleared = flood_clear(&mut rgba, background, tolerance);
        debug!("Cleared {} of {} pixels", cleared, width as u64 * height as u64);
    }

    let mut buffer = Cursor::new(Vec::new());
    rgba.write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| RemovalError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

fn border_coords(width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let top_bottom = (0..width).flat_map(move |x| [(x, 0), (x, height - 1)]);
    let left_right = (0..height).flat_map(move |y| [(0, y), (width - 1, y)]);
    top_bottom.chain(left_right)
}

// Per-channel median of the border pixels. The median ignores the subject
// where it touches the edge, unlike a plain average.
fn estimate_background(img: &RgbaImage) -> Rgba<u8> {
    let (width, height) = img.dimensions();
    let mut channels: [Vec<u8>; 3] = Default::default();
    for (x, y) in border_coords(width, height) {
        let px = img.get_pixel(x, y);
        for (c, values) in channels.iter_mut().enumerate() {
            values.push(px[c]);
        }
    }

    let mut median = [0u8; 4];
    for (c, values) in channels.iter_mut().enumerate() {
        values.sort_unstable();
        median[c] = values[values.len() / 2];
    }
    median[3] = 255;
    Rgba(median)
}

fn matches_background(px: &Rgba<u8>, background: Rgba<u8>, tolerance: u8) -> bool {
    px.0[..3]
        .iter()
        .zip(&background.0[..3])
        .all(|(a, b)| a.abs_diff(*b) <= tolerance)
}

// Breadth-first fill from every border pixel. Only background connected to
// the edge is removed, so matching colours inside the subject survive.
fn flood_clear(img: &mut RgbaImage, background: Rgba<u8>, tolerance: u8) -> u64 {
    let (width, height) = img.dimensions();
    let mut visited = vec![false; width as usize * height as usize];
    let mut queue = VecDeque::new();
    let index = |x: u32, y: u32| y as usize * width as usize + x as usize;

    for (x, y) in border_coords(width, height) {
        if !visited[index(x, y)] {
            visited[index(x, y)] = true;
            queue.push_back((x, y));
        }
    }

    let mut cleared = 0;
    while let Some((x, y)) = queue.pop_front() {
        let px = img.get_pixel_mut(x, y);
        if !matches_background(px, background, tolerance) {
            continue;
        }
        px.0[3] = 0;
        cleared += 1;

        let neighbours = [
            (x.checked_sub(1), Some(y)),
            (x.checked_add(1).filter(|&nx| nx < width), Some(y)),
            (Some(x), y.checked_sub(1)),
            (Some(x), y.checked_add(1).filter(|&ny| ny < height)),
        ];
        for (nx, ny) in neighbours {
            if let (Some(nx), Some(ny)) = (nx, ny) {
                let i = index(nx, ny);
                if !visited[i] {
                    visited[i] = true;
                    queue.push_back((nx, ny));
                }
            }
        }
    }
    cleared
}
