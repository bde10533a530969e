use crate::types::*;
use image::imageops::FilterType;
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;

/// Builds the published artifact for one match. Trait seam so the
/// orchestrator can be exercised without touching pixels.
pub trait MatchRenderer {
  fn render(&self, snapshot: &PollSnapshot, match_data: &MatchData) -> Result<Vec<u8>, String>;
}

/// Shrink the larger grid dimension while the grid holds more than one
/// empty cell for the given participant count.
pub fn fit_layout(count: usize, base: (u32, u32)) -> (u32, u32) {
  let mut layout = base;
  while (layout.0 * layout.1) as usize > count + 1 {
    let reduced = layout.0.max(layout.1) - 1;
    layout = (layout.0.min(layout.1), reduced);
  }
  layout
}

/// Paste images into a `cols x rows` grid of uniform cells, column-major.
/// At most one trailing cell may be empty; a grid with fewer cells than
/// images is a state-consistency error, never padded or cropped.
pub fn compose_grid(images: &[RgbaImage], layout: (u32, u32)) -> Result<RgbaImage, String> {
  let (cols, rows) = layout;
  let cells = (cols * rows) as usize;
  if cells < images.len() {
    return Err(format!(
      "Grid {cols}x{rows} has {cells} cells for {} images.",
      images.len()
    ));
  }
  let first = images
    .first()
    .ok_or_else(|| "Cannot compose a grid from zero images.".to_string())?;
  let (width, height) = (first.width(), first.height());
  let mut canvas = RgbaImage::new(width * cols, height * rows);
  for col in 0..cols {
    for row in 0..rows {
      let idx = (col * rows + row) as usize;
      if idx == images.len() {
        return Ok(canvas);
      }
      let cell = imageops::resize(&images[idx], width, height, FilterType::Lanczos3);
      imageops::replace(&mut canvas, &cell, (col * width) as i64, (row * height) as i64);
    }
  }
  Ok(canvas)
}

/// Overlay a reaction badge onto a participant image: badge scaled to a
/// fifth of the shorter dimension, 5% padding from the top-left corner.
pub fn overlay_badge(image: &mut RgbaImage, badge: &RgbaImage) {
  let lower = image.width().min(image.height());
  let padding = (lower / 20) as i64;
  let badge_size = (lower / 5).max(1);
  let resized = imageops::resize(badge, badge_size, badge_size, FilterType::Lanczos3);
  imageops::overlay(image, &resized, padding, padding);
}

/// Real compositor: loads participant images from disk, overlays each
/// participant's assigned reaction badge, fits the grid, encodes JPEG.
pub struct GridRenderer {
  layout: (u32, u32),
  badges: HashMap<String, RgbaImage>,
}

impl GridRenderer {
  pub fn new(layout: (u32, u32), reactions: &[ReactionOption]) -> Result<Self, String> {
    let mut badges = HashMap::new();
    for reaction in reactions {
      let badge = image::open(&reaction.badge_path)
        .map_err(|e| format!("open badge {}: {e}", reaction.badge_path))?
        .to_rgba8();
      badges.insert(reaction.name.clone(), badge);
    }
    Ok(GridRenderer { layout, badges })
  }
}

impl MatchRenderer for GridRenderer {
  fn render(&self, snapshot: &PollSnapshot, match_data: &MatchData) -> Result<Vec<u8>, String> {
    let mut images = Vec::with_capacity(match_data.participants.len());
    for participant in &match_data.participants {
      let image_data = snapshot.image(&participant.image_id)?;
      let mut img = image::open(&image_data.source_path)
        .map_err(|e| format!("open image {}: {e}", image_data.source_path))?
        .to_rgba8();
      let badge = self
        .badges
        .get(&participant.reaction)
        .ok_or_else(|| format!("No badge for reaction {}.", participant.reaction))?;
      overlay_badge(&mut img, badge);
      images.push(img);
    }
    let layout = fit_layout(images.len(), self.layout);
    let grid = compose_grid(&images, layout)?;
    encode_jpeg(grid)
  }
}

fn encode_jpeg(image: RgbaImage) -> Result<Vec<u8>, String> {
  let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
  let mut bytes = Vec::new();
  DynamicImage::ImageRgb8(rgb)
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
    .map_err(|e| format!("encode match image: {e}"))?;
  Ok(bytes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
  }

  #[test]
  fn test_fit_layout_shrinks_to_participant_count() {
    assert_eq!(fit_layout(4, (2, 2)), (2, 2));
    assert_eq!(fit_layout(3, (2, 2)), (2, 2));
    assert_eq!(fit_layout(2, (2, 2)), (2, 1));
    assert_eq!(fit_layout(3, (2, 3)), (2, 2));
    assert_eq!(fit_layout(2, (2, 3)), (2, 1));
  }

  #[test]
  fn test_compose_grid_dimensions() {
    let images = vec![
      solid(40, 30, [255, 0, 0, 255]),
      solid(40, 30, [0, 255, 0, 255]),
      solid(40, 30, [0, 0, 255, 255]),
    ];
    let grid = compose_grid(&images, (2, 2)).unwrap();
    assert_eq!((grid.width(), grid.height()), (80, 60));
  }

  #[test]
  fn test_compose_grid_rejects_too_many_images() {
    let images = vec![solid(10, 10, [0, 0, 0, 255]); 5];
    let err = compose_grid(&images, (2, 2)).unwrap_err();
    assert!(err.contains("4 cells for 5 images"), "{err}");
  }

  #[test]
  fn test_overlay_badge_covers_top_left_corner() {
    let mut base = solid(100, 50, [0, 0, 0, 255]);
    let badge = solid(32, 32, [255, 255, 255, 255]);
    overlay_badge(&mut base, &badge);
    // Shorter dimension 50: badge 10x10 at (2, 2).
    assert_eq!(base.get_pixel(5, 5), &Rgba([255, 255, 255, 255]));
    assert_eq!(base.get_pixel(1, 1), &Rgba([0, 0, 0, 255]));
    assert_eq!(base.get_pixel(20, 20), &Rgba([0, 0, 0, 255]));
  }

  #[test]
  fn test_grid_renderer_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let badge_path = dir.path().join("badge.png");
    solid(16, 16, [255, 255, 0, 255]).save(&badge_path).unwrap();

    let mut images = std::collections::HashMap::new();
    let mut participants = Vec::new();
    for (idx, name) in ["cat", "dog", "owl"].iter().enumerate() {
      let path = dir.path().join(format!("{name}.png"));
      solid(40, 40, [(idx as u8 + 1) * 60, 0, 0, 255]).save(&path).unwrap();
      images.insert(
        name.to_string(),
        ImageData {
          id: name.to_string(),
          source_path: path.to_string_lossy().to_string(),
          public_url: None,
        },
      );
      participants.push(MatchParticipant {
        image_id: name.to_string(),
        reaction: "like".to_string(),
        votes: 0,
      });
    }
    let snapshot = PollSnapshot {
      images,
      phases: vec![],
    };
    let match_data = MatchData::new(1, participants);

    let reactions = vec![ReactionOption {
      name: "like".to_string(),
      emoji: "*".to_string(),
      badge_path: badge_path.to_string_lossy().to_string(),
    }];
    let renderer = GridRenderer::new((2, 2), &reactions).unwrap();
    let bytes = renderer.render(&snapshot, &match_data).unwrap();

    let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap();
    // Three 40x40 cells in a fitted 2x2 grid.
    assert_eq!((decoded.width(), decoded.height()), (80, 80));
  }
}
