use crate::publisher::PublisherApi;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const DONE_MARKER: &str = ".done";

/// Pull the image id out of an "Original post" caption that links the
/// source, e.g. "Original post: https://facebook.com/1234567890".
pub fn extract_original_post_id(caption: &str) -> Option<String> {
  let idx = caption.find("facebook.com/")?;
  let rest = &caption[idx + "facebook.com/".len()..];
  let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
  if digits.is_empty() {
    None
  } else {
    Some(digits)
  }
}

/// Download every photo from the source albums into `target_dir`.
///
/// Individual download failures are counted and logged, not fatal; the
/// `.done` marker is only written when every photo came through, so a
/// partial collection is retried wholesale on the next run.
pub fn collect_album_images(
  publisher: &dyn PublisherApi,
  album_ids: &[String],
  target_dir: &Path,
) -> Result<(), String> {
  let done_file = target_dir.join(DONE_MARKER);
  if done_file.is_file() {
    info!("Photos already downloaded. Skipping collection.");
    return Ok(());
  }
  info!("Starting album image collection...");
  fs::create_dir_all(target_dir)
    .map_err(|e| format!("create image dir {}: {e}", target_dir.display()))?;

  let mut downloaded = 0u32;
  let mut skipped = 0u32;
  let mut failed = 0u32;

  for album_id in album_ids {
    info!("Scraping album {album_id}...");
    let photos = publisher
      .album_photos(album_id)
      .map_err(|e| format!("list album {album_id}: {e}"))?;
    for photo in photos {
      let image_id = if photo.caption.contains("Original post") {
        match extract_original_post_id(&photo.caption) {
          Some(id) => id,
          None => {
            warn!("Unable to get original id from caption: {}", photo.caption);
            photo.id.clone()
          }
        }
      } else {
        photo.id.clone()
      };
      let image_path = target_dir.join(format!("{image_id}.jpg"));
      if image_path.is_file() {
        skipped += 1;
        continue;
      }
      let Some(source_url) = photo.source_url.as_ref() else {
        failed += 1;
        warn!("Photo {image_id} has no downloadable source.");
        continue;
      };
      info!("Downloading image {image_id} from {source_url}.");
      match publisher.download(source_url) {
        Ok(bytes) => match fs::write(&image_path, bytes) {
          Ok(()) => downloaded += 1,
          Err(e) => {
            failed += 1;
            warn!("Unable to save image {}: {e}", image_path.display());
          }
        },
        Err(e) => {
          failed += 1;
          warn!("Unable to download image {image_id}: {e}");
        }
      }
    }
  }

  info!("Finished collecting images. Downloaded: {downloaded}, skipped: {skipped}, failed: {failed}");
  if failed == 0 {
    fs::write(&done_file, b"")
      .map_err(|e| format!("write done marker {}: {e}", done_file.display()))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::publisher::{AlbumPhoto, PublisherError};
  use std::cell::RefCell;

  struct FakeAlbums {
    photos: Vec<AlbumPhoto>,
    broken_urls: Vec<String>,
    downloads: RefCell<u32>,
  }

  impl PublisherApi for FakeAlbums {
    fn publish_photo(&self, _: &str, _: &[u8], _: &str) -> Result<String, PublisherError> {
      unreachable!("collection never publishes")
    }

    fn comment(&self, _: &str, _: &str) -> Result<(), PublisherError> {
      unreachable!("collection never comments")
    }

    fn reaction_count(&self, _: &str, _: &str) -> Result<u64, PublisherError> {
      unreachable!("collection never tallies")
    }

    fn album_photos(&self, _: &str) -> Result<Vec<AlbumPhoto>, PublisherError> {
      Ok(self.photos.clone())
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, PublisherError> {
      *self.downloads.borrow_mut() += 1;
      if self.broken_urls.iter().any(|broken| broken == url) {
        Err(PublisherError::Request(format!("boom: {url}")))
      } else {
        Ok(b"jpeg".to_vec())
      }
    }
  }

  fn photo(id: &str, caption: &str, url: &str) -> AlbumPhoto {
    AlbumPhoto {
      id: id.to_string(),
      caption: caption.to_string(),
      source_url: Some(url.to_string()),
    }
  }

  #[test]
  fn test_extract_original_post_id() {
    assert_eq!(
      extract_original_post_id("Original post: https://facebook.com/123456 (archive)"),
      Some("123456".to_string())
    );
    assert_eq!(extract_original_post_id("no link here"), None);
  }

  #[test]
  fn test_collection_writes_done_marker_when_clean() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeAlbums {
      photos: vec![
        photo("10", "first", "http://cdn/10"),
        photo("11", "Original post facebook.com/999", "http://cdn/11"),
      ],
      broken_urls: vec![],
      downloads: RefCell::new(0),
    };
    collect_album_images(&fake, &["album".to_string()], dir.path()).unwrap();

    assert!(dir.path().join("10.jpg").is_file());
    assert!(dir.path().join("999.jpg").is_file());
    assert!(dir.path().join(".done").is_file());
  }

  #[test]
  fn test_failed_download_skips_done_marker_but_continues() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeAlbums {
      photos: vec![
        photo("10", "first", "http://cdn/10"),
        photo("11", "second", "http://cdn/11"),
      ],
      broken_urls: vec!["http://cdn/10".to_string()],
      downloads: RefCell::new(0),
    };
    collect_album_images(&fake, &["album".to_string()], dir.path()).unwrap();

    assert!(!dir.path().join("10.jpg").exists());
    assert!(dir.path().join("11.jpg").is_file());
    assert!(!dir.path().join(".done").exists());
  }

  #[test]
  fn test_done_marker_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(".done"), b"").unwrap();
    let fake = FakeAlbums {
      photos: vec![photo("10", "first", "http://cdn/10")],
      broken_urls: vec![],
      downloads: RefCell::new(0),
    };
    collect_album_images(&fake, &["album".to_string()], dir.path()).unwrap();
    assert_eq!(*fake.downloads.borrow(), 0);
    assert!(!dir.path().join("10.jpg").exists());
  }

  #[test]
  fn test_existing_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("10.jpg"), b"already here").unwrap();
    let fake = FakeAlbums {
      photos: vec![photo("10", "first", "http://cdn/10")],
      broken_urls: vec![],
      downloads: RefCell::new(0),
    };
    collect_album_images(&fake, &["album".to_string()], dir.path()).unwrap();
    assert_eq!(*fake.downloads.borrow(), 0);
    assert_eq!(fs::read(dir.path().join("10.jpg")).unwrap(), b"already here");
    assert!(dir.path().join(".done").is_file());
  }
}
