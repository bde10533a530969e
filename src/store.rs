use crate::types::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Atomic load/save of the poll snapshot. `save` writes the full document
/// to a sibling temp file and renames it over the canonical path, so a
/// crash mid-write never leaves a partial file behind the canonical name.
pub struct SnapshotStore {
  path: PathBuf,
}

impl SnapshotStore {
  pub fn new(path: PathBuf) -> Self {
    SnapshotStore { path }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn tmp_path(&self) -> PathBuf {
    let mut name = self.path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
  }

  /// `Ok(None)` means no state file exists yet (first run). An unreadable
  /// or unparseable file is an error: state is never guessed or repaired.
  pub fn load(&self) -> Result<Option<PollSnapshot>, String> {
    if !self.path.is_file() {
      return Ok(None);
    }
    let data = fs::read_to_string(&self.path)
      .map_err(|e| format!("read poll state {}: {e}", self.path.display()))?;
    let snapshot = serde_json::from_str::<PollSnapshot>(&data)
      .map_err(|e| format!("parse poll state {}: {e}", self.path.display()))?;
    Ok(Some(snapshot))
  }

  pub fn save(&self, snapshot: &PollSnapshot) -> Result<(), String> {
    let payload = serde_json::to_string_pretty(snapshot).map_err(|e| e.to_string())?;
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
          .map_err(|e| format!("create state dir {}: {e}", parent.display()))?;
      }
    }
    let tmp = self.tmp_path();
    fs::write(&tmp, payload).map_err(|e| format!("write poll state {}: {e}", tmp.display()))?;
    fs::rename(&tmp, &self.path)
      .map_err(|e| format!("replace poll state {}: {e}", self.path.display()))?;
    Ok(())
  }
}

/// Scan a flat directory of raster images; each file stem becomes an id.
pub fn scan_image_dir(dir: &Path, original_urls_enabled: bool) -> Result<HashMap<String, ImageData>, String> {
  if !dir.is_dir() {
    return Err(format!("Image directory not found: {}", dir.display()));
  }
  let entries = fs::read_dir(dir).map_err(|e| format!("read image dir {}: {e}", dir.display()))?;
  let mut images = HashMap::new();
  for entry in entries {
    let entry = entry.map_err(|e| e.to_string())?;
    let path = entry.path();
    if !path.is_file() {
      continue;
    }
    let ext = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| ext.to_ascii_lowercase())
      .unwrap_or_default();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
      continue;
    }
    let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
      warn!("Skipping image with non-UTF-8 name: {}", path.display());
      continue;
    };
    let id = id.to_string();
    let public_url = if original_urls_enabled {
      Some(format!("https://facebook.com/{id}"))
    } else {
      None
    };
    images.insert(
      id.clone(),
      ImageData {
        id,
        source_path: path.to_string_lossy().to_string(),
        public_url,
      },
    );
  }
  Ok(images)
}

/// Load the persisted snapshot, or seed a fresh one from the image
/// directory on first run: phase 1 is created with every image entered.
pub fn load_or_seed(store: &SnapshotStore, settings: &PollSettings) -> Result<PollSnapshot, String> {
  if let Some(snapshot) = store.load()? {
    info!("Loaded poll state from {}.", store.path().display());
    return Ok(snapshot);
  }
  info!("No poll state at {}; seeding a fresh tournament.", store.path().display());
  let images = scan_image_dir(&settings.images_dir, settings.original_urls_enabled)?;
  if images.is_empty() {
    return Err(format!(
      "No images found in {}; nothing to run a poll over.",
      settings.images_dir.display()
    ));
  }
  let mut ids: Vec<String> = images.keys().cloned().collect();
  ids.sort();
  let snapshot = PollSnapshot {
    images,
    phases: vec![PhaseData::new(1, ids)],
  };
  store.save(&snapshot)?;
  Ok(snapshot)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_snapshot() -> PollSnapshot {
    let mut images = HashMap::new();
    images.insert(
      "cat".to_string(),
      ImageData {
        id: "cat".to_string(),
        source_path: "pics/cat.jpg".to_string(),
        public_url: None,
      },
    );
    let mut phase = PhaseData::new(1, vec!["cat".to_string()]);
    phase.status = PhaseStatus::Generated;
    phase.matches.push(MatchData::new(
      1,
      vec![MatchParticipant {
        image_id: "cat".to_string(),
        reaction: "like".to_string(),
        votes: 0,
      }],
    ));
    PollSnapshot {
      images,
      phases: vec![phase],
    }
  }

  #[test]
  fn test_load_missing_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("poll_data.json"));
    assert!(store.load().unwrap().is_none());
  }

  #[test]
  fn test_save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("poll_data.json"));
    let snapshot = sample_snapshot();
    store.save(&snapshot).unwrap();

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded.phases.len(), 1);
    assert_eq!(loaded.phases[0].status, PhaseStatus::Generated);
    assert_eq!(loaded.phases[0].matches[0].status, MatchStatus::Generated);
    assert!(loaded.phases[0].matches[0].post_id.is_none());
    assert_eq!(loaded.images["cat"].id, "cat");
  }

  #[test]
  fn test_save_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("poll_data.json"));
    store.save(&sample_snapshot()).unwrap();
    assert!(!dir.path().join("poll_data.json.tmp").exists());
  }

  #[test]
  fn test_interrupted_write_keeps_canonical_file_intact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("poll_data.json");
    let store = SnapshotStore::new(path.clone());
    store.save(&sample_snapshot()).unwrap();
    let before = fs::read_to_string(&path).unwrap();

    // A crash after the temp write but before the rename leaves only the
    // temp file behind; the canonical file must be byte-for-byte intact.
    fs::write(dir.path().join("poll_data.json.tmp"), "{ half a snap").unwrap();
    let after = fs::read_to_string(&path).unwrap();
    assert_eq!(before, after);
    assert!(store.load().unwrap().is_some());
  }

  #[test]
  fn test_corrupt_state_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("poll_data.json");
    fs::write(&path, "not json at all").unwrap();
    let store = SnapshotStore::new(path);
    let err = store.load().unwrap_err();
    assert!(err.contains("parse poll state"), "{err}");
  }

  #[test]
  fn test_scan_image_dir_uses_stems_and_filters_extensions() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("cat.jpg"), b"x").unwrap();
    fs::write(dir.path().join("dog.PNG"), b"x").unwrap();
    fs::write(dir.path().join("notes.txt"), b"x").unwrap();

    let images = scan_image_dir(dir.path(), true).unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images["cat"].public_url.as_deref(), Some("https://facebook.com/cat"));
    assert!(images.contains_key("dog"));
  }
}
