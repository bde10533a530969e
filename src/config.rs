use crate::types::*;
use chrono::Local;
use std::{
    env,
    fs,
    io::Write,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

pub fn repo_root() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn resolve_repo_path(raw: &str) -> PathBuf {
  let path = PathBuf::from(raw);
  if path.is_absolute() {
    path
  } else {
    repo_root().join(path)
  }
}

pub fn config_path() -> PathBuf {
  if let Ok(raw) = env::var("POLL_CONFIG_PATH") {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return PathBuf::from(trimmed);
    }
  }
  repo_root().join("config.json")
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn apply_env_defaults(mut config: AppConfig) -> AppConfig {
  if config.access_token.trim().is_empty() {
    if let Some(value) = env_default("POLL_ACCESS_TOKEN") {
      config.access_token = value;
    }
  }
  if config.page_id.trim().is_empty() {
    if let Some(value) = env_default("POLL_PAGE_ID") {
      config.page_id = value;
    }
  }
  if config.album_id.trim().is_empty() {
    if let Some(value) = env_default("POLL_ALBUM_ID") {
      config.album_id = value;
    }
  }
  if config.winner_album_id.trim().is_empty() {
    if let Some(value) = env_default("POLL_WINNER_ALBUM_ID") {
      config.winner_album_id = value;
    }
  }
  config
}

pub fn load_config_inner() -> Result<AppConfig, String> {
  let path = config_path();
  if !path.is_file() {
    return Ok(apply_env_defaults(AppConfig::default()));
  }
  let data = fs::read_to_string(&path).map_err(|e| format!("read config {}: {e}", path.display()))?;
  let config =
    serde_json::from_str::<AppConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?;
  Ok(apply_env_defaults(config))
}

pub fn load_env_file() {
  let env_path = repo_root().join(".env");
  if !env_path.is_file() {
    return;
  }
  let contents = match fs::read_to_string(&env_path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

// ── Duration / layout parsing ──────────────────────────────────────────

fn seconds_per_unit(unit: char) -> Option<u64> {
  match unit {
    's' => Some(1),
    'm' => Some(60),
    'h' => Some(3600),
    'd' => Some(86_400),
    'w' => Some(604_800),
    _ => None,
  }
}

/// Parse "30s" / "15m" / "6h" / "1d" / "1w" into milliseconds.
pub fn parse_duration_ms(raw: &str) -> Result<u64, String> {
  let trimmed = raw.trim();
  // Split at the last char, not the last byte: the unit may be multibyte.
  let (unit_idx, unit) = trimmed
    .char_indices()
    .last()
    .ok_or_else(|| format!("Invalid duration \"{raw}\": expected <number><s|m|h|d|w>."))?;
  let amount = &trimmed[..unit_idx];
  if amount.is_empty() {
    return Err(format!("Invalid duration \"{raw}\": expected <number><s|m|h|d|w>."));
  }
  let multiplier = seconds_per_unit(unit)
    .ok_or_else(|| format!("Invalid duration \"{raw}\": unknown unit '{unit}'."))?;
  let amount = amount
    .trim()
    .parse::<u64>()
    .map_err(|e| format!("Invalid duration \"{raw}\": {e}"))?;
  Ok(amount * multiplier * 1000)
}

/// Parse "<cols>x<rows>" into a grid layout.
pub fn parse_layout(raw: &str) -> Result<(u32, u32), String> {
  let (cols, rows) = raw
    .trim()
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("Invalid layout \"{raw}\": expected <cols>x<rows>."))?;
  let cols = cols.trim().parse::<u32>().map_err(|e| format!("Invalid layout \"{raw}\": {e}"))?;
  let rows = rows.trim().parse::<u32>().map_err(|e| format!("Invalid layout \"{raw}\": {e}"))?;
  if cols == 0 || rows == 0 {
    return Err(format!("Invalid layout \"{raw}\": dimensions must be positive."));
  }
  Ok((cols, rows))
}

/// Validate an `AppConfig` into runtime settings.
pub fn resolve_settings(config: AppConfig) -> Result<PollSettings, String> {
  if config.poll_name.trim().is_empty() {
    return Err("pollName is not set in the config.".to_string());
  }
  if config.access_token.trim().is_empty() {
    return Err("accessToken is not set (config or POLL_ACCESS_TOKEN).".to_string());
  }
  let album_id = if config.album_id.trim().is_empty() {
    config.page_id.trim().to_string()
  } else {
    config.album_id.trim().to_string()
  };
  if album_id.is_empty() {
    return Err("Neither albumId nor pageId is set; nowhere to post matches.".to_string());
  }
  let layout = parse_layout(&config.layout)?;
  let participants_per_match = (layout.0 * layout.1) as usize;
  if participants_per_match < 2 {
    return Err(format!(
      "Layout {} gives {participants_per_match} participants per match; need at least 2.",
      config.layout
    ));
  }
  if config.reactions.len() < participants_per_match {
    return Err(format!(
      "Need at least {participants_per_match} reactions for a {} layout, got {}.",
      config.layout,
      config.reactions.len()
    ));
  }
  if config.max_posts_per_batch == 0 {
    return Err("maxPostsPerBatch must be at least 1.".to_string());
  }
  let winner_album_id = {
    let trimmed = config.winner_album_id.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
  };
  Ok(PollSettings {
    poll_name: config.poll_name.trim().to_string(),
    album_id,
    winner_album_id,
    images_dir: resolve_repo_path(&config.images_dir),
    source_album_ids: config
      .source_album_ids
      .iter()
      .map(|id| id.trim().to_string())
      .filter(|id| !id.is_empty())
      .collect(),
    layout,
    participants_per_match,
    reactions: config.reactions,
    voting_duration_ms: parse_duration_ms(&config.voting_duration)?,
    post_interval_ms: parse_duration_ms(&config.post_interval)?,
    max_posts_per_batch: config.max_posts_per_batch,
    post_message: config.post_message,
    winner_message: config.winner_message,
    interactive_mode: config.interactive_mode,
    original_urls_enabled: config.original_urls_enabled,
    state_file: resolve_repo_path(&config.state_file),
  })
}

// ── Time / logging ─────────────────────────────────────────────────────

pub fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

pub fn publisher_log_path() -> PathBuf {
  repo_root().join("logs").join("publisher_api.log")
}

pub fn append_publisher_log(label: &str, payload: &str) {
  let dir = repo_root().join("logs");
  if fs::create_dir_all(&dir).is_err() {
    return;
  }
  let path = publisher_log_path();
  let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
  let entry = format!("[{timestamp}] {label}\n{payload}\n\n");
  if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(&path) {
    let _ = file.write_all(entry.as_bytes());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_duration_units() {
    assert_eq!(parse_duration_ms("30s").unwrap(), 30_000);
    assert_eq!(parse_duration_ms("15m").unwrap(), 900_000);
    assert_eq!(parse_duration_ms("6h").unwrap(), 21_600_000);
    assert_eq!(parse_duration_ms("1d").unwrap(), 86_400_000);
    assert_eq!(parse_duration_ms("1w").unwrap(), 604_800_000);
  }

  #[test]
  fn test_parse_duration_rejects_garbage() {
    assert!(parse_duration_ms("").is_err());
    assert!(parse_duration_ms("6").is_err());
    assert!(parse_duration_ms("6q").is_err());
    assert!(parse_duration_ms("sixh").is_err());
  }

  #[test]
  fn test_parse_duration_rejects_multibyte_unit() {
    // Must come back as a clean error, not a char-boundary panic.
    let err = parse_duration_ms("6µ").unwrap_err();
    assert!(err.contains("unknown unit"), "{err}");
    assert!(parse_duration_ms("µ").is_err());
  }

  #[test]
  fn test_parse_layout() {
    assert_eq!(parse_layout("2x2").unwrap(), (2, 2));
    assert_eq!(parse_layout("2X3").unwrap(), (2, 3));
    assert!(parse_layout("2x0").is_err());
    assert!(parse_layout("four").is_err());
  }

  #[test]
  fn test_parse_env_line() {
    assert_eq!(
      parse_env_line("export KEY=\"value\""),
      Some(("KEY".to_string(), "value".to_string()))
    );
    assert_eq!(
      parse_env_line("KEY=value # comment"),
      Some(("KEY".to_string(), "value".to_string()))
    );
    assert_eq!(parse_env_line("# comment"), None);
    assert_eq!(parse_env_line(""), None);
  }

  fn config_with_reactions(count: usize) -> AppConfig {
    AppConfig {
      poll_name: "Test Poll".to_string(),
      access_token: "token".to_string(),
      page_id: "page".to_string(),
      reactions: (0..count)
        .map(|idx| ReactionOption {
          name: format!("reaction-{idx}"),
          emoji: "*".to_string(),
          badge_path: format!("badges/{idx}.png"),
        })
        .collect(),
      ..AppConfig::default()
    }
  }

  #[test]
  fn test_resolve_settings_requires_enough_reactions() {
    let err = resolve_settings(config_with_reactions(3)).unwrap_err();
    assert!(err.contains("at least 4 reactions"), "{err}");
    assert!(resolve_settings(config_with_reactions(4)).is_ok());
  }

  #[test]
  fn test_resolve_settings_album_falls_back_to_page() {
    let settings = resolve_settings(config_with_reactions(4)).unwrap();
    assert_eq!(settings.album_id, "page");
    assert_eq!(settings.participants_per_match, 4);
  }
}
