use crate::bracket::generate_matches;
use crate::compose::MatchRenderer;
use crate::config::now_ms;
use crate::publisher::{PublisherApi, PublisherError};
use crate::store::SnapshotStore;
use crate::types::*;
use std::fs;
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

// ── Control seam ───────────────────────────────────────────────────────

/// Clock, sleeping and operator prompts behind one seam so the state
/// machine can be driven in tests without real waits or stdin.
pub trait Control {
  fn now_ms(&self) -> u64;
  fn sleep_ms(&mut self, ms: u64);
  fn confirm(&mut self, prompt: &str) -> Result<(), String>;
}

pub struct SystemControl;

impl Control for SystemControl {
  fn now_ms(&self) -> u64 {
    now_ms()
  }

  fn sleep_ms(&mut self, ms: u64) {
    thread::sleep(Duration::from_millis(ms));
  }

  fn confirm(&mut self, prompt: &str) -> Result<(), String> {
    println!("{prompt}");
    let mut line = String::new();
    io::stdin()
      .lock()
      .read_line(&mut line)
      .map_err(|e| format!("read confirmation: {e}"))?;
    Ok(())
  }
}

// ── Orchestrator ───────────────────────────────────────────────────────

/// What one `step` did, and what the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
  /// State advanced; call `step` again immediately.
  Progressed,
  /// Voting window still open; nothing to do before this deadline.
  WaitUntil(u64),
  /// The tournament is decided.
  Winner(String),
}

/// Drives the tournament forward one persisted transition at a time. The
/// snapshot is saved after every mutating step, so a crash resumes from
/// the last completed transition without re-publishing anything.
pub struct PollManager<P: PublisherApi, R: MatchRenderer> {
  settings: PollSettings,
  store: SnapshotStore,
  snapshot: PollSnapshot,
  publisher: P,
  renderer: R,
}

fn advance_match_status(match_data: &mut MatchData, expected: MatchStatus) -> Result<(), String> {
  let next = match_data
    .status
    .next()
    .ok_or_else(|| format!("Match {} is already over.", match_data.match_number))?;
  if next != expected {
    return Err(format!(
      "Match {} cannot move from {:?} to {:?}.",
      match_data.match_number, match_data.status, expected
    ));
  }
  match_data.status = next;
  Ok(())
}

fn advance_phase_status(phase: &mut PhaseData, expected: PhaseStatus) -> Result<(), String> {
  let next = phase
    .status
    .next()
    .ok_or_else(|| format!("Phase {} is already over.", phase.phase_number))?;
  if next != expected {
    return Err(format!(
      "Phase {} cannot move from {:?} to {:?}.",
      phase.phase_number, phase.status, expected
    ));
  }
  phase.status = next;
  Ok(())
}

/// Every participant tied with the top vote count advances.
fn match_winners(match_data: &MatchData) -> Vec<String> {
  let top = match_data.participants.iter().map(|p| p.votes).max().unwrap_or(0);
  match_data
    .participants
    .iter()
    .filter(|p| p.votes == top)
    .map(|p| p.image_id.clone())
    .collect()
}

impl<P: PublisherApi, R: MatchRenderer> PollManager<P, R> {
  pub fn new(
    settings: PollSettings,
    store: SnapshotStore,
    snapshot: PollSnapshot,
    publisher: P,
    renderer: R,
  ) -> Self {
    PollManager { settings, store, snapshot, publisher, renderer }
  }

  pub fn snapshot(&self) -> &PollSnapshot {
    &self.snapshot
  }

  fn save(&self) -> Result<(), String> {
    self.store.save(&self.snapshot)
  }

  /// Run the remote call up to `PUBLISH_MAX_ATTEMPTS` times, sleeping
  /// between attempts. Rate limiting backs off much longer than an
  /// ordinary failure. Exhaustion is fatal.
  fn publish_with_retry<T>(
    &self,
    control: &mut dyn Control,
    label: &str,
    mut op: impl FnMut() -> Result<T, PublisherError>,
  ) -> Result<T, String> {
    let mut attempt = 1;
    loop {
      match op() {
        Ok(value) => return Ok(value),
        Err(err) => {
          if attempt >= PUBLISH_MAX_ATTEMPTS {
            return Err(format!("{label} failed after {attempt} attempts: {err}"));
          }
          let backoff = if err.is_rate_limited() {
            PUBLISH_RATE_LIMIT_BACKOFF_MS
          } else {
            PUBLISH_BACKOFF_MS
          };
          warn!("{label} attempt {attempt} failed: {err}. Retrying in {}s.", backoff / 1000);
          control.sleep_ms(backoff);
          attempt += 1;
        }
      }
    }
  }

  /// Perform the next pending transition for the current phase.
  pub fn step(&mut self, control: &mut dyn Control) -> Result<StepOutcome, String> {
    let (participant_count, status) = {
      let phase = self.snapshot.current_phase()?;
      (phase.participants.len(), phase.status)
    };
    if participant_count <= 1 {
      let winner_id = self.announce_winner(control)?;
      return Ok(StepOutcome::Winner(winner_id));
    }
    match status {
      PhaseStatus::Created => {
        self.generate_phase()?;
        Ok(StepOutcome::Progressed)
      }
      PhaseStatus::Generated => {
        self.post_matches(control)?;
        Ok(StepOutcome::Progressed)
      }
      PhaseStatus::Posted => self.tally_matches(control),
      PhaseStatus::Over => {
        self.open_next_phase(control)?;
        Ok(StepOutcome::Progressed)
      }
    }
  }

  /// Loop `step` until the tournament is decided, sleeping through open
  /// voting windows.
  pub fn run(&mut self, control: &mut dyn Control) -> Result<String, String> {
    loop {
      match self.step(control)? {
        StepOutcome::Winner(winner_id) => {
          info!("Tournament over. Winner: {winner_id}.");
          return Ok(winner_id);
        }
        StepOutcome::WaitUntil(deadline) => {
          let now = control.now_ms();
          if deadline > now {
            info!("Voting open for another {}s.", (deadline - now) / 1000);
            control.sleep_ms(deadline - now);
          }
        }
        StepOutcome::Progressed => {}
      }
    }
  }

  fn generate_phase(&mut self) -> Result<(), String> {
    let phase = self.snapshot.current_phase()?;
    info!(
      "Generating matches for phase {} ({} participants).",
      phase.phase_number,
      phase.participants.len()
    );
    let matches = generate_matches(
      &phase.participants,
      self.settings.participants_per_match,
      &self.settings.reactions,
      &mut rand::thread_rng(),
    )?;
    let phase = self.snapshot.current_phase_mut()?;
    phase.matches = matches;
    advance_phase_status(phase, PhaseStatus::Generated)?;
    self.save()
  }

  fn caption(&self, phase: &PhaseData, match_data: &MatchData) -> String {
    let mut caption = self
      .settings
      .post_message
      .replace("{poll_name}", &self.settings.poll_name)
      .replace("{phase_number}", &phase.phase_number.to_string())
      .replace("{match_number}", &match_data.match_number.to_string())
      .replace("{total_matches}", &phase.matches.len().to_string());
    if phase.matches.len() == 1 {
      let previous_was_single = self
        .snapshot
        .phases
        .iter()
        .rev()
        .nth(1)
        .map(|previous| previous.matches.len() == 1)
        .unwrap_or(false);
      caption.push_str(if previous_was_single { "\n\nPLAYOFF MATCH" } else { "\n\nFINAL MATCH" });
    }
    caption
  }

  /// Best effort. A lost legend comment does not invalidate the match.
  fn post_legend_comment(&self, post_id: &str, match_data: &MatchData) {
    let mut lines = vec!["Vote with these reactions:".to_string()];
    for participant in &match_data.participants {
      let emoji = self
        .settings
        .reactions
        .iter()
        .find(|r| r.name == participant.reaction)
        .map(|r| r.emoji.as_str())
        .unwrap_or("?");
      let target = self
        .snapshot
        .image(&participant.image_id)
        .ok()
        .and_then(|image| image.public_url.clone());
      match target {
        Some(url) => lines.push(format!("{emoji} Original post: {url}")),
        None => lines.push(format!("{emoji} {}", participant.image_id)),
      }
    }
    if let Err(err) = self.publisher.comment(post_id, &lines.join("\n")) {
      warn!("Unable to comment the reaction legend on {post_id}: {err}");
    }
  }

  fn batch_pause(&self, control: &mut dyn Control) -> Result<(), String> {
    if self.settings.interactive_mode {
      control.confirm("Batch posted. Press enter to continue posting.")
    } else {
      control.sleep_ms(self.settings.post_interval_ms);
      Ok(())
    }
  }

  /// Publish every still-unposted match. The snapshot is saved right
  /// after each successful publish, so a restart never re-posts a match
  /// that already went out.
  fn post_matches(&mut self, control: &mut dyn Control) -> Result<(), String> {
    let phase_idx = self.snapshot.phases.len() - 1;
    let phase_snapshot = self.snapshot.phases[phase_idx].clone();
    let mut posted_in_batch = 0u32;
    for (match_idx, match_data) in phase_snapshot.matches.iter().enumerate() {
      if self.snapshot.phases[phase_idx].matches[match_idx].status != MatchStatus::Generated {
        continue;
      }
      if posted_in_batch == self.settings.max_posts_per_batch {
        self.batch_pause(control)?;
        posted_in_batch = 0;
      }
      let caption = self.caption(&phase_snapshot, match_data);
      let image = self.renderer.render(&self.snapshot, match_data)?;
      info!(
        "Posting phase {} match {} of {}.",
        phase_snapshot.phase_number,
        match_data.match_number,
        phase_snapshot.matches.len()
      );
      let post_id = self.publish_with_retry(control, "Match post", || {
        self.publisher.publish_photo(&self.settings.album_id, &image, &caption)
      })?;
      let posted_at_ms = control.now_ms();
      {
        let live = &mut self.snapshot.phases[phase_idx].matches[match_idx];
        live.post_id = Some(post_id.clone());
        live.posted_at_ms = Some(posted_at_ms);
        advance_match_status(live, MatchStatus::Posted)?;
      }
      self.save()?;
      self.post_legend_comment(&post_id, match_data);
      posted_in_batch += 1;
    }
    let phase = self.snapshot.current_phase_mut()?;
    advance_phase_status(phase, PhaseStatus::Posted)?;
    self.save()
  }

  /// Close the voting window: read the final reaction counts for every
  /// posted match, or report the deadline if voting is still open.
  /// Tally reads are not retried; a failed read aborts the run and the
  /// next start tallies again.
  fn tally_matches(&mut self, control: &mut dyn Control) -> Result<StepOutcome, String> {
    let phase_idx = self.snapshot.phases.len() - 1;
    let phase_snapshot = self.snapshot.phases[phase_idx].clone();
    let mut deadline = 0u64;
    for match_data in &phase_snapshot.matches {
      let posted_at_ms = match_data.posted_at_ms.ok_or_else(|| {
        format!(
          "Match {} in phase {} has no posting timestamp.",
          match_data.match_number, phase_snapshot.phase_number
        )
      })?;
      deadline = deadline.max(posted_at_ms + self.settings.voting_duration_ms);
    }
    if control.now_ms() < deadline {
      return Ok(StepOutcome::WaitUntil(deadline));
    }

    info!("Voting closed for phase {}. Tallying.", phase_snapshot.phase_number);
    for (match_idx, match_data) in phase_snapshot.matches.iter().enumerate() {
      if match_data.status == MatchStatus::Over {
        continue;
      }
      let post_id = match_data.post_id.clone().ok_or_else(|| {
        format!("Match {} is posted but has no post id.", match_data.match_number)
      })?;
      for (participant_idx, participant) in match_data.participants.iter().enumerate() {
        let votes = self
          .publisher
          .reaction_count(&post_id, &participant.reaction)
          .map_err(|e| format!("tally match {}: {e}", match_data.match_number))?;
        self.snapshot.phases[phase_idx].matches[match_idx].participants[participant_idx].votes =
          votes;
      }
      advance_match_status(
        &mut self.snapshot.phases[phase_idx].matches[match_idx],
        MatchStatus::Over,
      )?;
      self.save()?;
    }
    let phase = self.snapshot.current_phase_mut()?;
    advance_phase_status(phase, PhaseStatus::Over)?;
    self.save()?;
    Ok(StepOutcome::Progressed)
  }

  /// Collect winners in match order and open the next phase with them.
  fn open_next_phase(&mut self, control: &mut dyn Control) -> Result<(), String> {
    let phase = self.snapshot.current_phase()?;
    if self.settings.interactive_mode {
      control.confirm(&format!(
        "Phase {} is over. Press enter to open the next phase.",
        phase.phase_number
      ))?;
    }
    let phase = self.snapshot.current_phase()?;
    let mut winners = Vec::new();
    for match_data in &phase.matches {
      winners.extend(match_winners(match_data));
    }
    info!(
      "Phase {} produced {} winner(s); opening phase {}.",
      phase.phase_number,
      winners.len(),
      phase.phase_number + 1
    );
    let next_number = phase.phase_number + 1;
    self.snapshot.phases.push(PhaseData::new(next_number, winners));
    self.save()
  }

  /// Publish the winner announcement, exactly once. The final phase is
  /// marked over before returning, so a restart reports the winner
  /// without re-posting.
  fn announce_winner(&mut self, control: &mut dyn Control) -> Result<String, String> {
    let phase = self.snapshot.current_phase()?;
    let winner_id = phase
      .participants
      .first()
      .cloned()
      .ok_or_else(|| "Final phase has no participants; nothing to announce.".to_string())?;
    if phase.status == PhaseStatus::Over {
      return Ok(winner_id);
    }
    let message = self
      .settings
      .winner_message
      .replace("{poll_name}", &self.settings.poll_name)
      .replace("{winner_id}", &winner_id);
    if let Some(album_id) = self.settings.winner_album_id.clone() {
      let image = self.snapshot.image(&winner_id)?.clone();
      let bytes = fs::read(&image.source_path)
        .map_err(|e| format!("read winner image {}: {e}", image.source_path))?;
      self.publish_with_retry(control, "Winner announcement", || {
        self.publisher.publish_photo(&album_id, &bytes, &message)
      })?;
    } else {
      info!("{message}");
    }
    let phase = self.snapshot.current_phase_mut()?;
    while let Some(next) = phase.status.next() {
      phase.status = next;
    }
    self.save()?;
    Ok(winner_id)
  }
}
