use crate::types::*;
use rand::seq::SliceRandom;
use rand::Rng;

/// Generate the match list for one phase.
///
/// Participants are shuffled, then split into `ceil(n / per_match)`
/// contiguous groups of `per_match`, the last taking the remainder. If the
/// last group would hold a single entrant (a forced auto-win, which
/// contradicts the voting premise), the second-to-last group gives up one
/// member to it. Only the second-to-last group is ever rebalanced; that is
/// the documented policy, not a general redistribution.
///
/// Each group gets distinct reactions drawn from a freshly shuffled copy
/// of the option list.
pub fn generate_matches(
  participants: &[String],
  per_match: usize,
  reactions: &[ReactionOption],
  rng: &mut impl Rng,
) -> Result<Vec<MatchData>, String> {
  if per_match < 2 {
    return Err(format!("Need at least 2 participants per match, got {per_match}."));
  }
  if reactions.len() < per_match {
    return Err(format!(
      "Need at least {per_match} reactions, got {}.",
      reactions.len()
    ));
  }
  if participants.is_empty() {
    return Err("Cannot generate matches for an empty phase.".to_string());
  }

  let mut shuffled: Vec<String> = participants.to_vec();
  shuffled.shuffle(rng);

  let n = shuffled.len();
  let match_count = n.div_ceil(per_match);
  let mut sizes = vec![per_match; match_count];
  sizes[match_count - 1] = n - per_match * (match_count - 1);
  // With pairs the shrink would just move the solo one match earlier, so
  // the rebalance only applies to wider matches.
  if match_count >= 2 && sizes[match_count - 1] == 1 && per_match > 2 {
    // avoid auto win on last match
    sizes[match_count - 2] -= 1;
    sizes[match_count - 1] += 1;
  }

  let mut matches = Vec::with_capacity(match_count);
  let mut offset = 0;
  for (idx, size) in sizes.into_iter().enumerate() {
    let mut options: Vec<&ReactionOption> = reactions.iter().collect();
    options.shuffle(rng);
    let group = &shuffled[offset..offset + size];
    offset += size;
    let match_participants = group
      .iter()
      .zip(options.iter())
      .map(|(image_id, option)| MatchParticipant {
        image_id: image_id.clone(),
        reaction: option.name.clone(),
        votes: 0,
      })
      .collect();
    matches.push(MatchData::new((idx + 1) as u32, match_participants));
  }
  Ok(matches)
}
