//! Survey voting.
//!
//! A user holds at most one vote per survey. Voting again with another
//! option moves the vote; voting again with the same option changes nothing.

use super::{forum::Capabilities, Viewer, Visibility};
use crate::{
    error::AppError,
    models::{Survey, SurveyOption},
};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;

pub const MAX_OPTION_LEN: usize = 255;

/// Closed either by hand or because `closes_at` has passed.
pub fn is_open(survey: &Survey, now: DateTime<Utc>) -> bool {
    if survey.is_closed {
        return false;
    }
    match survey.closes_at {
        Some(closes_at) => closes_at >= now,
        None => true,
    }
}

pub fn can_vote(
    survey: &Survey,
    forum_visibility: Visibility,
    caps: &Capabilities,
    viewer: Option<&Viewer>,
    now: DateTime<Utc>,
) -> bool {
    if viewer.is_none() || !is_open(survey, now) {
        return false;
    }
    if !caps.can_read {
        return false;
    }
    forum_visibility == Visibility::Public || caps.can_write
}

/// What a ballot does to the (survey, user) vote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    Changed { previous_option: i32 },
    Unchanged,
}

impl VoteOutcome {
    pub fn decide(existing_option: Option<i32>, chosen_option: i32) -> VoteOutcome {
        match existing_option {
            None => VoteOutcome::Recorded,
            Some(previous) if previous == chosen_option => VoteOutcome::Unchanged,
            Some(previous_option) => VoteOutcome::Changed { previous_option },
        }
    }

    /// Whether the vote row has to be written.
    pub fn writes(self) -> bool {
        !matches!(self, VoteOutcome::Unchanged)
    }

    pub fn message(self, option_text: &str) -> String {
        match self {
            VoteOutcome::Recorded => format!("Thanks for voting for '{option_text}'!"),
            VoteOutcome::Changed { .. } => format!("Your vote was changed to '{option_text}'."),
            VoteOutcome::Unchanged => "You already voted for this option.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub option_id: i32,
    pub text: String,
    pub vote_count: usize,
    pub percentage: f64,
}

/// Per-option counts, in option order. `votes` holds one option id per vote.
pub fn tally(options: &[SurveyOption], votes: &[i32]) -> Vec<OptionTally> {
    let total = votes.len();
    let counts = votes.iter().copied().counts();
    options
        .iter()
        .sorted_by_key(|o| (o.position, o.id))
        .map(|option| {
            let vote_count = counts.get(&option.id).copied().unwrap_or(0);
            OptionTally {
                option_id: option.id,
                text: option.text.clone(),
                vote_count,
                percentage: percentage(vote_count, total),
            }
        })
        .collect()
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    Empty,
    TooLong,
    Duplicate(String),
}

impl OptionError {
    pub fn message(&self) -> String {
        match self {
            OptionError::Empty => "an option cannot be empty".to_string(),
            OptionError::TooLong => format!("an option is limited to {MAX_OPTION_LEN} characters"),
            OptionError::Duplicate(text) => format!("the option '{text}' already exists"),
        }
    }
}

impl From<OptionError> for AppError {
    fn from(e: OptionError) -> AppError {
        let code = match e {
            OptionError::Duplicate(_) => StatusCode::CONFLICT,
            OptionError::Empty | OptionError::TooLong => StatusCode::BAD_REQUEST,
        };
        AppError::from(code, e.message())
    }
}

/// Trims the candidates and checks them against the survey's existing
/// options and each other, ignoring case.
pub fn check_new_options<S: AsRef<str>>(
    existing: &[SurveyOption],
    candidates: &[S],
) -> Result<Vec<String>, OptionError> {
    let mut seen: Vec<String> = existing.iter().map(|o| o.text.trim().to_lowercase()).collect();
    let mut accepted = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let text = candidate.as_ref().trim();
        if text.is_empty() {
            return Err(OptionError::Empty);
        }
        if text.chars().count() > MAX_OPTION_LEN {
            return Err(OptionError::TooLong);
        }
        let key = text.to_lowercase();
        if seen.contains(&key) {
            return Err(OptionError::Duplicate(text.to_string()));
        }
        seen.push(key);
        accepted.push(text.to_string());
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashMap;

    fn survey(is_closed: bool, closes_at: Option<DateTime<Utc>>) -> Survey {
        let now = Utc::now();
        Survey {
            id: 1,
            forum_id: 1,
            title: "Next outing".to_string(),
            description: String::new(),
            author_id: 10,
            closes_at,
            is_closed,
            created_at: now,
            updated_at: now,
        }
    }

    fn option(id: i32, text: &str, position: i32) -> SurveyOption {
        SurveyOption {
            id,
            survey_id: 1,
            text: text.to_string(),
            position,
            created_at: Utc::now(),
        }
    }

    fn viewer(id: i32) -> Viewer {
        Viewer {
            id,
            is_superuser: false,
            is_staff: false,
        }
    }

    const OPEN_CAPS: Capabilities = Capabilities {
        can_read: true,
        can_write: true,
        can_manage: false,
    };

    #[test]
    fn survey_closes_by_flag_or_deadline() {
        let now = Utc::now();
        assert!(is_open(&survey(false, None), now));
        assert!(!is_open(&survey(true, None), now));
        assert!(!is_open(&survey(false, Some(now - Duration::minutes(1))), now));
        assert!(is_open(&survey(false, Some(now + Duration::minutes(1))), now));
    }

    #[test]
    fn voting_requires_an_open_survey_and_forum_access() {
        let now = Utc::now();
        let s = survey(false, None);
        let v = viewer(3);
        assert!(can_vote(&s, Visibility::Public, &OPEN_CAPS, Some(&v), now));
        assert!(!can_vote(&s, Visibility::Public, &OPEN_CAPS, None, now));
        assert!(!can_vote(
            &survey(true, None),
            Visibility::Public,
            &OPEN_CAPS,
            Some(&v),
            now
        ));

        let outsider = Capabilities::default();
        assert!(!can_vote(&s, Visibility::Private, &outsider, Some(&v), now));

        let read_only = Capabilities {
            can_read: true,
            ..Capabilities::default()
        };
        assert!(!can_vote(&s, Visibility::Private, &read_only, Some(&v), now));
    }

    #[test]
    fn vote_decisions() {
        assert_eq!(VoteOutcome::decide(None, 1), VoteOutcome::Recorded);
        assert_eq!(VoteOutcome::decide(Some(1), 1), VoteOutcome::Unchanged);
        assert_eq!(
            VoteOutcome::decide(Some(1), 2),
            VoteOutcome::Changed { previous_option: 1 }
        );
        assert!(!VoteOutcome::Unchanged.writes());
        assert!(VoteOutcome::Recorded.writes());
    }

    /// Mirrors the upsert keyed by (survey, user).
    fn cast(rows: &mut HashMap<(i32, i32), i32>, survey: i32, user: i32, option: i32) -> VoteOutcome {
        let outcome = VoteOutcome::decide(rows.get(&(survey, user)).copied(), option);
        if outcome.writes() {
            rows.insert((survey, user), option);
        }
        outcome
    }

    #[test]
    fn changing_a_vote_keeps_a_single_row() {
        let (yes, no) = (1, 2);
        let mut rows = HashMap::new();
        assert_eq!(cast(&mut rows, 1, 7, yes), VoteOutcome::Recorded);
        assert_eq!(
            cast(&mut rows, 1, 7, no),
            VoteOutcome::Changed { previous_option: yes }
        );
        assert_eq!(cast(&mut rows, 1, 7, no), VoteOutcome::Unchanged);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[&(1, 7)], no);
    }

    #[test]
    fn tally_reports_rounded_percentages_in_option_order() {
        let options = vec![option(2, "No", 1), option(1, "Yes", 0), option(3, "Maybe", 2)];
        let t = tally(&options, &[1, 1, 2]);
        assert_eq!(t[0].text, "Yes");
        assert_eq!(t[0].vote_count, 2);
        assert_eq!(t[0].percentage, 66.7);
        assert_eq!(t[1].percentage, 33.3);
        assert_eq!(t[2].vote_count, 0);
        assert_eq!(t[2].percentage, 0.0);
    }

    #[test]
    fn tally_without_votes_is_all_zero() {
        let t = tally(&[option(1, "Yes", 0)], &[]);
        assert_eq!(t[0].percentage, 0.0);
    }

    #[test]
    fn options_are_unique_ignoring_case() {
        let existing = vec![option(1, "Yes", 0)];
        assert_eq!(
            check_new_options(&existing, &["  yes "]),
            Err(OptionError::Duplicate("yes".to_string()))
        );
        assert_eq!(
            check_new_options(&[], &["No", "NO"]),
            Err(OptionError::Duplicate("NO".to_string()))
        );
        assert_eq!(check_new_options(&[], &["   "]), Err(OptionError::Empty));
        assert_eq!(
            check_new_options(&existing, &[" No "]),
            Ok(vec!["No".to_string()])
        );
    }
}
