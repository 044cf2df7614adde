//! Incremental user-profile updates.

use crate::models::CategoryScore;

/// Blends an event's cluster scores into a user's score vector.
///
/// Pure function: inputs are untouched and a new vector is returned, so
/// repository retries can re-apply it without double-counting side effects.
///
/// Matching is exact-string and case-sensitive. Existing categories are
/// updated in place (order preserved) with `score += event_score * weight`,
/// hard-clamped to [0, 1]. New categories are appended in the order they
/// appear in `event_scores` with `event_score * weight`, which is already
/// in range when both factors are.
pub fn update_profile(
    user_scores: &[CategoryScore],
    event_scores: &[CategoryScore],
    weight: f32,
) -> Vec<CategoryScore> {
    let mut updated = user_scores.to_vec();

    for event_entry in event_scores {
        match updated
            .iter_mut()
            .find(|entry| entry.category == event_entry.category)
        {
            Some(entry) => {
                entry.score = (entry.score + event_entry.score * weight).clamp(0.0, 1.0);
            }
            None => {
                updated.push(CategoryScore::new(
                    event_entry.category.clone(),
                    event_entry.score * weight,
                ));
            }
        }
    }

    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f32)]) -> Vec<CategoryScore> {
        pairs
            .iter()
            .map(|(category, score)| CategoryScore::new(*category, *score))
            .collect()
    }

    #[test]
    fn test_existing_category_is_blended_and_clamped() {
        let user = scores(&[("Jazz lovers", 0.9)]);
        let event = scores(&[("Jazz lovers", 1.0)]);

        let updated = update_profile(&user, &event, 0.3);
        assert_eq!(updated.len(), 1);
        assert!((updated[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_new_categories_append_in_event_order() {
        let user = scores(&[("Jazz lovers", 0.5)]);
        let event = scores(&[("Foodies", 0.8), ("Night owls", 0.6)]);

        let updated = update_profile(&user, &event, 0.5);
        let categories: Vec<&str> = updated.iter().map(|e| e.category.as_str()).collect();
        assert_eq!(categories, vec!["Jazz lovers", "Foodies", "Night owls"]);
        assert!((updated[1].score - 0.4).abs() < 1e-6);
        assert!((updated[2].score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_category_matching_is_case_sensitive() {
        let user = scores(&[("music", 0.5)]);
        let event = scores(&[("Music", 0.5)]);

        let updated = update_profile(&user, &event, 0.3);
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].category, "music");
        assert_eq!(updated[1].category, "Music");
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let user = scores(&[("Jazz lovers", 0.5)]);
        let event = scores(&[("Jazz lovers", 0.5)]);
        let user_before = user.clone();
        let event_before = event.clone();

        let _ = update_profile(&user, &event, 0.3);
        assert_eq!(user, user_before);
        assert_eq!(event, event_before);
    }

    #[test]
    fn test_clamp_invariant_over_many_updates() {
        let event = scores(&[("Jazz lovers", 1.0), ("Foodies", 0.7)]);
        let mut user = Vec::new();
        for _ in 0..100 {
            user = update_profile(&user, &event, 1.0);
            assert!(user
                .iter()
                .all(|entry| (0.0..=1.0).contains(&entry.score)));
        }
    }
}
