use std::cmp::Ordering;

use crate::types::{Gesture, Hand, HandLandmark};

const WAVE_WINDOW: usize = 6;
const WAVE_THRESHOLD: f32 = 0.12;
// Appended when no hand is in frame so a stale swing cannot linger as a wave.
const NEUTRAL_WRIST_X: f32 = 0.5;

type PoseRule = fn(&Hand) -> bool;

// Evaluated in order, every rule unconditionally; the last matching rule
// keeps the label. A closed fist therefore outranks thumbs-up and
// point-to-self whenever both fire on the same frame.
const POSE_RULES: &[(PoseRule, Gesture)] = &[
    (is_thumbs_up, Gesture::ThumbsUp),
    (is_point_to_self, Gesture::PointToSelf),
    (is_closed_fist, Gesture::No),
];

const FINGERS: [(HandLandmark, HandLandmark); 4] = [
    (HandLandmark::IndexFingerTip, HandLandmark::IndexFingerPip),
    (HandLandmark::MiddleFingerTip, HandLandmark::MiddleFingerPip),
    (HandLandmark::RingFingerTip, HandLandmark::RingFingerPip),
    (HandLandmark::PinkyTip, HandLandmark::PinkyPip),
];

/// Pick the hand closest to the camera: minimum wrist depth, first one wins
/// on a tie.
pub fn select_active_hand(hands: &[Hand]) -> Option<&Hand> {
    hands.iter().min_by(|a, b| {
        wrist_depth(a)
            .partial_cmp(&wrist_depth(b))
            .unwrap_or(Ordering::Equal)
    })
}

fn wrist_depth(hand: &Hand) -> f32 {
    hand.landmark(HandLandmark::Wrist).z
}

/// Image y grows downward, so an extended finger has its tip above the
/// proximal joint. Only valid for an upright hand facing the camera.
fn finger_extended(hand: &Hand, tip: HandLandmark, pip: HandLandmark) -> bool {
    hand.landmark(tip).y < hand.landmark(pip).y
}

fn thumb_extended(hand: &Hand) -> bool {
    finger_extended(hand, HandLandmark::ThumbTip, HandLandmark::ThumbIp)
}

fn any_finger_extended(hand: &Hand, fingers: &[(HandLandmark, HandLandmark)]) -> bool {
    fingers
        .iter()
        .any(|&(tip, pip)| finger_extended(hand, tip, pip))
}

fn is_thumbs_up(hand: &Hand) -> bool {
    thumb_extended(hand) && !any_finger_extended(hand, &FINGERS)
}

fn is_point_to_self(hand: &Hand) -> bool {
    finger_extended(
        hand,
        HandLandmark::IndexFingerTip,
        HandLandmark::IndexFingerPip,
    ) && !any_finger_extended(hand, &FINGERS[1..])
}

fn is_closed_fist(hand: &Hand) -> bool {
    !thumb_extended(hand) && !any_finger_extended(hand, &FINGERS)
}

fn resolve_rules(
    hand: &Hand,
    rules: &[(PoseRule, Gesture)],
    seed: Option<Gesture>,
) -> Option<Gesture> {
    let mut label = seed;
    for &(matches, gesture) in rules {
        if matches(hand) {
            label = Some(gesture);
        }
    }
    label
}

/// Fixed-capacity ring of recent wrist x positions, backed by an array and a
/// write index so a frame never reallocates.
struct WristHistory {
    samples: [f32; WAVE_WINDOW],
    head: usize,
    filled: usize,
}

impl WristHistory {
    fn new() -> Self {
        Self {
            samples: [0.0; WAVE_WINDOW],
            head: 0,
            filled: 0,
        }
    }

    fn push(&mut self, x: f32) {
        self.samples[self.head] = x;
        self.head = (self.head + 1) % WAVE_WINDOW;
        if self.filled < WAVE_WINDOW {
            self.filled += 1;
        }
    }

    /// Horizontal span of the window, once it holds a full window of frames.
    fn span(&self) -> Option<f32> {
        if self.filled < WAVE_WINDOW {
            return None;
        }
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &x in &self.samples {
            min = min.min(x);
            max = max.max(x);
        }
        Some(max - min)
    }
}

/// Per-frame gesture classification. The wrist history is the only state
/// carried across frames; one instance per session.
pub struct GestureClassifier {
    wrist_history: WristHistory,
}

impl GestureClassifier {
    pub fn new() -> Self {
        Self {
            wrist_history: WristHistory::new(),
        }
    }

    /// Classify one frame observation into at most one gesture.
    ///
    /// The wave window always advances, with the neutral placeholder when no
    /// hand is present. A gesture is only ever reported for a frame with an
    /// active hand; pose labels overwrite a wave detected on the same frame.
    pub fn classify(&mut self, hands: &[Hand]) -> Option<Gesture> {
        let active = select_active_hand(hands);
        self.wrist_history.push(
            active
                .map(|hand| hand.landmark(HandLandmark::Wrist).x)
                .unwrap_or(NEUTRAL_WRIST_X),
        );
        let hand = active?;

        let waving = self
            .wrist_history
            .span()
            .is_some_and(|span| span > WAVE_THRESHOLD);
        let seed = waving.then_some(Gesture::Wave);

        resolve_rules(hand, POSE_RULES, seed)
    }
}

#[cfg(test)]
fn neutral_points() -> [crate::types::Landmark; crate::types::NUM_LANDMARKS] {
    use crate::types::Landmark;
    [Landmark {
        x: 0.5,
        y: 0.5,
        z: 0.0,
    }; crate::types::NUM_LANDMARKS]
}

#[cfg(test)]
fn fist_points() -> [crate::types::Landmark; crate::types::NUM_LANDMARKS] {
    let mut points = neutral_points();
    let pairs = [
        (HandLandmark::ThumbTip, HandLandmark::ThumbIp),
        (HandLandmark::IndexFingerTip, HandLandmark::IndexFingerPip),
        (HandLandmark::MiddleFingerTip, HandLandmark::MiddleFingerPip),
        (HandLandmark::RingFingerTip, HandLandmark::RingFingerPip),
        (HandLandmark::PinkyTip, HandLandmark::PinkyPip),
    ];
    for (tip, pip) in pairs {
        points[tip.index()].y = points[pip.index()].y + 0.1;
    }
    points
}

#[cfg(test)]
fn extend(
    points: &mut [crate::types::Landmark; crate::types::NUM_LANDMARKS],
    tip: HandLandmark,
    pip: HandLandmark,
) {
    points[tip.index()].y = points[pip.index()].y - 0.1;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::Landmark;

    fn fist_hand() -> Hand {
        Hand::new(fist_points())
    }

    fn thumbs_up_hand() -> Hand {
        let mut points = fist_points();
        extend(&mut points, HandLandmark::ThumbTip, HandLandmark::ThumbIp);
        Hand::new(points)
    }

    fn point_hand() -> Hand {
        let mut points = fist_points();
        extend(
            &mut points,
            HandLandmark::IndexFingerTip,
            HandLandmark::IndexFingerPip,
        );
        Hand::new(points)
    }

    // Middle finger alone matches none of the pose rules.
    fn no_pose_hand() -> Hand {
        let mut points = fist_points();
        extend(
            &mut points,
            HandLandmark::MiddleFingerTip,
            HandLandmark::MiddleFingerPip,
        );
        Hand::new(points)
    }

    fn hand_with_wrist(x: f32, z: f32) -> Hand {
        let mut points = fist_points();
        points[HandLandmark::Wrist.index()] = Landmark { x, y: 0.5, z };
        Hand::new(points)
    }

    fn classify_sequence(
        classifier: &mut GestureClassifier,
        hand: fn() -> Hand,
        xs: &[f32],
    ) -> Vec<Option<Gesture>> {
        xs.iter()
            .map(|&x| {
                let mut points = *hand().landmarks();
                points[HandLandmark::Wrist.index()].x = x;
                classifier.classify(&[Hand::new(points)])
            })
            .collect()
    }

    #[test]
    fn selector_picks_minimum_wrist_depth() {
        let hands = [
            hand_with_wrist(0.1, 0.3),
            hand_with_wrist(0.2, -0.1),
            hand_with_wrist(0.3, 0.2),
        ];
        let active = select_active_hand(&hands).unwrap();
        assert_eq!(active.landmark(HandLandmark::Wrist).x, 0.2);
    }

    #[test]
    fn selector_tie_keeps_first_hand() {
        let hands = [hand_with_wrist(0.1, 0.2), hand_with_wrist(0.9, 0.2)];
        let active = select_active_hand(&hands).unwrap();
        assert_eq!(active.landmark(HandLandmark::Wrist).x, 0.1);
    }

    #[test]
    fn selector_empty_observation_yields_none() {
        assert!(select_active_hand(&[]).is_none());
    }

    #[test]
    fn thumbs_up_matches_only_its_rule() {
        let hand = thumbs_up_hand();
        assert!(is_thumbs_up(&hand));
        assert!(!is_point_to_self(&hand));
        assert!(!is_closed_fist(&hand));
    }

    #[test]
    fn point_to_self_matches_only_its_rule() {
        let hand = point_hand();
        assert!(!is_thumbs_up(&hand));
        assert!(is_point_to_self(&hand));
        assert!(!is_closed_fist(&hand));
    }

    #[test]
    fn closed_fist_matches_only_its_rule() {
        let hand = fist_hand();
        assert!(!is_thumbs_up(&hand));
        assert!(!is_point_to_self(&hand));
        assert!(is_closed_fist(&hand));
    }

    #[test]
    fn rule_order_is_thumbs_up_point_fist() {
        let labels: Vec<Gesture> = POSE_RULES.iter().map(|&(_, label)| label).collect();
        assert_eq!(
            labels,
            vec![Gesture::ThumbsUp, Gesture::PointToSelf, Gesture::No]
        );
    }

    #[test]
    fn later_rule_overwrites_earlier_match() {
        // Degenerate rule set where two rules fire on the same hand: the
        // later one must keep the label.
        fn always(_: &Hand) -> bool {
            true
        }
        let rules: &[(PoseRule, Gesture)] =
            &[(always, Gesture::ThumbsUp), (always, Gesture::No)];
        assert_eq!(
            resolve_rules(&fist_hand(), rules, None),
            Some(Gesture::No)
        );
    }

    #[test]
    fn pose_overwrites_wave_seed() {
        let rules: &[(PoseRule, Gesture)] = &[(is_closed_fist, Gesture::No)];
        assert_eq!(
            resolve_rules(&fist_hand(), rules, Some(Gesture::Wave)),
            Some(Gesture::No)
        );
    }

    #[test]
    fn wave_requires_full_window() {
        let mut classifier = GestureClassifier::new();
        let results =
            classify_sequence(&mut classifier, no_pose_hand, &[0.1, 0.3, 0.1, 0.3, 0.1, 0.3]);
        assert_eq!(results[..5].to_vec(), vec![None; 5]);
        assert_eq!(results[5], Some(Gesture::Wave));
    }

    #[test]
    fn small_oscillation_is_not_a_wave() {
        let mut classifier = GestureClassifier::new();
        let results = classify_sequence(
            &mut classifier,
            no_pose_hand,
            &[0.40, 0.41, 0.40, 0.41, 0.40, 0.41],
        );
        assert_eq!(results, vec![None; 6]);
    }

    #[test]
    fn steady_wrist_is_not_a_wave() {
        let mut classifier = GestureClassifier::new();
        let results = classify_sequence(&mut classifier, no_pose_hand, &[0.5; 6]);
        assert_eq!(results, vec![None; 6]);
    }

    #[test]
    fn only_the_last_six_samples_count() {
        let mut classifier = GestureClassifier::new();
        // A wide early swing followed by six flat frames: the swing must be
        // fully evicted from the window.
        let results = classify_sequence(
            &mut classifier,
            no_pose_hand,
            &[0.1, 0.9, 0.1, 0.9, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5],
        );
        assert_eq!(results[9], None);
        // And the reverse: the verdict only depends on the trailing window.
        let mut fresh = GestureClassifier::new();
        let late_swing = classify_sequence(
            &mut fresh,
            no_pose_hand,
            &[0.5, 0.5, 0.5, 0.5, 0.1, 0.3, 0.1, 0.3, 0.1, 0.3],
        );
        assert_eq!(late_swing[9], Some(Gesture::Wave));
    }

    #[test]
    fn pose_takes_precedence_over_wave() {
        let mut classifier = GestureClassifier::new();
        let results =
            classify_sequence(&mut classifier, fist_hand, &[0.1, 0.3, 0.1, 0.3, 0.1, 0.3]);
        // The oscillation satisfies the wave threshold, but the fist pose
        // fires on every frame and overwrites it.
        assert_eq!(results[5], Some(Gesture::No));
    }

    #[test]
    fn no_hand_frames_advance_history_without_gestures() {
        let mut classifier = GestureClassifier::new();
        for _ in 0..6 {
            assert_eq!(classifier.classify(&[]), None);
        }
        assert_eq!(classifier.wrist_history.span(), Some(0.0));
    }

    #[test]
    fn hand_loss_mid_wave_reports_nothing() {
        let mut classifier = GestureClassifier::new();
        classify_sequence(&mut classifier, no_pose_hand, &[0.1, 0.9, 0.1, 0.9, 0.1]);
        // The window now spans 0.8, but with no hand there is no gesture.
        assert_eq!(classifier.classify(&[]), None);
    }

    #[test]
    fn static_observation_classifies_identically_every_frame() {
        let mut classifier = GestureClassifier::new();
        let results = classify_sequence(&mut classifier, fist_hand, &[0.5; 10]);
        // Once the window is full of the same value it still never waves.
        assert_eq!(results, vec![Some(Gesture::No); 10]);
    }
}
