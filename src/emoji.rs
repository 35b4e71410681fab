//! Emotion label to emoji mapping and the cursor animation palette.

use rand::seq::SliceRandom;

/// Closed set of labels the prediction endpoint may return, with their glyphs.
const EMOTION_EMOJI: [(&str, &str); 8] = [
    ("Neutral", "😐"),
    ("Calm", "😌"),
    ("Happy", "😊"),
    ("Sad", "😢"),
    ("Angry", "😠"),
    ("Fearful", "😨"),
    ("Disgust", "🤢"),
    ("Surprised", "😲"),
];

/// Palette for the cursor-following animation. Same glyphs as the label map.
pub const CURSOR_PALETTE: [&str; 8] = ["😐", "😌", "😊", "😢", "😠", "😨", "🤢", "😲"];

/// Glyph for a predicted label. Unrecognized labels render without an emoji.
pub fn emoji_for_label(label: &str) -> Option<&'static str> {
    EMOTION_EMOJI
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, glyph)| *glyph)
}

/// Uniformly random palette entry for one cursor marker.
pub fn random_cursor_emoji() -> &'static str {
    CURSOR_PALETTE
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(CURSOR_PALETTE[0])
}
