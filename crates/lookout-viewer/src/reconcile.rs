use lookout_types::images::{DetectionMap, ImageRecord, JoinedImage};

/// Whether the freshly fetched list differs from the one on display.
///
/// Comparison is positional: a different length, or a different
/// `modified_at` at any index, counts as a change. Reordering the same
/// images therefore also counts as a change.
pub fn images_changed(previous: &[ImageRecord], current: &[ImageRecord]) -> bool {
    previous.len() != current.len()
        || previous
            .iter()
            .zip(current)
            .any(|(before, after)| before.modified_at != after.modified_at)
}

/// Attach detections by join key, keeping backend order.
pub fn join_detections(images: &[ImageRecord], detections: &DetectionMap) -> Vec<JoinedImage> {
    images
        .iter()
        .map(|image| JoinedImage {
            detections: image
                .join_key()
                .and_then(|key| detections.get(key))
                .cloned(),
            image: image.clone(),
        })
        .collect()
}
