//! Confidence filtering and class-scoped non-maximum suppression

use super::Detection;
use opencv::core::Rect2f;
use std::cmp::Ordering;

/// Intersection-over-union of two boxes; 0 for degenerate or non-finite input.
pub fn iou(a: &Rect2f, b: &Rect2f) -> f32 {
    let finite = [a.x, a.y, a.width, a.height, b.x, b.y, b.width, b.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || a.width < 0.0 || a.height < 0.0 || b.width < 0.0 || b.height < 0.0 {
        return 0.0;
    }

    let inter_x_min = a.x.max(b.x);
    let inter_y_min = a.y.max(b.y);
    let inter_x_max = (a.x + a.width).min(b.x + b.width);
    let inter_y_max = (a.y + a.height).min(b.y + b.height);

    if inter_x_max <= inter_x_min || inter_y_max <= inter_y_min {
        return 0.0;
    }

    let inter_area = (inter_x_max - inter_x_min) * (inter_y_max - inter_y_min);
    let union_area = a.width * a.height + b.width * b.height - inter_area;
    if union_area <= 0.0 || !union_area.is_finite() {
        return 0.0;
    }

    (inter_area / union_area).clamp(0.0, 1.0)
}

/// Keep detections whose confidence is at least `threshold`, in order.
pub fn filter_by_confidence(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.confidence.is_finite() && d.confidence >= threshold)
        .collect()
}

/// Greedy NMS run independently per class. Survivors keep their input order,
/// which makes the operation idempotent.
pub fn nms_per_class(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .partial_cmp(&detections[a].confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut suppressed = vec![false; detections.len()];
    for (rank, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        for &j in &order[rank + 1..] {
            if suppressed[j] || detections[j].class_id != detections[i].class_id {
                continue;
            }
            if iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    detections
        .iter()
        .zip(suppressed)
        .filter(|(_, gone)| !gone)
        .map(|(d, _)| d.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: i32, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(Rect2f::new(x, y, w, h), class_id, confidence, "")
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = Rect2f::new(0.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        let b = Rect2f::new(20.0, 20.0, 5.0, 5.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = Rect2f::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect2f::new(5.0, 0.0, 10.0, 10.0);
        // 50 / 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_rejects_nan() {
        let a = Rect2f::new(f32::NAN, 0.0, 10.0, 10.0);
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn test_confidence_threshold() {
        let candidates = vec![
            det(0, 0.9, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.4, 50.0, 50.0, 10.0, 10.0),
            det(0, 0.6, 100.0, 100.0, 10.0, 10.0),
        ];
        let kept = filter_by_confidence(candidates, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn test_same_class_overlap_suppressed() {
        let dets = vec![
            det(0, 0.7, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.9, 1.0, 1.0, 10.0, 10.0),
        ];
        let kept = nms_per_class(&dets, 0.45);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn test_different_classes_both_survive() {
        let dets = vec![
            det(0, 0.9, 0.0, 0.0, 10.0, 10.0),
            det(1, 0.8, 0.0, 0.0, 10.0, 10.0),
        ];
        assert_eq!(nms_per_class(&dets, 0.45).len(), 2);
    }

    #[test]
    fn test_survivors_keep_input_order() {
        let dets = vec![
            det(2, 0.3, 100.0, 0.0, 10.0, 10.0),
            det(1, 0.9, 0.0, 0.0, 10.0, 10.0),
            det(2, 0.6, 200.0, 0.0, 10.0, 10.0),
        ];
        let kept = nms_per_class(&dets, 0.45);
        assert_eq!(kept, dets);
    }

    #[test]
    fn test_empty_input() {
        assert!(nms_per_class(&[], 0.5).is_empty());
    }
}
