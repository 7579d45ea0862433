//! Indexing YOLO label files against a VOC image folder.

use crate::types::{VocError, VocResult, VocSample, YoloBox};
use rand::{seq::SliceRandom, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Parse one YOLO label file (`class cx cy w h` per line).
///
/// Blank lines are skipped; an empty file is an image with no objects.
pub fn parse_label_file(path: &Path, num_classes: usize) -> VocResult<Vec<YoloBox>> {
    let raw = fs::read_to_string(path).map_err(|e| VocError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_label_str(&raw, path, num_classes)
}

pub(crate) fn parse_label_str(
    raw: &str,
    path: &Path,
    num_classes: usize,
) -> VocResult<Vec<YoloBox>> {
    let mut boxes = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        let line_no = i + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let label_err = |msg: String| VocError::Label {
            path: path.to_path_buf(),
            line: line_no,
            msg,
        };
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(label_err(format!(
                "expected 5 fields (class cx cy w h), found {}",
                fields.len()
            )));
        }
        let class_id: usize = fields[0]
            .parse()
            .map_err(|_| label_err(format!("invalid class id {:?}", fields[0])))?;
        if class_id >= num_classes {
            return Err(label_err(format!(
                "class id {class_id} out of range (num_classes={num_classes})"
            )));
        }
        let mut coords = [0.0f32; 4];
        for (slot, raw) in coords.iter_mut().zip(&fields[1..]) {
            *slot = raw
                .parse()
                .map_err(|_| label_err(format!("invalid coordinate {raw:?}")))?;
        }
        if coords
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0)
        {
            return Err(label_err(format!("coordinates out of [0,1]: {coords:?}")));
        }
        if coords[2] <= 0.0 || coords[3] <= 0.0 {
            return Err(label_err(format!("non-positive box size: {coords:?}")));
        }
        boxes.push(YoloBox {
            class_id,
            cx: coords[0],
            cy: coords[1],
            w: coords[2],
            h: coords[3],
        });
    }
    Ok(boxes)
}

fn find_image(image_dir: &Path, stem: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_ascii_uppercase()])
        .map(|ext| image_dir.join(format!("{stem}.{ext}")))
        .find(|p| p.is_file())
}

/// Scan `label_dir` for `.txt` files and pair each with its image in `image_dir`.
///
/// The result is sorted by stem so iteration order is stable across platforms.
pub fn index_dir(
    image_dir: &Path,
    label_dir: &Path,
    num_classes: usize,
) -> VocResult<Vec<VocSample>> {
    let entries = fs::read_dir(label_dir).map_err(|e| VocError::Io {
        path: label_dir.to_path_buf(),
        source: e,
    })?;
    let mut samples = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VocError::Io {
            path: label_dir.to_path_buf(),
            source: e,
        })?;
        let label_path = entry.path();
        if label_path.extension().and_then(|s| s.to_str()) != Some("txt") {
            continue;
        }
        let Some(stem) = label_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let stem = stem.to_string();
        let image = find_image(image_dir, &stem).ok_or_else(|| VocError::MissingImage {
            label: label_path.clone(),
            stem: stem.clone(),
            image_dir: image_dir.to_path_buf(),
        })?;
        let boxes = parse_label_file(&label_path, num_classes)?;
        samples.push(VocSample {
            stem,
            image,
            label: label_path,
            boxes,
        });
    }
    samples.sort_by(|a, b| a.stem.cmp(&b.stem));
    Ok(samples)
}

/// Split samples into (train, val) by shuffling with `seed` and carving off `val_ratio`.
///
/// A ratio of zero returns the full set for both sides.
pub fn split_samples(
    samples: Vec<VocSample>,
    val_ratio: f32,
    seed: Option<u64>,
) -> (Vec<VocSample>, Vec<VocSample>) {
    if val_ratio <= 0.0 || samples.is_empty() {
        return (samples.clone(), samples);
    }
    let mut shuffled = samples;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed.unwrap_or(0));
    shuffled.shuffle(&mut rng);
    let val_len = ((shuffled.len() as f32 * val_ratio.min(1.0)).round() as usize)
        .clamp(1, shuffled.len().saturating_sub(1).max(1));
    let val = shuffled.split_off(shuffled.len() - val_len);
    (shuffled, val)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(stem: &str) -> VocSample {
        VocSample {
            stem: stem.into(),
            image: format!("{stem}.jpg").into(),
            label: format!("{stem}.txt").into(),
            boxes: Vec::new(),
        }
    }

    #[test]
    fn parses_lines_and_skips_blanks() {
        let raw = "14 0.5 0.5 0.2 0.4\n\n  7 0.1 0.2 0.05 0.1  \n";
        let boxes = parse_label_str(raw, Path::new("x.txt"), 20).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 14);
        assert!((boxes[1].cy - 0.2).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_class_with_line_number() {
        let raw = "1 0.5 0.5 0.2 0.2\n20 0.5 0.5 0.2 0.2\n";
        match parse_label_str(raw, Path::new("x.txt"), 20) {
            Err(VocError::Label { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected label error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_fields() {
        assert!(parse_label_str("1 0.5 0.5 0.2", Path::new("x.txt"), 20).is_err());
        assert!(parse_label_str("1 0.5 nan 0.2 0.2", Path::new("x.txt"), 20).is_err());
        assert!(parse_label_str("1 0.5 0.5 0.0 0.2", Path::new("x.txt"), 20).is_err());
        assert!(parse_label_str("a 0.5 0.5 0.2 0.2", Path::new("x.txt"), 20).is_err());
    }

    #[test]
    fn zero_ratio_keeps_full_set_on_both_sides() {
        let (train, val) = split_samples(vec![sample("a"), sample("b")], 0.0, None);
        assert_eq!(train.len(), 2);
        assert_eq!(val.len(), 2);
    }

    #[test]
    fn split_is_disjoint_and_deterministic() {
        let all: Vec<_> = (0..10).map(|i| sample(&format!("{i:03}"))).collect();
        let (train_a, val_a) = split_samples(all.clone(), 0.2, Some(7));
        let (train_b, val_b) = split_samples(all, 0.2, Some(7));
        assert_eq!(val_a.len(), 2);
        assert_eq!(train_a.len(), 8);
        let stems = |v: &[VocSample]| v.iter().map(|s| s.stem.clone()).collect::<Vec<_>>();
        assert_eq!(stems(&val_a), stems(&val_b));
        assert_eq!(stems(&train_a), stems(&train_b));
        assert!(val_a.iter().all(|v| train_a.iter().all(|t| t.stem != v.stem)));
    }
}
