use image::{Rgb, RgbImage};
use models::GridDetectorConfig;
use std::fs;
use std::path::{Path, PathBuf};

pub fn tiny_model() -> GridDetectorConfig {
    GridDetectorConfig {
        grid_size: 2,
        num_classes: 3,
        base_channels: 2,
        stages: 2,
    }
}

/// `count` 16x16 images with YOLO labels for three classes; every fourth image is empty.
pub fn write_dataset(root: &Path, count: usize) -> anyhow::Result<(PathBuf, PathBuf)> {
    let images = root.join("JPEGImages");
    let labels = root.join("YOLO");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&labels)?;
    for i in 0..count {
        let stem = format!("{:06}", i + 1);
        let img = RgbImage::from_fn(16, 16, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, (i * 40 % 256) as u8])
        });
        img.save(images.join(format!("{stem}.png")))?;
        let body = if i % 4 == 3 {
            String::new()
        } else {
            format!("{} 0.3 0.3 0.4 0.4\n{} 0.75 0.7 0.2 0.3\n", i % 3, (i + 1) % 3)
        };
        fs::write(labels.join(format!("{stem}.txt")), body)?;
    }
    Ok((images, labels))
}
