//! Heuristic thumbnail analysis: palette, luminance buckets, vibe and scene.
//!
//! Everything here is side-effect free and deterministic for a given image
//! and hint. The thresholds are fixed constants.

use std::path::Path;

use anyhow::Result;
use casescript_contracts::brief::{Level, SceneType, ThumbnailBrief};
use casescript_contracts::settings::BriefMode;
use image::{DynamicImage, RgbImage};
use indexmap::IndexMap;

use crate::error::PipelineError;

pub const DOMINANT_COLOR_COUNT: usize = 5;
pub const PALETTE_SAMPLE_DIM: u32 = 256;

pub const BRIGHTNESS_MEDIUM_FROM: f64 = 85.0;
pub const BRIGHTNESS_HIGH_FROM: f64 = 170.0;
pub const CONTRAST_MEDIUM_FROM: f64 = 30.0;
pub const CONTRAST_HIGH_FROM: f64 = 55.0;

pub const HOOK_ANGLE: &str =
    "Authority misreads what they're seeing; the truth is worse than it looks.";

const GENERIC_ELEMENTS: [&str; 3] = ["person", "close-up/headshot style", "dramatic framing"];

/// Hint keywords -> elements they imply.
const HINT_ELEMENTS: &[(&[&str], &[&str])] = &[
    (&["court", "judge"], &["courtroom", "defendant"]),
    (&["clown", "face paint"], &["face paint"]),
    (&["tattoo"], &["tattoos"]),
    (&["hoodie"], &["hoodie"]),
];

/// Checked top to bottom; first hit wins.
const SCENE_KEYWORDS: &[(SceneType, &[&str])] = &[
    (
        SceneType::Courtroom,
        &["court", "courtroom", "judge", "trial", "sentencing"],
    ),
    (
        SceneType::Prison,
        &["cell", "prison", "inmate", "guards", "block"],
    ),
    (
        SceneType::Footage,
        &["cctv", "footage", "camera", "bodycam", "dashcam"],
    ),
    (
        SceneType::Residential,
        &["house", "basement", "room", "apartment"],
    ),
    (
        SceneType::Interrogation,
        &["interrogation", "interview", "station"],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuminanceStats {
    pub mean: f64,
    pub std_dev: f64,
}

pub fn classify_brightness(mean: f64) -> Level {
    if mean < BRIGHTNESS_MEDIUM_FROM {
        Level::Low
    } else if mean < BRIGHTNESS_HIGH_FROM {
        Level::Medium
    } else {
        Level::High
    }
}

pub fn classify_contrast(std_dev: f64) -> Level {
    if std_dev < CONTRAST_MEDIUM_FROM {
        Level::Low
    } else if std_dev < CONTRAST_HIGH_FROM {
        Level::Medium
    } else {
        Level::High
    }
}

pub fn suggest_vibe(brightness: Level, contrast: Level) -> Vec<String> {
    let mut vibe = Vec::new();
    if brightness == Level::Low {
        vibe.push("ominous".to_string());
    }
    if matches!(contrast, Level::Medium | Level::High) {
        vibe.push("high tension".to_string());
    }
    if brightness == Level::High && contrast == Level::High {
        vibe.push("harsh clarity".to_string());
    }
    if vibe.is_empty() {
        vibe.push("uneasy".to_string());
    }
    vibe
}

pub fn guess_scene_type(elements: &[String], hint: &str) -> SceneType {
    let mut haystack = elements.join(" ");
    haystack.push(' ');
    haystack.push_str(hint);
    let haystack = haystack.to_lowercase();
    SCENE_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|word| haystack.contains(word)))
        .map(|(scene, _)| *scene)
        .unwrap_or(SceneType::Unknown)
}

/// Elements implied by the hint, or the generic placeholder set when the
/// hint names nothing recognisable. Sorted and de-duplicated.
pub fn hint_elements(hint: &str) -> Vec<String> {
    let lowered = hint.to_lowercase();
    let mut elements: Vec<String> = HINT_ELEMENTS
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|word| lowered.contains(word)))
        .flat_map(|(_, implied)| implied.iter().map(|item| (*item).to_string()))
        .collect();
    if elements.is_empty() {
        elements = GENERIC_ELEMENTS.iter().map(|item| (*item).to_string()).collect();
    }
    elements.sort();
    elements.dedup();
    elements
}

// ITU-R 601-2 luma, same integer rounding as the common "L" conversion.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16) as u8
}

pub fn luminance_stats(image: &RgbImage) -> Result<LuminanceStats> {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return Err(PipelineError::InvalidImage("image has no pixels".to_string()).into());
    }
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    for pixel in image.pixels() {
        let value = f64::from(luma(pixel[0], pixel[1], pixel[2]));
        sum += value;
        sum_sq += value * value;
    }
    let n = count as f64;
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    Ok(LuminanceStats {
        mean,
        std_dev: variance.sqrt(),
    })
}

/// Top `k` colours of a downsampled copy, most frequent first, keyed
/// `color_1`..`color_k`.
///
/// Pixels are bucketed on the top two bits of each channel (64 buckets) and
/// each bucket reports the mean colour of its members.
pub fn dominant_colors(image: &DynamicImage, k: usize) -> IndexMap<String, String> {
    let sample = if image.width() > PALETTE_SAMPLE_DIM || image.height() > PALETTE_SAMPLE_DIM {
        image.thumbnail(PALETTE_SAMPLE_DIM, PALETTE_SAMPLE_DIM).to_rgb8()
    } else {
        image.to_rgb8()
    };
    let mut buckets = [(0u64, 0u64, 0u64, 0u64); 64];
    for pixel in sample.pixels() {
        let [r, g, b] = pixel.0;
        let idx = usize::from(r >> 6) << 4 | usize::from(g >> 6) << 2 | usize::from(b >> 6);
        let bucket = &mut buckets[idx];
        bucket.0 += 1;
        bucket.1 += u64::from(r);
        bucket.2 += u64::from(g);
        bucket.3 += u64::from(b);
    }

    let mut ranked: Vec<(usize, (u64, u64, u64, u64))> = buckets
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, bucket)| bucket.0 > 0)
        .collect();
    ranked.sort_by(|left, right| right.1 .0.cmp(&left.1 .0).then(left.0.cmp(&right.0)));

    ranked
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(position, (_, (count, r, g, b)))| {
            let mean = |total: u64| ((total + count / 2) / count) as u8;
            (
                format!("color_{}", position + 1),
                format!("#{}", hex::encode([mean(r), mean(g), mean(b)])),
            )
        })
        .collect()
}

fn composition_notes(width: u32, height: u32, brightness: Level, contrast: Level) -> Vec<String> {
    let mut notes = vec![if width > height {
        "landscape thumbnail".to_string()
    } else {
        "portrait/vertical thumbnail".to_string()
    }];
    if brightness == Level::Low {
        notes.push("dark lighting suggests danger/unknown".to_string());
    }
    if contrast == Level::High {
        notes.push("high contrast increases dramatic emphasis".to_string());
    }
    notes
}

pub fn analyze_thumbnail(image: &DynamicImage, hint: &str) -> Result<ThumbnailBrief> {
    let rgb = image.to_rgb8();
    let stats = luminance_stats(&rgb)?;
    let brightness = classify_brightness(stats.mean);
    let contrast = classify_contrast(stats.std_dev);
    let visible_elements = hint_elements(hint);
    let scene_type = guess_scene_type(&visible_elements, hint);

    Ok(ThumbnailBrief {
        scene_type,
        visible_elements,
        vibe: suggest_vibe(brightness, contrast),
        hook_angle: HOOK_ANGLE.to_string(),
        composition_notes: composition_notes(rgb.width(), rgb.height(), brightness, contrast),
        text_on_thumbnail: None,
        colors: dominant_colors(image, DOMINANT_COLOR_COUNT),
        brightness,
        contrast,
        user_hint: hint.to_string(),
    })
}

/// Constant brief for runs that skip image analysis. Only the hint is kept.
pub fn fixed_template_brief(hint: &str) -> ThumbnailBrief {
    let mut colors = IndexMap::new();
    colors.insert("color_1".to_string(), "#0b0b0f".to_string());
    colors.insert("color_2".to_string(), "#8a1c1c".to_string());
    colors.insert("color_3".to_string(), "#d9d4c7".to_string());
    ThumbnailBrief {
        scene_type: SceneType::Courtroom,
        visible_elements: vec![
            "courtroom".to_string(),
            "defendant".to_string(),
            "face paint".to_string(),
        ],
        vibe: vec!["ominous".to_string(), "high tension".to_string()],
        hook_angle: HOOK_ANGLE.to_string(),
        composition_notes: vec![
            "landscape thumbnail".to_string(),
            "close-up on the defendant".to_string(),
        ],
        text_on_thumbnail: None,
        colors,
        brightness: Level::Low,
        contrast: Level::High,
        user_hint: hint.to_string(),
    }
}

pub fn load_thumbnail(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|err| {
        PipelineError::InvalidImage(format!("{}: {err}", path.display())).into()
    })
}

pub fn build_brief(image: &DynamicImage, hint: &str, mode: BriefMode) -> Result<ThumbnailBrief> {
    match mode {
        BriefMode::Heuristic => analyze_thumbnail(image, hint),
        BriefMode::FixedTemplate => Ok(fixed_template_brief(hint)),
    }
}

#[cfg(test)]
mod tests {
    use casescript_contracts::brief::{Level, SceneType};
    use casescript_contracts::settings::BriefMode;
    use image::{DynamicImage, Rgb, RgbImage};

    use super::{
        analyze_thumbnail, build_brief, classify_brightness, classify_contrast, dominant_colors,
        guess_scene_type, hint_elements, luminance_stats, suggest_vibe,
    };

    fn gray_halves(width: u32, height: u32, low: u8, high: u8) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            let value = if x < width / 2 { low } else { high };
            Rgb([value, value, value])
        })
    }

    #[test]
    fn brightness_buckets_are_total_with_closed_lower_bounds() {
        assert_eq!(classify_brightness(0.0), Level::Low);
        assert_eq!(classify_brightness(84.999), Level::Low);
        assert_eq!(classify_brightness(85.0), Level::Medium);
        assert_eq!(classify_brightness(169.999), Level::Medium);
        assert_eq!(classify_brightness(170.0), Level::High);
        assert_eq!(classify_brightness(255.0), Level::High);
    }

    #[test]
    fn contrast_buckets_are_total_with_closed_lower_bounds() {
        assert_eq!(classify_contrast(0.0), Level::Low);
        assert_eq!(classify_contrast(29.9), Level::Low);
        assert_eq!(classify_contrast(30.0), Level::Medium);
        assert_eq!(classify_contrast(54.9), Level::Medium);
        assert_eq!(classify_contrast(55.0), Level::High);
        assert_eq!(classify_contrast(127.5), Level::High);
    }

    #[test]
    fn vibe_rule_table() {
        assert_eq!(suggest_vibe(Level::Low, Level::Low), vec!["ominous"]);
        assert_eq!(
            suggest_vibe(Level::Low, Level::High),
            vec!["ominous", "high tension"]
        );
        assert_eq!(
            suggest_vibe(Level::High, Level::High),
            vec!["high tension", "harsh clarity"]
        );
        assert_eq!(suggest_vibe(Level::Medium, Level::Low), vec!["uneasy"]);
        assert_eq!(suggest_vibe(Level::High, Level::Low), vec!["uneasy"]);
    }

    #[test]
    fn mean_90_std_40_reads_medium_medium_high_tension() -> anyhow::Result<()> {
        let image = gray_halves(64, 32, 50, 130);
        let stats = luminance_stats(&image)?;
        assert!((stats.mean - 90.0).abs() < 1e-9);
        assert!((stats.std_dev - 40.0).abs() < 1e-9);

        let brief = analyze_thumbnail(&DynamicImage::ImageRgb8(image), "")?;
        assert_eq!(brief.brightness, Level::Medium);
        assert_eq!(brief.contrast, Level::Medium);
        assert_eq!(brief.vibe, vec!["high tension"]);
        Ok(())
    }

    #[test]
    fn dominant_colors_are_capped_hex_and_frequency_ordered() {
        let image = RgbImage::from_fn(100, 10, |x, _| match x {
            0..=59 => Rgb([200, 20, 20]),
            60..=89 => Rgb([10, 10, 10]),
            _ => Rgb([240, 240, 240]),
        });
        let colors = dominant_colors(&DynamicImage::ImageRgb8(image), 5);
        assert_eq!(colors.len(), 3);
        assert_eq!(colors.get("color_1").map(String::as_str), Some("#c81414"));
        assert_eq!(colors.get("color_2").map(String::as_str), Some("#0a0a0a"));
        for value in colors.values() {
            assert_eq!(value.len(), 7);
            assert!(value.starts_with('#'));
            assert!(value[1..].chars().all(|ch| ch.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn dominant_colors_never_exceed_k() {
        let image = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        let colors = dominant_colors(&DynamicImage::ImageRgb8(image), 5);
        assert_eq!(colors.len(), 5);
        let keys: Vec<&str> = colors.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["color_1", "color_2", "color_3", "color_4", "color_5"]);
    }

    #[test]
    fn hint_keywords_drive_elements_and_scene() {
        let elements = hint_elements("Judge stares at clown in a hoodie");
        assert_eq!(
            elements,
            vec!["courtroom", "defendant", "face paint", "hoodie"]
        );
        assert_eq!(guess_scene_type(&elements, ""), SceneType::Courtroom);
    }

    #[test]
    fn empty_hint_falls_back_to_generic_elements() {
        let elements = hint_elements("");
        assert_eq!(
            elements,
            vec!["close-up/headshot style", "dramatic framing", "person"]
        );
        assert_eq!(guess_scene_type(&elements, ""), SceneType::Unknown);
    }

    #[test]
    fn scene_priority_prefers_earlier_categories() {
        let none: Vec<String> = Vec::new();
        assert_eq!(
            guess_scene_type(&none, "bodycam from the prison block"),
            SceneType::Prison
        );
        assert_eq!(guess_scene_type(&none, "dashcam at night"), SceneType::Footage);
        assert_eq!(
            guess_scene_type(&none, "police station interview"),
            SceneType::Interrogation
        );
        assert_eq!(guess_scene_type(&none, "a basement"), SceneType::Residential);
    }

    #[test]
    fn composition_notes_follow_orientation_and_levels() -> anyhow::Result<()> {
        let dark_tall = DynamicImage::ImageRgb8(gray_halves(10, 40, 0, 200));
        let brief = analyze_thumbnail(&dark_tall, "")?;
        assert_eq!(brief.brightness, Level::Medium);
        assert_eq!(brief.contrast, Level::High);
        assert_eq!(
            brief.composition_notes,
            vec![
                "portrait/vertical thumbnail",
                "high contrast increases dramatic emphasis"
            ]
        );

        let black_wide = DynamicImage::ImageRgb8(RgbImage::new(40, 10));
        let brief = analyze_thumbnail(&black_wide, "court")?;
        assert_eq!(
            brief.composition_notes,
            vec!["landscape thumbnail", "dark lighting suggests danger/unknown"]
        );
        assert_eq!(brief.user_hint, "court");
        Ok(())
    }

    #[test]
    fn empty_image_is_rejected() {
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(analyze_thumbnail(&empty, "").is_err());
    }

    #[test]
    fn unreadable_file_is_an_invalid_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("thumb.png");
        std::fs::write(&path, b"not a png")?;
        let err = super::load_thumbnail(&path).err();
        assert!(err
            .as_ref()
            .and_then(|err| err.downcast_ref::<crate::error::PipelineError>())
            .is_some_and(|err| matches!(err, crate::error::PipelineError::InvalidImage(_))));
        Ok(())
    }

    #[test]
    fn fixed_template_mode_ignores_pixels() -> anyhow::Result<()> {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
        let brief = build_brief(&white, "my hint", BriefMode::FixedTemplate)?;
        assert_eq!(brief.brightness, Level::Low);
        assert_eq!(brief.scene_type, SceneType::Courtroom);
        assert_eq!(brief.user_hint, "my hint");
        Ok(())
    }
}
