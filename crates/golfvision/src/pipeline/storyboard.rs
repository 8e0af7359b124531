//! Camera plan, narration and captions derived from course data.
//!
//! Everything here is a pure function of its inputs and the job seed, so a
//! resubmitted job renders the same flyover.

use std::fmt::Write as _;

use crate::config::VideoConfig;
use crate::engines::{CameraPlan, CameraShot, CourseData, CourseLayout, NarrationScript};
use crate::job::{Job, MAX_SEED};

/// Small deterministic generator (SplitMix64).
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[lo, hi)`.
    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        let unit = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        lo + unit * (hi - lo)
    }
}

/// The job's seed, or one derived from its subject name (FNV-1a).
pub fn effective_seed(job: &Job) -> u64 {
    job.seed.unwrap_or_else(|| {
        let hash = job
            .subject_name
            .to_lowercase()
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
            });
        hash % (MAX_SEED + 1)
    })
}

pub fn camera_plan(layout: &CourseLayout, seed: u64, video: &VideoConfig) -> CameraPlan {
    let mut rng = SplitMix64(seed);
    let frames_per_hole = ((video.seconds_per_hole * f64::from(video.fps)).round() as u32).max(1);

    let shots = if layout.holes.is_empty() {
        vec![CameraShot {
            hole: 0,
            frames: frames_per_hole * 3,
            altitude_m: rng.range(150.0, 250.0),
            heading_deg: rng.range(0.0, 360.0),
            orbit_deg: 360.0,
        }]
    } else {
        let step = 360.0 / layout.holes.len() as f64;
        layout
            .holes
            .iter()
            .enumerate()
            .map(|(i, hole)| {
                let direction = if rng.next_u64() % 2 == 0 { 1.0 } else { -1.0 };
                CameraShot {
                    hole: hole.number,
                    frames: frames_per_hole,
                    altitude_m: rng.range(80.0, 160.0),
                    heading_deg: (i as f64 * step + rng.range(-15.0, 15.0)).rem_euclid(360.0),
                    orbit_deg: direction * rng.range(20.0, 60.0),
                }
            })
            .collect()
    };

    CameraPlan {
        fps: video.fps,
        width: video.width,
        height: video.height,
        shots,
    }
}

fn humanize(feature: &str) -> String {
    feature.replace('_', " ")
}

fn join_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

pub fn narration_script(course: &CourseData) -> NarrationScript {
    let layout = &course.layout;
    let mut lines = vec![format!("Welcome to {}.", course.name)];

    if !layout.holes.is_empty() {
        lines.push(format!(
            "This {}-hole, par {} course stretches {} yards across {} terrain.",
            layout.holes.len(),
            layout.total_par(),
            layout.total_length(),
            course.elevation.terrain
        ));
        if let Some(longest) = layout.holes.iter().max_by_key(|h| h.length_yards) {
            lines.push(format!(
                "Hole {} is the longest test at {} yards.",
                longest.number, longest.length_yards
            ));
        }
    }

    if !layout.features.is_empty() {
        let features: Vec<String> = layout.features.iter().map(|f| humanize(f)).collect();
        lines.push(format!("Watch out for {}.", join_list(&features)));
    }

    lines.push(format!("Current conditions: {}.", course.weather.summary));
    lines.push("Enjoy your round.".to_string());

    NarrationScript { lines }
}

fn srt_timestamp(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_ms / 3_600_000,
        (total_ms / 60_000) % 60,
        (total_ms / 1000) % 60,
        total_ms % 1000
    )
}

/// SubRip captions spreading the script over `duration_secs`, each line
/// weighted by its length.
pub fn captions_srt(script: &NarrationScript, duration_secs: f64) -> String {
    let weights: Vec<usize> = script.lines.iter().map(|l| l.chars().count().max(1)).collect();
    let total: usize = weights.iter().sum();
    let mut srt = String::new();
    if total == 0 || duration_secs <= 0.0 {
        return srt;
    }

    let mut start = 0.0;
    for (index, (line, weight)) in script.lines.iter().zip(&weights).enumerate() {
        let end = start + duration_secs * (*weight as f64) / (total as f64);
        let _ = write!(
            srt,
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            srt_timestamp(start),
            srt_timestamp(end),
            line
        );
        start = end;
    }
    srt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{ElevationProfile, ImageryTile, WeatherReport};
    use crate::job::{Coordinates, SubmitRequest};
    use crate::pipeline::enrichment::synthetic_layout;

    fn course() -> CourseData {
        CourseData {
            name: "Pebble Beach Golf Links".to_string(),
            coordinates: Coordinates::new(36.5683, -121.9497),
            elevation: ElevationProfile::from_samples(vec![2.0, 30.0]),
            imagery: ImageryTile {
                provider: "none".to_string(),
                resolution_m: 1.0,
                url: None,
            },
            layout: synthetic_layout(),
            weather: WeatherReport {
                summary: "Partly cloudy, 18°C".to_string(),
                temperature_c: Some(18.0),
                wind_kph: None,
            },
        }
    }

    #[test]
    fn test_seed_from_name_is_stable_and_bounded() {
        let a = Job::new(SubmitRequest::new("Augusta National"));
        let b = Job::new(SubmitRequest::new("augusta national"));
        assert_eq!(effective_seed(&a), effective_seed(&b));
        assert!(effective_seed(&a) <= MAX_SEED);

        let seeded = Job::new(SubmitRequest::new("Augusta National").with_seed(42));
        assert_eq!(effective_seed(&seeded), 42);
    }

    #[test]
    fn test_camera_plan_is_deterministic() {
        let video = VideoConfig::default();
        let layout = synthetic_layout();
        let a = camera_plan(&layout, 7, &video);
        let b = camera_plan(&layout, 7, &video);
        let c = camera_plan(&layout, 8, &video);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.shots.len(), 18);
        assert_eq!(a.total_frames(), 18 * 90);
        assert_eq!(a.duration_secs(), 54.0);
        for shot in &a.shots {
            assert!((80.0..160.0).contains(&shot.altitude_m));
            assert!((0.0..360.0).contains(&shot.heading_deg));
            assert!((20.0..60.0).contains(&shot.orbit_deg.abs()));
        }
    }

    #[test]
    fn test_camera_plan_without_holes() {
        let layout = CourseLayout {
            holes: vec![],
            features: vec![],
        };
        let plan = camera_plan(&layout, 1, &VideoConfig::default());
        assert_eq!(plan.shots.len(), 1);
        assert_eq!(plan.shots[0].hole, 0);
    }

    #[test]
    fn test_narration_mentions_course_facts() {
        let script = narration_script(&course());
        assert_eq!(script.lines[0], "Welcome to Pebble Beach Golf Links.");
        let text = script.text();
        assert!(text.contains("par 72"));
        assert!(text.contains("coastal terrain"));
        assert!(text.contains("water hazards, sand bunkers, elevated greens and tree obstacles"));
        assert!(text.contains("Partly cloudy"));
    }

    #[test]
    fn test_srt_timestamp() {
        assert_eq!(srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(srt_timestamp(61.5), "00:01:01,500");
        assert_eq!(srt_timestamp(3725.042), "01:02:05,042");
    }

    #[test]
    fn test_captions_cover_duration() {
        let script = NarrationScript {
            lines: vec!["aaaa".to_string(), "bbbb".to_string()],
        };
        let srt = captions_srt(&script, 10.0);
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:05,000\naaaa\n\n2\n00:00:05,000 --> 00:00:10,000\nbbbb\n\n"
        );
        assert!(captions_srt(&script, 0.0).is_empty());
    }
}
