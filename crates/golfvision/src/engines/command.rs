//! Production engines backed by native tools (Blender, gTTS, FFmpeg), all
//! launched through the [`Supervisor`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    AudioTrack, CameraPlan, CourseData, EncodedVideo, EngineContext, EngineError, FrameRenderer,
    FrameSet, ModelBuilder, ModelHandle, NarrationScript, SpeechSynthesizer, VideoEncoder,
    VideoMetadata,
};
use crate::config::EngineCommand;
use crate::supervisor::{Invocation, ProcessOutput, Supervisor};

const FRAME_PATTERN: &str = "frame_%04d.png";

/// Substitutes `{name}` placeholders in each argument.
fn expand(args: &[String], vars: &[(&str, String)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

fn path_var(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn run_command(
    supervisor: &Supervisor,
    ctx: &EngineContext,
    command: &EngineCommand,
    vars: &[(&str, String)],
) -> Result<ProcessOutput, EngineError> {
    let mut all_vars = vec![
        ("job_id", ctx.job_id.to_string()),
        ("workspace", path_var(&ctx.workspace)),
    ];
    all_vars.extend(vars.iter().cloned());

    let invocation = Invocation::new(
        command.program.clone(),
        expand(&command.args, &all_vars),
        Duration::from_secs(command.timeout_secs),
    )
    .max_output_bytes(command.max_output_bytes)
    .working_dir(&ctx.workspace);

    Ok(supervisor.run(Some(&ctx.job_id), &invocation).await?)
}

async fn write_file(path: &Path, contents: &str) -> Result<(), EngineError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| EngineError::io(path, e))
}

async fn require_artifact(path: &Path) -> Result<u64, EngineError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        _ => Err(EngineError::MissingArtifact(path.to_path_buf())),
    }
}

/// Quotes a JSON document as a Python string literal.
fn python_literal(value: &impl serde::Serialize) -> Result<String, EngineError> {
    let json = serde_json::to_string(value)
        .map_err(|e| EngineError::Other(format!("Failed to encode script data: {}", e)))?;
    serde_json::to_string(&json)
        .map_err(|e| EngineError::Other(format!("Failed to encode script data: {}", e)))
}

// ─── Model ──────────────────────────────────────────────────────────────────

const MODEL_SCRIPT: &str = r#"import bpy, json, math, sys

course = json.loads(COURSE_JSON)
output = sys.argv[sys.argv.index("--") + 1]

bpy.ops.wm.read_factory_settings(use_empty=True)

bpy.ops.mesh.primitive_grid_add(x_subdivisions=64, y_subdivisions=64, size=2000)
terrain = bpy.context.active_object
terrain.name = "Terrain"
samples = course["elevation"]["samples"]
relief = (max(samples) - min(samples)) if samples else 0.0
for v in terrain.data.vertices:
    v.co.z = relief * 0.25 * (math.sin(v.co.x / 180.0) + math.cos(v.co.y / 220.0))

holes = course["layout"]["holes"]
for i, hole in enumerate(holes):
    angle = 2 * math.pi * i / max(len(holes), 1)
    x, y = 600 * math.cos(angle), 600 * math.sin(angle)
    bpy.ops.mesh.primitive_cylinder_add(radius=12, depth=0.2, location=(x, y, 0.1))
    bpy.context.active_object.name = "Green_%02d" % hole["number"]

bpy.ops.object.light_add(type="SUN", location=(0, 0, 500))
bpy.ops.wm.save_as_mainfile(filepath=output)
"#;

pub struct BlenderModelBuilder {
    supervisor: Supervisor,
    command: EngineCommand,
}

impl BlenderModelBuilder {
    pub fn new(supervisor: Supervisor, command: EngineCommand) -> Self {
        Self {
            supervisor,
            command,
        }
    }
}

#[async_trait]
impl ModelBuilder for BlenderModelBuilder {
    async fn build_model(
        &self,
        ctx: &EngineContext,
        course: &CourseData,
    ) -> Result<ModelHandle, EngineError> {
        let script = ctx.artifact("build_model.py");
        let output = ctx.artifact("course.blend");
        write_file(
            &script,
            &format!("COURSE_JSON = {}\n{}", python_literal(course)?, MODEL_SCRIPT),
        )
        .await?;

        run_command(
            &self.supervisor,
            ctx,
            &self.command,
            &[("script", path_var(&script)), ("output", path_var(&output))],
        )
        .await?;

        require_artifact(&output).await?;
        Ok(ModelHandle { path: output })
    }
}

// ─── Render ─────────────────────────────────────────────────────────────────

const RENDER_SCRIPT: &str = r#"import bpy, json, math, os, sys

plan = json.loads(PLAN_JSON)
out_dir = sys.argv[sys.argv.index("--") + 1]

scene = bpy.context.scene
scene.render.resolution_x = plan["width"]
scene.render.resolution_y = plan["height"]
scene.render.fps = plan["fps"]
scene.render.image_settings.file_format = "PNG"

cam = bpy.data.objects.new("Flyover", bpy.data.cameras.new("Flyover"))
scene.collection.objects.link(cam)
scene.camera = cam

frame = 1
for shot in plan["shots"]:
    for i in range(shot["frames"]):
        t = i / max(shot["frames"] - 1, 1)
        theta = math.radians(shot["heading_deg"] + shot["orbit_deg"] * t)
        cam.location = (700 * math.cos(theta), 700 * math.sin(theta), shot["altitude_m"])
        cam.rotation_euler = (math.radians(60), 0, theta + math.pi / 2)
        scene.render.filepath = os.path.join(out_dir, "frame_%04d.png" % frame)
        bpy.ops.render.render(write_still=True)
        frame += 1
"#;

async fn count_frames(dir: &Path) -> Result<u32, EngineError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| EngineError::io(dir, e))?;
    let mut count = 0u32;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::io(dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("frame_") && name.ends_with(".png") {
            count += 1;
        }
    }
    Ok(count)
}

pub struct BlenderRenderer {
    supervisor: Supervisor,
    command: EngineCommand,
}

impl BlenderRenderer {
    pub fn new(supervisor: Supervisor, command: EngineCommand) -> Self {
        Self {
            supervisor,
            command,
        }
    }
}

#[async_trait]
impl FrameRenderer for BlenderRenderer {
    async fn render_frames(
        &self,
        ctx: &EngineContext,
        model: &ModelHandle,
        plan: &CameraPlan,
    ) -> Result<FrameSet, EngineError> {
        let script = ctx.artifact("render.py");
        let frames_dir = ctx.artifact("frames");
        tokio::fs::create_dir_all(&frames_dir)
            .await
            .map_err(|e| EngineError::io(&frames_dir, e))?;
        write_file(
            &script,
            &format!("PLAN_JSON = {}\n{}", python_literal(plan)?, RENDER_SCRIPT),
        )
        .await?;

        run_command(
            &self.supervisor,
            ctx,
            &self.command,
            &[
                ("script", path_var(&script)),
                ("input", path_var(&model.path)),
                ("output", path_var(&frames_dir)),
            ],
        )
        .await?;

        let count = count_frames(&frames_dir).await?;
        if count == 0 {
            return Err(EngineError::MissingArtifact(frames_dir.join("frame_0001.png")));
        }
        if count < plan.total_frames() {
            log::warn!(
                "Renderer produced {} of {} planned frames for job {}",
                count,
                plan.total_frames(),
                ctx.job_id
            );
        }

        Ok(FrameSet {
            directory: frames_dir,
            pattern: FRAME_PATTERN.to_string(),
            count,
            fps: plan.fps,
        })
    }
}

// ─── Speech ─────────────────────────────────────────────────────────────────

pub struct GttsSynthesizer {
    supervisor: Supervisor,
    command: EngineCommand,
}

impl GttsSynthesizer {
    pub fn new(supervisor: Supervisor, command: EngineCommand) -> Self {
        Self {
            supervisor,
            command,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for GttsSynthesizer {
    async fn synthesize(
        &self,
        ctx: &EngineContext,
        script: &NarrationScript,
    ) -> Result<AudioTrack, EngineError> {
        let text = ctx.artifact("narration.txt");
        let output = ctx.artifact("narration.mp3");
        write_file(&text, &script.text()).await?;

        run_command(
            &self.supervisor,
            ctx,
            &self.command,
            &[("input", path_var(&text)), ("output", path_var(&output))],
        )
        .await?;

        require_artifact(&output).await?;
        Ok(AudioTrack { path: output })
    }
}

// ─── Encode ─────────────────────────────────────────────────────────────────

fn parse_frame_rate(raw: &str) -> Option<u32> {
    let (num, den) = match raw.split_once('/') {
        Some((num, den)) => (num.parse::<f64>().ok()?, den.parse::<f64>().ok()?),
        None => (raw.parse::<f64>().ok()?, 1.0),
    };
    if den <= 0.0 || num <= 0.0 {
        return None;
    }
    Some((num / den).round() as u32)
}

/// Extracts video metadata from `ffprobe -print_format json` output.
fn parse_probe(body: &Value, fallback_fps: u32) -> Result<VideoMetadata, EngineError> {
    let stream = body
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("video"))
        })
        .ok_or_else(|| EngineError::InvalidResponse("ffprobe: no video stream".to_string()))?;

    let dimension = |key: &str| -> Result<u32, EngineError> {
        stream
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| EngineError::InvalidResponse(format!("ffprobe: missing {}", key)))
    };
    let width = dimension("width")?;
    let height = dimension("height")?;

    let codec = stream
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let fps = stream
        .get("r_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(parse_frame_rate)
        .unwrap_or(fallback_fps);

    let format = body.get("format");
    let duration_secs = format
        .and_then(|f| f.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let file_size = format
        .and_then(|f| f.get("size"))
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(VideoMetadata {
        duration_secs,
        width,
        height,
        fps,
        codec,
        file_size,
    })
}

pub struct FfmpegEncoder {
    supervisor: Supervisor,
    encode: EngineCommand,
    thumbnail: EngineCommand,
    probe: EngineCommand,
}

impl FfmpegEncoder {
    pub fn new(
        supervisor: Supervisor,
        encode: EngineCommand,
        thumbnail: EngineCommand,
        probe: EngineCommand,
    ) -> Self {
        Self {
            supervisor,
            encode,
            thumbnail,
            probe,
        }
    }

    async fn probe(&self, ctx: &EngineContext, video: &Path, fps: u32) -> Result<VideoMetadata, EngineError> {
        let output = run_command(
            &self.supervisor,
            ctx,
            &self.probe,
            &[("input", path_var(video))],
        )
        .await?;
        let body: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::InvalidResponse(format!("ffprobe: {}", e)))?;
        parse_probe(&body, fps)
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        ctx: &EngineContext,
        frames: &FrameSet,
        audio: &AudioTrack,
    ) -> Result<EncodedVideo, EngineError> {
        let video = ctx.artifact("video.mp4");
        run_command(
            &self.supervisor,
            ctx,
            &self.encode,
            &[
                ("fps", frames.fps.to_string()),
                ("frames", path_var(&frames.input_pattern())),
                ("audio", path_var(&audio.path)),
                ("output", path_var(&video)),
            ],
        )
        .await?;
        let size = require_artifact(&video).await?;

        let thumbnail: PathBuf = ctx.artifact("thumbnail.jpg");
        run_command(
            &self.supervisor,
            ctx,
            &self.thumbnail,
            &[("input", path_var(&video)), ("output", path_var(&thumbnail))],
        )
        .await?;
        require_artifact(&thumbnail).await?;

        let mut metadata = self.probe(ctx, &video, frames.fps).await?;
        if metadata.file_size == 0 {
            metadata.file_size = size;
        }

        Ok(EncodedVideo {
            path: video,
            thumbnail,
            metadata,
        })
    }
}
