//! Job graph builders.
//!
//! A [`Graph`] is the node/edge document the job server executes: a map
//! of node id to `{class_type, inputs}`, where each input is either a
//! literal value or a `[node_id, output_slot]` link. Nodes and inputs are
//! kept in ordered maps so that identical arguments always serialize to
//! identical bytes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reel_core::settings::{GenerationSettings, MotionEffect};
use reel_core::types::Seed;

/// Errors raised while building a graph, before anything is submitted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    /// The target server lacks a checkpoint or node the graph needs.
    #[error("Missing capability: {0}")]
    CapabilityMissing(String),

    #[error("Invalid workflow input: {0}")]
    InvalidInput(String),
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Negative prompt shared by every pipeline.
pub const NEGATIVE_PROMPT: &str =
    "blurry, low quality, distorted, watermark, text, deformed, extra limbs";

/// Node that encodes frames into a video container.
pub const ADVANCED_VIDEO_NODE: &str = "VHS_VideoCombine";

/// Node that injects the motion module into the diffusion model.
pub const MOTION_LOADER_NODE: &str = "ADE_AnimateDiffLoaderWithContext";

/// Motion module used by the motion-diffusion pipeline (SD 1.5 family).
pub const MOTION_MODULE: &str = "mm_sd_v15_v2.ckpt";

/// Filename prefix for everything this pipeline writes.
pub const OUTPUT_PREFIX: &str = "reel";

const IMAGE_STEPS: u32 = 25;
const IMAGE_CFG: f32 = 7.0;
const IMAGE_SAMPLER: &str = "dpmpp_2m";
const IMAGE_SCHEDULER: &str = "karras";

const LARGE_MODEL_UNET: &str = "wan2.1_i2v_480p_14B_fp8_e4m3fn.safetensors";
const LARGE_MODEL_TEXT_ENCODER: &str = "umt5_xxl_fp8_e4m3fn_scaled.safetensors";
const LARGE_MODEL_VAE: &str = "wan_2.1_vae.safetensors";
const LARGE_MODEL_CLIP_VISION: &str = "clip_vision_h.safetensors";
const LARGE_MODEL_FPS: u32 = 16;

/// Checkpoint name fragments that mark a model the motion module cannot drive.
const MOTION_INCOMPATIBLE_MARKERS: &[&str] = &["xl", "flux", "sd3", "cascade"];

// ---------------------------------------------------------------------------
// Graph model
// ---------------------------------------------------------------------------

/// Reference to output slot `.1` of node `.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

/// A node input: a link to another node's output, or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    Link(NodeLink),
    Value(Value),
}

/// One function call in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub class_type: String,
    pub inputs: BTreeMap<String, Input>,
}

/// A complete job graph keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
}

impl Graph {
    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Every distinct node class the graph uses.
    pub fn class_types(&self) -> BTreeSet<&str> {
        self.nodes.values().map(|n| n.class_type.as_str()).collect()
    }

    /// Id of the first node of the given class.
    pub fn find_class(&self, class_type: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, n)| n.class_type == class_type)
            .map(|(id, _)| id.as_str())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Canonical serialized form.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Assigns sequential node ids while a graph is assembled.
#[derive(Default)]
struct GraphBuilder {
    graph: Graph,
    next_id: u32,
}

impl GraphBuilder {
    fn add<'a>(
        &mut self,
        class_type: &str,
        inputs: impl IntoIterator<Item = (&'a str, Input)>,
    ) -> String {
        self.next_id += 1;
        let id = self.next_id.to_string();
        self.graph.nodes.insert(
            id.clone(),
            Node {
                class_type: class_type.to_string(),
                inputs: inputs
                    .into_iter()
                    .map(|(name, input)| (name.to_string(), input))
                    .collect(),
            },
        );
        id
    }

    fn finish(self) -> Graph {
        self.graph
    }
}

fn link(node: &str, slot: u32) -> Input {
    Input::Link(NodeLink(node.to_string(), slot))
}

fn lit(value: impl Into<Value>) -> Input {
    Input::Value(value.into())
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Capability discovery
// ---------------------------------------------------------------------------

/// Whether an `/object_info/{class}` answer describes the class.
pub fn node_available(object_info: &Value, class_type: &str) -> bool {
    object_info.get(class_type).is_some()
}

/// Checkpoint names listed by `/object_info/CheckpointLoaderSimple`.
pub fn checkpoint_names(object_info: &Value) -> Vec<String> {
    object_info
        .pointer("/CheckpointLoaderSimple/input/required/ckpt_name/0")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Whether the motion-diffusion module can drive this checkpoint.
pub fn is_motion_compatible(checkpoint: &str) -> bool {
    let lower = checkpoint.to_lowercase();
    !MOTION_INCOMPATIBLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Pick a checkpoint for the motion-diffusion pipeline.
///
/// A compatible `preferred` checkpoint wins; otherwise the first compatible
/// one in `available`. Fails with [`WorkflowError::CapabilityMissing`] when
/// the preferred one is incompatible or nothing compatible is installed.
pub fn select_motion_checkpoint(
    available: &[String],
    preferred: Option<&str>,
) -> Result<String, WorkflowError> {
    if let Some(name) = preferred.filter(|p| !p.trim().is_empty()) {
        if !is_motion_compatible(name) {
            return Err(WorkflowError::CapabilityMissing(format!(
                "Checkpoint '{name}' is not supported by the motion module; choose an SD 1.5 checkpoint"
            )));
        }
        if available.is_empty() || available.iter().any(|a| a == name) {
            return Ok(name.to_string());
        }
        return Err(WorkflowError::CapabilityMissing(format!(
            "Checkpoint '{name}' is not installed on the job server"
        )));
    }

    available
        .iter()
        .find(|name| is_motion_compatible(name))
        .cloned()
        .ok_or_else(|| {
            WorkflowError::CapabilityMissing(
                "No SD 1.5 checkpoint installed; the motion module cannot use XL/Flux models"
                    .to_string(),
            )
        })
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Text-to-image graph used to create scene seed images.
pub fn build_image_graph(
    prompt: &str,
    seed: Seed,
    width: u32,
    height: u32,
    checkpoint: &str,
) -> Result<Graph, WorkflowError> {
    let prompt = non_empty(prompt, "prompt")?;
    let checkpoint = non_empty(checkpoint, "checkpoint")?;

    let mut b = GraphBuilder::default();
    let ckpt = b.add("CheckpointLoaderSimple", [("ckpt_name", lit(checkpoint))]);
    let positive = b.add(
        "CLIPTextEncode",
        [("text", lit(prompt)), ("clip", link(&ckpt, 1))],
    );
    let negative = b.add(
        "CLIPTextEncode",
        [("text", lit(NEGATIVE_PROMPT)), ("clip", link(&ckpt, 1))],
    );
    let latent = b.add(
        "EmptyLatentImage",
        [
            ("width", lit(width)),
            ("height", lit(height)),
            ("batch_size", lit(1)),
        ],
    );
    let sampler = b.add(
        "KSampler",
        [
            ("model", link(&ckpt, 0)),
            ("positive", link(&positive, 0)),
            ("negative", link(&negative, 0)),
            ("latent_image", link(&latent, 0)),
            ("seed", lit(seed)),
            ("steps", lit(IMAGE_STEPS)),
            ("cfg", lit(IMAGE_CFG)),
            ("sampler_name", lit(IMAGE_SAMPLER)),
            ("scheduler", lit(IMAGE_SCHEDULER)),
            ("denoise", lit(1.0)),
        ],
    );
    let decoded = b.add(
        "VAEDecode",
        [("samples", link(&sampler, 0)), ("vae", link(&ckpt, 2))],
    );
    b.add(
        "SaveImage",
        [
            ("images", link(&decoded, 0)),
            ("filename_prefix", lit(OUTPUT_PREFIX)),
        ],
    );
    Ok(b.finish())
}

/// Image-to-video graph driven by the motion-diffusion module.
///
/// `settings.motion_effect` must already be concrete. Without the advanced
/// video node the graph ends in a plain image-sequence save, so the result
/// comes back as individual frames instead of a video container.
pub fn build_image_to_video_graph(
    input_image: &str,
    prompt: &str,
    seed: Seed,
    settings: &GenerationSettings,
    checkpoint: &str,
    has_advanced_video_nodes: bool,
) -> Result<Graph, WorkflowError> {
    let input_image = non_empty(input_image, "input image")?;
    let prompt = non_empty(prompt, "prompt")?;
    let checkpoint = non_empty(checkpoint, "checkpoint")?;
    if settings.motion_effect == MotionEffect::Automatic {
        return Err(WorkflowError::InvalidInput(
            "motion effect must be resolved before building the graph".to_string(),
        ));
    }
    if !is_motion_compatible(checkpoint) {
        return Err(WorkflowError::CapabilityMissing(format!(
            "Checkpoint '{checkpoint}' is not supported by the motion module"
        )));
    }

    let mut b = GraphBuilder::default();
    let ckpt = b.add("CheckpointLoaderSimple", [("ckpt_name", lit(checkpoint))]);
    let image = b.add("LoadImage", [("image", lit(input_image))]);
    let scaled = b.add(
        "ImageScale",
        [
            ("image", link(&image, 0)),
            ("upscale_method", lit("lanczos")),
            ("width", lit(settings.width)),
            ("height", lit(settings.height)),
            ("crop", lit("center")),
        ],
    );
    let frames = b.add(
        "RepeatImageBatch",
        [
            ("image", link(&scaled, 0)),
            ("amount", lit(settings.frame_count)),
        ],
    );
    let positive = b.add(
        "CLIPTextEncode",
        [("text", lit(prompt)), ("clip", link(&ckpt, 1))],
    );
    let negative = b.add(
        "CLIPTextEncode",
        [("text", lit(NEGATIVE_PROMPT)), ("clip", link(&ckpt, 1))],
    );

    let mut loader_inputs = vec![
        ("model", link(&ckpt, 0)),
        ("model_name", lit(MOTION_MODULE)),
        ("beta_schedule", lit("sqrt_linear (AnimateDiff)")),
        ("motion_scale", lit(1.0)),
        ("apply_v2_models_properly", lit(true)),
    ];
    if let Some(lora) = settings.motion_effect.motion_lora() {
        let lora_node = b.add(
            "ADE_AnimateDiffLoRALoader",
            [
                ("lora_name", lit(lora)),
                ("strength", lit(settings.motion_strength)),
            ],
        );
        loader_inputs.push(("motion_lora", link(&lora_node, 0)));
    }
    let motion_model = b.add(MOTION_LOADER_NODE, loader_inputs);

    let encoded = b.add(
        "VAEEncode",
        [("pixels", link(&frames, 0)), ("vae", link(&ckpt, 2))],
    );
    let sampler = b.add(
        "KSampler",
        [
            ("model", link(&motion_model, 0)),
            ("positive", link(&positive, 0)),
            ("negative", link(&negative, 0)),
            ("latent_image", link(&encoded, 0)),
            ("seed", lit(seed)),
            ("steps", lit(settings.steps)),
            ("cfg", lit(settings.cfg)),
            ("sampler_name", lit(settings.sampler.as_str())),
            ("scheduler", lit(settings.scheduler.as_str())),
            ("denoise", lit(settings.denoise)),
        ],
    );
    let decoded = b.add(
        "VAEDecode",
        [("samples", link(&sampler, 0)), ("vae", link(&ckpt, 2))],
    );

    if has_advanced_video_nodes {
        b.add(
            ADVANCED_VIDEO_NODE,
            [
                ("images", link(&decoded, 0)),
                ("frame_rate", lit(settings.frame_rate)),
                ("loop_count", lit(0)),
                ("filename_prefix", lit(OUTPUT_PREFIX)),
                ("format", lit(settings.output_format.codec_id())),
                ("pix_fmt", lit("yuv420p")),
                ("crf", lit(settings.quality)),
                ("pingpong", lit(settings.loop_mode)),
                ("save_output", lit(true)),
            ],
        );
    } else {
        b.add(
            "SaveImage",
            [
                ("images", link(&decoded, 0)),
                ("filename_prefix", lit(OUTPUT_PREFIX)),
            ],
        );
    }
    Ok(b.finish())
}

/// Round a frame count up to the `4k + 1` lengths the large video model accepts.
pub fn large_model_length(frame_count: u32) -> u32 {
    let frames = frame_count.max(1);
    (frames - 1).div_ceil(4) * 4 + 1
}

/// Image-to-video graph for the large generative video model.
#[allow(clippy::too_many_arguments)]
pub fn build_large_video_model_graph(
    input_image: &str,
    prompt: &str,
    seed: Seed,
    width: u32,
    height: u32,
    frame_count: u32,
    steps: u32,
    guidance: f32,
) -> Result<Graph, WorkflowError> {
    let input_image = non_empty(input_image, "input image")?;
    let prompt = non_empty(prompt, "prompt")?;
    if steps == 0 {
        return Err(WorkflowError::InvalidInput("steps must be at least 1".to_string()));
    }
    // Latent dimensions must be multiples of 16.
    let width = (width / 16).max(1) * 16;
    let height = (height / 16).max(1) * 16;

    let mut b = GraphBuilder::default();
    let unet = b.add(
        "UNETLoader",
        [
            ("unet_name", lit(LARGE_MODEL_UNET)),
            ("weight_dtype", lit("default")),
        ],
    );
    let text_encoder = b.add(
        "CLIPLoader",
        [
            ("clip_name", lit(LARGE_MODEL_TEXT_ENCODER)),
            ("type", lit("wan")),
        ],
    );
    let vae = b.add("VAELoader", [("vae_name", lit(LARGE_MODEL_VAE))]);
    let vision = b.add(
        "CLIPVisionLoader",
        [("clip_name", lit(LARGE_MODEL_CLIP_VISION))],
    );
    let image = b.add("LoadImage", [("image", lit(input_image))]);
    let vision_encoded = b.add(
        "CLIPVisionEncode",
        [
            ("clip_vision", link(&vision, 0)),
            ("image", link(&image, 0)),
            ("crop", lit("none")),
        ],
    );
    let positive = b.add(
        "CLIPTextEncode",
        [("text", lit(prompt)), ("clip", link(&text_encoder, 0))],
    );
    let negative = b.add(
        "CLIPTextEncode",
        [
            ("text", lit(NEGATIVE_PROMPT)),
            ("clip", link(&text_encoder, 0)),
        ],
    );
    let conditioning = b.add(
        "WanImageToVideo",
        [
            ("positive", link(&positive, 0)),
            ("negative", link(&negative, 0)),
            ("vae", link(&vae, 0)),
            ("clip_vision_output", link(&vision_encoded, 0)),
            ("start_image", link(&image, 0)),
            ("width", lit(width)),
            ("height", lit(height)),
            ("length", lit(large_model_length(frame_count))),
            ("batch_size", lit(1)),
        ],
    );
    let sampler = b.add(
        "KSampler",
        [
            ("model", link(&unet, 0)),
            ("positive", link(&conditioning, 0)),
            ("negative", link(&conditioning, 1)),
            ("latent_image", link(&conditioning, 2)),
            ("seed", lit(seed)),
            ("steps", lit(steps)),
            ("cfg", lit(guidance)),
            ("sampler_name", lit("uni_pc")),
            ("scheduler", lit("simple")),
            ("denoise", lit(1.0)),
        ],
    );
    let decoded = b.add(
        "VAEDecode",
        [("samples", link(&sampler, 0)), ("vae", link(&vae, 0))],
    );
    let video = b.add(
        "CreateVideo",
        [("images", link(&decoded, 0)), ("fps", lit(LARGE_MODEL_FPS))],
    );
    b.add(
        "SaveVideo",
        [
            ("video", link(&video, 0)),
            ("filename_prefix", lit(OUTPUT_PREFIX)),
            ("format", lit("mp4")),
            ("codec", lit("h264")),
        ],
    );
    Ok(b.finish())
}
