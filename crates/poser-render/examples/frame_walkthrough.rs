//! A few editor frames on the headless device: select posed joints, pack
//! them into a vertex buffer, upload a camera block, compile a pipeline and
//! bind everything.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example frame_walkthrough -p poser-render

use std::sync::Arc;

use bytemuck_derive::{Pod, Zeroable};
use poser_render::prelude::*;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Joint {
    position: [f32; 3],
}

#[derive(Debug, Clone, Copy)]
struct Influence(f32);

#[derive(Debug, Clone, Copy)]
struct Selected;

/// Camera block as the shader sees it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    eye: [f32; 3],
    exposure: f32,
}

const JOINT_SHADER: &str = "joints.wgsl";

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // Scene: a short arm chain, two joints selected.
    let mut registry = Registry::new();
    registry.register_component::<Joint>("joint");
    registry.register_component::<Influence>("influence");
    let chain: Vec<Entity> = [[0.0, 1.5, 0.0], [0.3, 1.2, 0.0], [0.6, 1.0, 0.1]]
        .into_iter()
        .map(|position| registry.spawn((Joint { position }, Influence(1.0))))
        .collect();
    registry.add_component(chain[1], Selected);
    registry.add_component(chain[2], Selected);

    // Layouts.
    let joint_layout = LayoutDescriptor::new()
        .with_packed("position", ScalarKind::Float3)
        .with_packed("influence", ScalarKind::Float)
        .plan()?;
    let camera_layout = LayoutPlanner::uniform().plan(
        &LayoutDescriptor::new()
            .with("view_proj", ScalarKind::Float4x4)
            .with_explicit("eye", ScalarKind::Float3, 12, 4)
            .with("exposure", ScalarKind::Float),
    )?;
    anyhow::ensure!(
        camera_layout.stride() as usize == std::mem::size_of::<CameraUniform>(),
        "camera layout does not match CameraUniform"
    );

    // Device and context.
    let device = HeadlessDevice::new().with_shader(JOINT_SHADER, &["vs_main", "fs_main"]);
    let config = RenderConfig::from_json_str(r#"{ "label_prefix": "walkthrough/" }"#)?;
    let mut ctx = RenderContext::new(Arc::new(device), config);

    let key = PipelineKey::new(
        "selected_joints",
        ShaderRef::new(JOINT_SHADER, "vs_main", "fs_main"),
        joint_layout.vertex_layout()?,
        PixelFormat::Bgra8UnormSrgb,
    )
    .with_depth(PixelFormat::Depth32Float, DepthSettings::default())
    .with_blend(BlendMode::AlphaBlend)
    .with_topology(Topology::PointList);

    let mut selected = registry.selection::<(Joint, Influence, Selected)>();
    let capacity = joint_layout.buffer_size(chain.len());
    let joints = ctx
        .resources_mut()
        .allocate("selected_joints", BufferRole::Vertex, capacity, None)?;
    let camera = ctx.resources_mut().allocate(
        "camera",
        BufferRole::Uniform,
        camera_layout.stride() as u64,
        None,
    )?;

    for frame in 0..3u32 {
        // Drag the wrist a little every frame.
        if let Some(wrist) = registry.get_component_mut::<Joint>(chain[2]) {
            wrist.position[0] += 0.05;
        }

        let packed = pack_selection(
            &registry,
            &mut selected,
            &joint_layout,
            |rec, (joint, influence, _)| {
                rec.set("position", joint.position)?;
                rec.set("influence", influence.0)
            },
        )?;
        let outcome = ctx.resources_mut().write(joints, packed.as_bytes());
        anyhow::ensure!(outcome.is_complete(), "joint buffer too small: {outcome:?}");

        let uniform = CameraUniform {
            view_proj: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
            eye: [0.0, 1.2, 3.0 - frame as f32 * 0.1],
            exposure: 1.0,
        };
        ctx.resources_mut().update(camera, bytemuck::bytes_of(&uniform));

        let pipeline = ctx.pipeline(&key)?;
        let mut encoder = RecordingEncoder::new();
        let bound = ctx.bind_all(&mut encoder);

        println!(
            "frame {frame}: {} selected joints, pipeline {pipeline}, {bound} bindings: {:?}",
            packed.len(),
            encoder.calls()
        );
    }

    println!(
        "pipelines compiled: {}, cache hits: {}, device bytes: {}",
        ctx.device().pipelines_compiled(),
        ctx.pipelines().hits(),
        ctx.device().allocated_bytes()
    );
    Ok(())
}
