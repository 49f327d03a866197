//! End-to-end flow: registry selection -> packed bytes -> buffer -> pipeline
//! -> bind, on the headless device.

use poser_render::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Joint {
    position: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Influence(f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hidden;

fn joint_layout() -> ComputedLayout {
    LayoutDescriptor::new()
        .with_packed("position", ScalarKind::Float3)
        .with_packed("influence", ScalarKind::Float)
        .plan()
        .unwrap()
}

fn pack(reg: &Registry, query: &mut EntityQuery<(Joint, Influence)>) -> VertexPacker {
    pack_selection(reg, query, &joint_layout(), |rec, (joint, influence)| {
        rec.set("position", joint.position)?;
        rec.set("influence", influence.0)
    })
    .unwrap()
}

#[test]
fn selection_to_bound_buffer() {
    let mut reg = Registry::new();
    let shoulder = reg.spawn((Joint { position: [0.0, 1.5, 0.0] }, Influence(1.0)));
    let elbow = reg.spawn((Joint { position: [0.3, 1.2, 0.0] }, Influence(0.5)));
    reg.spawn((Joint { position: [9.0, 9.0, 9.0] }, Hidden));

    let device = HeadlessDevice::new().with_shader("joints", &["vs_main", "fs_main"]);
    let mut ctx = RenderContext::with_device(device);
    let mut query = reg.selection::<(Joint, Influence)>();

    // Frame 1: allocate sized for the current selection.
    let packed = pack(&reg, &mut query);
    assert_eq!(packed.len(), 2);
    let joints = ctx
        .resources_mut()
        .allocate(
            "joints",
            BufferRole::Vertex,
            packed.as_bytes().len() as u64,
            Some(packed.as_bytes()),
        )
        .unwrap();

    let key = PipelineKey::new(
        "joints",
        ShaderRef::new("joints", "vs_main", "fs_main"),
        joint_layout().vertex_layout().unwrap(),
        PixelFormat::Bgra8UnormSrgb,
    )
    .with_topology(Topology::PointList);
    let pipeline = ctx.pipeline(&key).unwrap();

    let mut enc = RecordingEncoder::new();
    assert_eq!(ctx.bind_all(&mut enc), 1);
    assert_eq!(
        enc.calls(),
        &[BindCall::Buffer {
            group: BindGroup::Vertex,
            slot: 0,
            buffer: ctx.resources().buffer(joints).unwrap().id(),
        }]
    );

    // Frame 2: the elbow moves; same buffer, same pipeline.
    reg.get_component_mut::<Joint>(elbow).unwrap().position = [0.4, 1.1, 0.0];
    let packed = pack(&reg, &mut query);
    assert!(ctx.resources_mut().update(joints, packed.as_bytes()));
    assert_eq!(ctx.pipeline(&key).unwrap(), pipeline);
    assert_eq!(ctx.resources().contents(joints), Some(packed.as_bytes()));
    assert_eq!(query.evaluations(), 1);

    // Frame 3: a joint is deleted; the smaller selection still fits.
    reg.destroy_entity(shoulder);
    let packed = pack(&reg, &mut query);
    assert_eq!(packed.len(), 1);
    assert!(ctx.resources_mut().update(joints, packed.as_bytes()));
    assert_eq!(packed.read::<[f32; 3]>(0, "position"), Some([0.4, 1.1, 0.0]));
}

#[test]
fn growing_selection_reports_truncation() {
    let mut reg = Registry::new();
    reg.spawn((Joint { position: [0.0; 3] }, Influence(1.0)));
    let mut query = reg.selection::<(Joint, Influence)>();
    let mut ctx = RenderContext::with_device(HeadlessDevice::new());

    let packed = pack(&reg, &mut query);
    let h = ctx
        .resources_mut()
        .allocate(
            "joints",
            BufferRole::Vertex,
            packed.as_bytes().len() as u64,
            Some(packed.as_bytes()),
        )
        .unwrap();

    reg.spawn((Joint { position: [1.0; 3] }, Influence(0.2)));
    let packed = pack(&reg, &mut query);
    assert_eq!(
        ctx.resources_mut().write(h, packed.as_bytes()),
        WriteOutcome::Truncated {
            written: 16,
            dropped: 16
        }
    );
    // The first record still made it.
    assert_eq!(ctx.resources().contents(h), Some(&packed.as_bytes()[..16]));
}

#[test]
fn material_block_upload_and_texture_binding() {
    let mut ctx = RenderContext::with_device(HeadlessDevice::new());
    let layout = LayoutPlanner::uniform()
        .plan(
            &LayoutDescriptor::new()
                .with("base_color", ScalarKind::Float4)
                .with("roughness", ScalarKind::Float),
        )
        .unwrap();
    assert_eq!(layout.stride(), 32);

    let mut block = ParameterBlock::new(&layout);
    block.set("base_color", [0.8f32, 0.2, 0.2, 1.0]).unwrap();
    block.set("roughness", 0.6f32).unwrap();
    let material = ctx.upload_block("skin_material", BufferRole::Material, &block).unwrap();
    let albedo = ctx
        .resources_mut()
        .allocate_texture(
            "albedo",
            &TextureDesc::new(1, 1, PixelFormat::Rgba8UnormSrgb),
            Some(&[255; 4]),
        )
        .unwrap();

    let plan = ctx.resources().bind_plan();
    assert_eq!(plan.len(), 2);
    assert_eq!((plan[0].group, plan[0].slot, plan[0].handle), (BindGroup::Material, 16, material));
    assert_eq!((plan[1].group, plan[1].slot, plan[1].handle), (BindGroup::Texture, 32, albedo));
    assert_eq!(ctx.resources().texture(albedo).unwrap().texels(), &[255; 4]);
}

#[test]
fn block_upload_survives_pipeline_with_same_label() {
    let device = HeadlessDevice::new().with_shader("camera", &["vs_main", "fs_main"]);
    let mut ctx = RenderContext::with_device(device);
    let key = PipelineKey::new(
        "camera",
        ShaderRef::new("camera", "vs_main", "fs_main"),
        VertexLayout::empty(),
        PixelFormat::Bgra8UnormSrgb,
    );
    let pipeline = ctx.pipeline(&key).unwrap();

    let layout = LayoutPlanner::uniform()
        .plan(&LayoutDescriptor::new().with("eye", ScalarKind::Float3))
        .unwrap();
    let mut block = ParameterBlock::new(&layout);
    block.set("eye", [0.0f32, 1.2, 3.0]).unwrap();
    let camera = ctx.upload_block("camera", BufferRole::Uniform, &block).unwrap();

    assert_ne!(camera, pipeline);
    assert!(ctx.resources().pipeline(pipeline).is_some());
    assert_eq!(ctx.resources().contents(camera), Some(block.as_bytes()));
    // Recompiling the same key still hits the cache.
    assert_eq!(ctx.pipeline(&key).unwrap(), pipeline);
}

#[test]
fn growing_block_upload_is_an_error() {
    let mut ctx = RenderContext::with_device(HeadlessDevice::new());
    let planner = LayoutPlanner::uniform();
    let small = planner
        .plan(&LayoutDescriptor::new().with("roughness", ScalarKind::Float))
        .unwrap();
    let large = planner
        .plan(
            &LayoutDescriptor::new()
                .with("view_proj", ScalarKind::Float4x4)
                .with("roughness", ScalarKind::Float),
        )
        .unwrap();

    let handle = ctx
        .upload_block("blk", BufferRole::Material, &ParameterBlock::new(&small))
        .unwrap();
    let result = ctx.upload_block("blk", BufferRole::Material, &ParameterBlock::new(&large));
    match result {
        Err(RenderError::Truncated {
            label,
            written,
            dropped,
        }) => {
            assert_eq!(label, "blk");
            assert_eq!((written, dropped), (16, 64));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(ctx.resources().get(handle).unwrap().size(), 16);
}
