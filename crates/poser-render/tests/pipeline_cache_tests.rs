//! PipelineCache behavior: structural keying and creation failures.

use std::sync::Arc;

use poser_render::prelude::*;

fn device() -> HeadlessDevice {
    HeadlessDevice::new()
        .with_shader("mesh", &["vs_main", "fs_main", "fs_outline"])
        .with_shader("bones", &["vs_main", "fs_main"])
}

fn setup() -> (ResourceTable<HeadlessDevice>, PipelineCache<HeadlessDevice>) {
    (
        ResourceTable::new(Arc::new(device()), RenderConfig::default()),
        PipelineCache::new(),
    )
}

fn mesh_layout() -> VertexLayout {
    LayoutDescriptor::new()
        .with_packed("position", ScalarKind::Float3)
        .with_packed("normal", ScalarKind::Float3)
        .plan()
        .unwrap()
        .vertex_layout()
        .unwrap()
}

fn base_key() -> PipelineKey {
    PipelineKey::new(
        "mesh",
        ShaderRef::new("mesh", "vs_main", "fs_main"),
        mesh_layout(),
        PixelFormat::Bgra8UnormSrgb,
    )
}

#[test]
fn identical_keys_share_a_handle() {
    let (mut table, mut cache) = setup();
    let a = cache.get_or_create(&mut table, &base_key()).unwrap();
    let b = cache.get_or_create(&mut table, &base_key().clone()).unwrap();
    assert_eq!(a, b);
    assert_eq!(cache.len(), 1);
    assert_eq!(table.device().pipelines_compiled(), 1);
    assert_eq!(table.pipeline(a).unwrap().key(), &base_key());
}

#[test]
fn every_field_participates_in_identity() {
    let other_layout = LayoutDescriptor::new()
        .with_packed("position", ScalarKind::Float3)
        .plan()
        .unwrap()
        .vertex_layout()
        .unwrap();

    let variants = vec![
        base_key(),
        PipelineKey {
            label: "mesh_copy".into(),
            ..base_key()
        },
        PipelineKey {
            shader: ShaderRef::new("bones", "vs_main", "fs_main"),
            ..base_key()
        },
        PipelineKey {
            shader: ShaderRef::new("mesh", "vs_main", "fs_outline"),
            ..base_key()
        },
        PipelineKey {
            shader: ShaderRef::vertex_only("mesh", "vs_main"),
            ..base_key()
        },
        PipelineKey {
            vertex_layout: other_layout,
            ..base_key()
        },
        PipelineKey {
            color_format: PixelFormat::Rgba16Float,
            ..base_key()
        },
        base_key().with_depth(PixelFormat::Depth32Float, DepthSettings::default()),
        base_key().with_depth(
            PixelFormat::Depth32Float,
            DepthSettings {
                compare: CompareFunction::LessEqual,
                write_enabled: false,
            },
        ),
        base_key().with_blend(BlendMode::AlphaBlend),
        base_key().with_topology(Topology::LineList),
    ];

    let (mut table, mut cache) = setup();
    let handles: Vec<Handle> = variants
        .iter()
        .map(|k| cache.get_or_create(&mut table, k).unwrap())
        .collect();
    for (i, a) in handles.iter().enumerate() {
        for b in &handles[i + 1..] {
            assert_ne!(a, b);
        }
    }
    assert_eq!(cache.len(), variants.len());

    // Asking again returns the same handles without compiling.
    let again: Vec<Handle> = variants
        .iter()
        .map(|k| cache.get_or_create(&mut table, k).unwrap())
        .collect();
    assert_eq!(again, handles);
    assert_eq!(table.device().pipelines_compiled(), variants.len());
}

#[test]
fn missing_entry_point_fails_without_caching() {
    let (mut table, mut cache) = setup();
    let good = cache.get_or_create(&mut table, &base_key()).unwrap();

    let bad = PipelineKey {
        shader: ShaderRef::new("mesh", "vs_main", "fs_missing"),
        ..base_key()
    };
    let err = cache.get_or_create(&mut table, &bad).unwrap_err();
    match err {
        RenderError::PipelineCreation { label, source } => {
            assert_eq!(label, "mesh");
            assert_eq!(
                source,
                DeviceError::MissingEntryPoint {
                    module: "mesh".into(),
                    entry: "fs_missing".into()
                }
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cache.get(&bad).is_none());
    assert_eq!(cache.len(), 1);
    assert_eq!(table.len(), 1);
    assert_eq!(cache.get(&base_key()), Some(good));
}

#[test]
fn missing_module_fails_and_retries() {
    let table_device = Arc::new(device());
    let mut table = ResourceTable::new(Arc::clone(&table_device), RenderConfig::default());
    let mut cache = PipelineCache::new();
    let key = PipelineKey {
        shader: ShaderRef::new("gizmo", "vs_main", "fs_main"),
        ..base_key()
    };
    assert!(matches!(
        cache.get_or_create(&mut table, &key),
        Err(RenderError::PipelineCreation {
            source: DeviceError::MissingShaderModule { .. },
            ..
        })
    ));

    // Once the module exists the same key compiles.
    table_device.register_shader("gizmo", &["vs_main", "fs_main"]);
    let h = cache.get_or_create(&mut table, &key).unwrap();
    assert!(table.pipeline(h).is_some());
    assert_eq!(cache.misses(), 2);
}

#[test]
fn depth_format_must_be_a_depth_format() {
    let (mut table, mut cache) = setup();
    let key = base_key().with_depth(PixelFormat::Rgba8Unorm, DepthSettings::default());
    assert!(matches!(
        cache.get_or_create(&mut table, &key),
        Err(RenderError::PipelineCreation {
            source: DeviceError::InvalidFormat { .. },
            ..
        })
    ));
    assert!(cache.is_empty());
}

#[test]
fn pipelines_are_not_bound() {
    let (mut table, mut cache) = setup();
    cache.get_or_create(&mut table, &base_key()).unwrap();
    assert!(table.bind_plan().is_empty());
}
