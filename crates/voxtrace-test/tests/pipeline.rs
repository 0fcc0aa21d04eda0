//! End-to-end pass behaviour on the host device.

use std::sync::Arc;

use approx::assert_relative_eq;
use voxtrace_core::BlockId;
use voxtrace_gpu::{ComputeDevice, DeviceContext, GpuError, HostDevice, KernelArg, KernelArgs};
use voxtrace_render::{AtlasBuilder, PassOutcome, Texture};
use voxtrace_shaders::RENDER_KERNEL;
use voxtrace_test::{
    cube_octree, floor_scene, test_camera, test_palette, HeadlessRenderer, IndexKernel, STONE,
};
use voxtrace_voxel::{pack_octree, VoxelStorage};

#[test]
fn result_length_matches_sample_buffer() {
    for (width, height) in [(1, 1), (3, 2), (16, 9), (64, 64)] {
        let mut renderer = HeadlessRenderer::with_kernel(width, height, IndexKernel).unwrap();
        let stats = renderer
            .render_completed(&test_palette(), Arc::new(floor_scene(3)), &test_camera(8, 1.5))
            .unwrap();

        let values = (width * height * 3) as usize;
        assert_eq!(stats.pixels * 3, values);
        assert_eq!(renderer.samples().len(), values);
        for (i, &sample) in renderer.samples().iter().enumerate() {
            assert_eq!(sample, f64::from(IndexKernel::expected(i)), "sample {i}");
        }
    }
}

#[test]
fn four_pixels_upload_twelve_ray_values() {
    let mut renderer = HeadlessRenderer::with_kernel(2, 2, IndexKernel).unwrap();
    renderer
        .render_completed(&test_palette(), Arc::new(floor_scene(3)), &test_camera(8, 1.5))
        .unwrap();

    let stats = renderer.device_stats().unwrap();
    assert_eq!(stats.dispatches.len(), 1);
    let dispatch = &stats.dispatches[0];
    assert_eq!(dispatch.work_items, 4);
    assert_eq!(dispatch.args.len(), 7);

    let buffer_size = |index: usize| match dispatch.args[index] {
        KernelArg::Buffer { size, .. } => size,
        KernelArg::Int(_) => panic!("argument {index} is a scalar"),
    };
    assert_eq!(buffer_size(0), 12 * 4);
    assert_eq!(buffer_size(1), 12 * 4);
    assert_eq!(dispatch.args[2], KernelArg::Int(3));
    assert_eq!(buffer_size(4) % 48, 0);
    assert_eq!(buffer_size(6), 12 * 4);
}

#[test]
fn every_buffer_is_released_once_in_order() {
    let mut renderer = HeadlessRenderer::new(4, 4).unwrap();
    for _ in 0..2 {
        renderer
            .render_completed(&test_palette(), Arc::new(floor_scene(3)), &test_camera(8, 1.5))
            .unwrap();
    }

    let stats = renderer.device_stats().unwrap();
    assert_eq!(stats.allocations, 12);
    assert_eq!(stats.releases, 12);
    assert_eq!(
        &stats.created[..6],
        ["rayPos", "rayDir", "octreeData", "blockPalette", "atlasTexture", "result"]
    );
    assert_eq!(
        &stats.released[..6],
        ["atlasTexture", "octreeData", "blockPalette", "rayPos", "rayDir", "result"]
    );
    assert_eq!(renderer.context().live_allocations(), 0);
}

#[test]
fn repeated_passes_are_deterministic() {
    let palette = test_palette();
    let camera = test_camera(16, 1.2);

    let mut first = HeadlessRenderer::new(24, 16).unwrap();
    first
        .render_completed(&palette, Arc::new(floor_scene(4)), &camera)
        .unwrap();
    let mut second = HeadlessRenderer::new(24, 16).unwrap();
    for _ in 0..3 {
        second
            .render_completed(&palette, Arc::new(floor_scene(4)), &camera)
            .unwrap();
    }
    assert_eq!(first.samples(), second.samples());
}

#[test]
fn cube_is_visible_against_the_sky() {
    let mut renderer = HeadlessRenderer::new(9, 9).unwrap();
    let octree = cube_octree(3, [2, 2, 2], [6, 6, 6], STONE);
    renderer
        .render_completed(&test_palette(), Arc::new(octree), &test_camera(8, 1.0))
        .unwrap();

    let pixel = |x: usize, y: usize| {
        let i = (y * 9 + x) * 3;
        [
            renderer.samples()[i],
            renderer.samples()[i + 1],
            renderer.samples()[i + 2],
        ]
    };
    let center = pixel(4, 4);
    let corner = pixel(0, 0);
    // Stone is grey, the sky is blue-tinted
    assert_relative_eq!(center[0], center[2], epsilon = 1e-6);
    assert!(corner[2] > corner[0]);
}

#[test]
fn packed_buffer_rebuilds_the_same_tree() {
    let octree = floor_scene(4);
    let buffer = pack_octree(&octree).unwrap();

    assert_eq!(buffer.depth(), 4);
    assert_eq!(buffer.to_node_octree(), octree.to_node_octree());
    assert_eq!(buffer.node_count(), octree.node_count());
}

#[test]
fn distinct_textures_get_disjoint_regions() {
    let mut builder = AtlasBuilder::new(8);
    let ids: Vec<_> = (0..3)
        .map(|i| builder.add(&Arc::new(Texture::solid(4, 4, 0xFF00_0000 | i))))
        .collect();
    let atlas = builder.build().unwrap();

    let regions: Vec<_> = ids.iter().map(|&id| atlas.region(id).unwrap()).collect();
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn reordered_arguments_are_rejected() {
    let context =
        DeviceContext::new(Box::new(HostDevice::new(IndexKernel)), &RENDER_KERNEL).unwrap();
    let pass = context.begin_pass().unwrap();
    let floats = pass
        .upload("rayDir", voxtrace_core::ArgAccess::ReadOnly, &[0; 12])
        .unwrap();

    let mut args = KernelArgs::new(RENDER_KERNEL);
    assert!(matches!(
        args.bind_buffer("rayDir", &floats),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(matches!(
        args.bind_int("rayPos", 0),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(args.ensure_complete().is_err());

    floats.release().unwrap();
    assert_eq!(context.device().live_allocations(), 0);
}

#[test]
fn empty_world_renders_only_sky() {
    let mut renderer = HeadlessRenderer::new(4, 4).unwrap();
    let octree = cube_octree(3, [0, 0, 0], [0, 0, 0], BlockId::AIR);
    assert!(octree.is_empty());

    let outcome = renderer
        .render(&test_palette(), Arc::new(octree), &test_camera(8, 1.5))
        .unwrap();
    assert!(outcome.is_completed());
    let first = &renderer.samples()[..3];
    assert!(renderer
        .samples()
        .chunks_exact(3)
        .all(|pixel| pixel == first));
    assert!(matches!(outcome, PassOutcome::Completed { .. }));
}
