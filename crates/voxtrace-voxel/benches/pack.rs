use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use voxtrace_core::types::BlockId;
use voxtrace_voxel::{pack_octree, PackedOctree, VoxelStorage};

fn terrain(depth: u32) -> PackedOctree {
    let mut octree = PackedOctree::new(depth);
    let size = octree.size();
    for z in 0..size {
        for x in 0..size {
            let height = (size / 4) + ((x * 7 + z * 13) % (size / 4).max(1));
            octree.fill([x, 0, z], [x + 1, height, z + 1], BlockId(1 + (x + z) % 3));
        }
    }
    let half = size as f32 / 2.0;
    octree.fill_sphere([half, half, half], half / 3.0, BlockId::AIR);
    octree
}

fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_octree");
    for depth in [5, 6, 7] {
        let octree = terrain(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &octree, |b, octree| {
            b.iter(|| pack_octree(black_box(octree)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pack);
criterion_main!(benches);
