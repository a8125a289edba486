//! Vertex layout and the deduplicated mesh buffers built from it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::mem::{offset_of, size_of};

use ash::vk;

pub type Vec2 = nalgebra::Vector2<f32>;
pub type Vec3 = nalgebra::Vector3<f32>;

/// One mesh vertex. The field order and sizes are read back by the pipeline's
/// vertex input description, so the layout is `#[repr(C)]` and fixed.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub pos: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const fn new(pos: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, pos) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, color) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Vertex, tex_coord) as u32),
        ]
    }

    fn pos_bits(&self) -> [u32; 3] {
        [self.pos.x.to_bits(), self.pos.y.to_bits(), self.pos.z.to_bits()]
    }

    fn color_bits(&self) -> [u32; 3] {
        [
            self.color.x.to_bits(),
            self.color.y.to_bits(),
            self.color.z.to_bits(),
        ]
    }

    fn tex_coord_bits(&self) -> [u32; 2] {
        [self.tex_coord.x.to_bits(), self.tex_coord.y.to_bits()]
    }

    /// Per-field hashes folded as `((pos ^ (color << 1)) >> 1) ^ (tex << 1)`.
    pub fn combined_hash(&self) -> u64 {
        let pos = field_hash(&self.pos_bits());
        let color = field_hash(&self.color_bits());
        let tex_coord = field_hash(&self.tex_coord_bits());
        ((pos ^ (color << 1)) >> 1) ^ (tex_coord << 1)
    }
}

fn field_hash(bits: &[u32]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bits.hash(&mut hasher);
    hasher.finish()
}

// Bitwise comparison keeps `Eq` consistent with `Hash`.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.pos_bits() == other.pos_bits()
            && self.color_bits() == other.color_bits()
            && self.tex_coord_bits() == other.tex_coord_bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.combined_hash());
    }
}

/// Unique vertices plus a parallel list of 32-bit indices into them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl Mesh {
    /// Builds compact buffers from triangles, reusing the index of any vertex
    /// seen before.
    pub fn from_triangles<I>(triangles: I) -> Self
    where
        I: IntoIterator<Item = [Vertex; 3]>,
    {
        let mut mesh = Mesh::default();
        let mut unique_vertices = HashMap::new();
        for vertex in triangles.into_iter().flatten() {
            let index = *unique_vertices.entry(vertex).or_insert_with(|| {
                mesh.vertices.push(vertex);
                (mesh.vertices.len() - 1) as u32
            });
            mesh.indices.push(index);
        }
        mesh
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The triangles described by the index buffer, in submission order.
    pub fn triangles(&self) -> impl Iterator<Item = [Vertex; 3]> + '_ {
        self.indices.chunks_exact(3).map(|triangle| {
            [
                self.vertices[triangle[0] as usize],
                self.vertices[triangle[1] as usize],
                self.vertices[triangle[2] as usize],
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, y: f32, u: f32, v: f32) -> Vertex {
        Vertex::new(Vec3::new(x, y, 0.0), Vec3::new(1.0, 1.0, 1.0), Vec2::new(u, v))
    }

    fn quad() -> Vec<[Vertex; 3]> {
        let a = vertex(-0.5, -0.5, 1.0, 0.0);
        let b = vertex(0.5, -0.5, 0.0, 0.0);
        let c = vertex(0.5, 0.5, 0.0, 1.0);
        let d = vertex(-0.5, 0.5, 1.0, 1.0);
        vec![[a, b, c], [c, d, a]]
    }

    #[test]
    fn layout_matches_vertex_input_description() {
        assert_eq!(size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, [0, 12, 24]);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn shared_corners_collapse_to_one_index() {
        let mesh = Mesh::from_triangles(quad());
        assert_eq!(mesh.vertices().len(), 4);
        assert_eq!(mesh.indices(), [0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn indexed_triangles_reproduce_the_source() {
        let source = quad();
        let mesh = Mesh::from_triangles(source.clone());
        let rebuilt: Vec<[Vertex; 3]> = mesh.triangles().collect();
        assert_eq!(rebuilt, source);
        assert_eq!(mesh.index_count(), 6);
    }

    #[test]
    fn identical_vertices_hash_equal() {
        let a = vertex(0.25, 0.75, 0.5, 0.5);
        let b = vertex(0.25, 0.75, 0.5, 0.5);
        assert_eq!(a, b);
        assert_eq!(a.combined_hash(), b.combined_hash());
    }

    #[test]
    fn vertices_differing_in_any_field_stay_distinct() {
        let base = vertex(0.25, 0.75, 0.5, 0.5);
        let mut moved = base;
        moved.pos.z = 1.0;
        let mut tinted = base;
        tinted.color.y = 0.0;
        let mut shifted = base;
        shifted.tex_coord.x = 0.0;

        for other in [moved, tinted, shifted] {
            assert_ne!(base, other);
            let mesh = Mesh::from_triangles([[base, other, base]]);
            assert_eq!(mesh.vertices().len(), 2);
            assert_eq!(mesh.indices(), [0, 1, 0]);
        }
    }

    #[test]
    fn signed_zero_is_a_distinct_vertex() {
        let positive = vertex(0.0, 0.0, 0.0, 0.0);
        let negative = vertex(-0.0, 0.0, 0.0, 0.0);
        assert_ne!(positive, negative);
    }

    #[test]
    fn empty_input_gives_empty_mesh() {
        let mesh = Mesh::from_triangles(Vec::new());
        assert!(mesh.is_empty());
        assert_eq!(mesh.triangles().count(), 0);
    }
}
