//! Loader collaborators: models, textures and shader bytecode off disk.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::*;

use crate::mesh::{Mesh, Vec2, Vec3, Vertex};

/// Decoded RGBA8 texture, rows tightly packed.
#[derive(Clone, Debug)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TexturePixels {
    pub fn byte_len(&self) -> u64 {
        self.pixels.len() as u64
    }
}

/// Loads an OBJ file and deduplicates its vertices.
pub fn load_model(path: &Path) -> Result<Mesh> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open model '{}'", path.display()))?,
    );
    let (models, _) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Ok(Default::default()),
    )
    .with_context(|| format!("Failed to parse model '{}'", path.display()))?;

    let mut corners = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        for &index in &mesh.indices {
            corners.push(obj_vertex(mesh, index as usize)?);
        }
    }
    let triangles = corners
        .chunks_exact(3)
        .map(|triangle| [triangle[0], triangle[1], triangle[2]]);
    let mesh = Mesh::from_triangles(triangles);

    info!(
        "Loaded model '{}': {} unique vertices, {} indices.",
        path.display(),
        mesh.vertices().len(),
        mesh.indices().len()
    );
    Ok(mesh)
}

fn obj_vertex(mesh: &tobj::Mesh, index: usize) -> Result<Vertex> {
    let pos = mesh
        .positions
        .get(3 * index..3 * index + 3)
        .ok_or_else(|| anyhow!("Model index {} has no position.", index))?;
    // OBJ texture space has its origin bottom-left; Vulkan samples top-left.
    let tex_coord = match mesh.texcoords.get(2 * index..2 * index + 2) {
        Some(uv) => Vec2::new(uv[0], 1.0 - uv[1]),
        None => Vec2::zeros(),
    };
    Ok(Vertex::new(
        Vec3::new(pos[0], pos[1], pos[2]),
        Vec3::new(1.0, 1.0, 1.0),
        tex_coord,
    ))
}

/// Decodes an image file into tightly packed RGBA8 pixels.
pub fn load_texture(path: &Path) -> Result<TexturePixels> {
    let img = image::open(path)
        .map_err(|e| anyhow!("Failed to open texture image '{}': {}", path.display(), e))?
        .into_rgba8();
    let (width, height) = img.dimensions();
    debug!("Loaded texture '{}' ({}x{}).", path.display(), width, height);
    Ok(TexturePixels {
        width,
        height,
        pixels: img.into_raw(),
    })
}

/// Reads compiled shader bytecode verbatim.
pub fn load_shader(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read shader '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mesh-viewer-{}-{}", std::process::id(), name))
    }

    #[test]
    fn obj_quad_shares_vertices() {
        let path = temp_path("quad.obj");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "v -0.5 -0.5 0\nv 0.5 -0.5 0\nv 0.5 0.5 0\nv -0.5 0.5 0\n\
             vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
             f 1/1 2/2 3/3\nf 3/3 4/4 1/1"
        )
        .unwrap();
        drop(file);

        let mesh = load_model(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(mesh.vertices().len(), 4);
        assert_eq!(mesh.indices().len(), 6);
        let first = mesh.vertices()[0];
        assert_eq!(first.pos, Vec3::new(-0.5, -0.5, 0.0));
        assert_eq!(first.tex_coord, Vec2::new(0.0, 1.0));
    }

    #[test]
    fn missing_model_is_an_error() {
        let err = load_model(Path::new("does/not/exist.obj")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.obj"));
    }

    #[test]
    fn texture_is_decoded_to_rgba8() {
        let path = temp_path("checker.png");
        let img = image::RgbImage::from_fn(2, 3, |x, _| image::Rgb([x as u8 * 255, 0, 0]));
        img.save(&path).unwrap();

        let texture = load_texture(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!((texture.width, texture.height), (2, 3));
        assert_eq!(texture.byte_len(), 2 * 3 * 4);
        assert_eq!(&texture.pixels[4..8], &[255, 0, 0, 255]);
    }

    #[test]
    fn shader_bytes_are_returned_verbatim() {
        let path = temp_path("shader.spv");
        std::fs::write(&path, [0x03, 0x02, 0x23, 0x07]).unwrap();
        let bytes = load_shader(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(bytes, [0x03, 0x02, 0x23, 0x07]);
    }
}
