use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use walkdir::WalkDir;

const SHADER_DIR: &str = "assets/shaders";

fn main() {
    let shader_dir = Path::new(SHADER_DIR);
    println!("cargo:rerun-if-changed={}", SHADER_DIR);
    println!("cargo:rerun-if-changed=build.rs");

    if !shader_dir.exists() {
        println!("cargo:warning=No shader directory at {}; skipping shader compilation.", SHADER_DIR);
        return;
    }

    let sources = WalkDir::new(shader_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            matches!(
                e.path().extension().and_then(|ext| ext.to_str()),
                Some("vert" | "frag")
            )
        });

    for entry in sources {
        let source_path = entry.path();
        let Some(file_name) = source_path.file_name().and_then(|name| name.to_str()) else {
            println!("cargo:warning=Skipping shader with a non UTF-8 name: {:?}", source_path);
            continue;
        };
        let output_path = shader_dir.join(format!("{}.spv", file_name));

        match Command::new("glslc")
            .arg(source_path)
            .arg("-o")
            .arg(&output_path)
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => panic!(
                "Failed to compile shader {:?}. glslc exited with code: {:?}",
                source_path,
                status.code()
            ),
            // Prebuilt SPIR-V next to the sources (or passed on the command
            // line) still works without the compiler.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                println!(
                    "cargo:warning=glslc not found; {:?} was not compiled. Install the Vulkan SDK or provide {:?}.",
                    source_path, output_path
                );
                return;
            }
            Err(e) => panic!("Failed to execute glslc for shader {:?}: {}", source_path, e),
        }
    }
}
