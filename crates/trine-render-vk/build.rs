use std::{env, fs, path::PathBuf};

// GLSL in res/shaders -> SPIR-V in OUT_DIR (embedded as the built-in stages)
// and next to the sources, at the paths the default config names.
const STAGES: [(&str, shaderc::ShaderKind, &str); 2] = [
    ("triangle.vert", shaderc::ShaderKind::Vertex, "vert.spv"),
    ("triangle.frag", shaderc::ShaderKind::Fragment, "frag.spv"),
];

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    let manifest = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let shader_dir = manifest.join("../../res/shaders");

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src_name, kind, spv_name) in STAGES {
        let src_path = shader_dir.join(src_name);
        println!("cargo:rerun-if-changed={}", src_path.display());

        let src = fs::read_to_string(&src_path)
            .unwrap_or_else(|e| panic!("reading {}: {e}", src_path.display()));
        let spv = comp
            .compile_into_spirv(&src, kind, src_name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compiling {src_name}: {e}"));
        let bytes = spv.as_binary_u8();

        fs::write(out.join(spv_name), bytes).unwrap();

        // best effort: a read-only source tree still builds, the binary falls
        // back to the embedded copy
        let dst = shader_dir.join(spv_name);
        if fs::read(&dst).ok().as_deref() != Some(bytes) {
            if let Err(e) = fs::write(&dst, bytes) {
                println!("cargo:warning=could not write {}: {e}", dst.display());
            }
        }
    }

    println!("cargo:rerun-if-changed=build.rs");
}
