// Build script to compile HLSL shaders to DXIL

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    // Compile shaders using dxc (Windows SDK or DirectXShaderCompiler release)
    compile_shader("shaders/Object3d.VS.hlsl", "vs_6_0", "shaders/Object3d.VS.cso");
    compile_shader("shaders/Object3d.PS.hlsl", "ps_6_0", "shaders/Object3d.PS.cso");
}

fn compile_shader(input: &str, profile: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    // Check if dxc is available
    let result = Command::new("dxc")
        .arg(input_path)
        .args(["-T", profile, "-E", "main", "-Zi", "-Qembed_debug"])
        .arg("-Fo")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=dxc not found ({}); {} was not compiled", e, input);
            println!("cargo:warning=  dxc {} -T {} -E main -Fo {}", input, profile, output);
        }
    }
}
