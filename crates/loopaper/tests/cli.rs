use std::fs;
use std::process::{Command, Output};

use tempfile::TempDir;

fn loopaper(config_dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_loopaper"))
        .env("LOOPAPER_CONFIG_DIR", config_dir.path())
        // Make sure nothing can reach a real compositor.
        .env("WAYLAND_DISPLAY", "loopaper-test-no-such-display")
        .env_remove("WAYLAND_SOCKET")
        .env_remove("HYPRLAND_INSTANCE_SIGNATURE")
        .args(args)
        .output()
        .expect("failed to run loopaper")
}

#[test]
fn fps_of_one_fails_before_connecting() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("plain.frag");
    fs::write(&shader, "void main() { gl_FragColor = vec4(1.0); }").unwrap();

    let output = loopaper(&root, &["--shader", shader.to_str().unwrap(), "--fps", "1"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fps must be greater than 1"), "{stderr}");
    assert!(!stderr.contains("Wayland"), "{stderr}");
}

#[test]
fn out_of_range_cache_quality_is_rejected() {
    let root = TempDir::new().unwrap();
    let output = loopaper(&root, &["--shader", "unused.frag", "--cache-quality", "0"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cache quality"), "{stderr}");
}

#[test]
fn convert_rewrites_file_and_exits() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("toy.frag");
    fs::write(
        &shader,
        "void mainImage(out vec4 fragColor, in vec2 fragCoord) {\n    fragColor = vec4(fragCoord / iResolution.xy, 0.5 + 0.5 * sin(iTime), 1.0);\n}\n",
    )
    .unwrap();

    let output = loopaper(&root, &["--convert", shader.to_str().unwrap()]);

    assert!(output.status.success(), "{output:?}");
    let converted = fs::read_to_string(&shader).unwrap();
    assert!(converted.contains("void main()"));
    assert!(converted.contains("uniform float time;"));
    assert!(converted.contains("gl_FragColor = vec4(gl_FragCoord.xy / resolution.xy"));
    assert!(!converted.contains("iTime"));
}

#[test]
fn convert_conflicts_with_runtime_convert() {
    let root = TempDir::new().unwrap();
    let output = loopaper(&root, &["--convert", "toy.frag", "--rt-convert"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn explicit_config_must_exist() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("nope.toml");
    let output = loopaper(
        &root,
        &["--shader", "a.frag", "--config", missing.to_str().unwrap()],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load config"), "{stderr}");
}

#[test]
fn unreachable_compositor_is_reported() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("plain.frag");
    fs::write(&shader, "void main() { gl_FragColor = vec4(1.0); }").unwrap();

    let output = loopaper(&root, &["--shader", shader.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Wayland compositor"), "{stderr}");
}
