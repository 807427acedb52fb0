use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");

    // FFmpeg libraries are only linked when the `ffmpeg` feature is on
    if std::env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    let ffmpeg_dir = std::env::var_os("FFMPEG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("third_party/ffmpeg"));
    let lib_dir = ffmpeg_dir.join("lib");

    if lib_dir.exists() {
        println!("cargo:rustc-link-search=native={}", lib_dir.display());
    } else {
        println!(
            "cargo:warning=FFmpeg libraries not found at {}, relying on the system linker paths",
            lib_dir.display()
        );
    }

    // Rerun if the bundled FFmpeg changes
    println!("cargo:rerun-if-changed={}", lib_dir.display());
}
