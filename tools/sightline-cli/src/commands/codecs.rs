//! Probe the host's video codecs.

use sightline_common::config::AppConfig;
use sightline_job_model::FrameGeometry;
use sightline_media_io::ffmpeg::FfmpegBackend;
use sightline_media_io::{CodecProber, MediaBackend, VideoCodec};

pub fn run(config: &AppConfig, width: u32, height: u32, fps: f64) -> anyhow::Result<()> {
    let backend = FfmpegBackend::new();
    if !backend.is_available() {
        anyhow::bail!("ffmpeg was not found on PATH. Install it to export videos.");
    }

    let geometry = FrameGeometry::new(width, height, fps, 0);
    let scratch = tempfile::tempdir()?;
    let capability =
        CodecProber::new(&backend).probe(&VideoCodec::ALL, &geometry, scratch.path(), "avi")?;
    let preferred = VideoCodec::parse_list(&config.export.preferred_codecs);

    println!(
        "Codec support at {}x{} @ {} fps",
        geometry.width,
        geometry.height,
        geometry.fps_label()
    );
    println!("{}", "=".repeat(50));
    for codec in VideoCodec::ALL {
        let mark = if capability.supports(codec) {
            "OK"
        } else {
            "--"
        };
        println!(
            "[{mark}] {:<5} ({})",
            codec.fourcc(),
            codec.ffmpeg_encoder()
        );
    }

    println!();
    match capability.select(&preferred) {
        Some(codec) => println!("Video exports will use {codec}."),
        None => println!("No usable codec. Export as an image sequence instead (--sink frames)."),
    }
    Ok(())
}
