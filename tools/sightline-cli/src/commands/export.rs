//! Annotate an image or video and export it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sightline_common::clock::SystemClock;
use sightline_common::config::AppConfig;
use sightline_job_model::{
    default_output_target, ExportEvent, ExportOutcome, ExportRequest, SinkKind, SourceSpec,
};
use sightline_media_io::ffmpeg::FfmpegBackend;
use sightline_media_io::{MediaBackend, VideoCodec};
use sightline_render_engine::{ExportJob, ExportSession, ExportSettings, PassthroughEngine};

pub async fn run(
    config: &AppConfig,
    input: PathBuf,
    sink: Option<String>,
    output: Option<PathBuf>,
    codecs: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let source = source_for(&input);
    let sink = match sink {
        Some(name) => name.parse::<SinkKind>().map_err(|e| anyhow::anyhow!(e))?,
        None if matches!(source, SourceSpec::Image(_)) => SinkKind::SingleImage,
        None => SinkKind::SingleVideo,
    };
    let output =
        output.unwrap_or_else(|| default_output_target(sink, &config.output_dir, &SystemClock));

    let backend = Arc::new(FfmpegBackend::new());
    if matches!(source, SourceSpec::Video(_)) && !backend.is_available() {
        anyhow::bail!("ffmpeg was not found on PATH. Install it to export from videos.");
    }

    let mut settings = ExportSettings::from_defaults(&config.export);
    if !codecs.is_empty() {
        settings.codec_candidates = VideoCodec::parse_list(&codecs);
        if settings.codec_candidates.is_empty() {
            anyhow::bail!("None of the requested codecs are known. Use: mp4v, XVID, MJPG, avc1");
        }
    }

    if !json {
        println!("Exporting: {}", input.display());
        println!("  Output: {} ({})", output.display(), sink.as_str());
    }

    let request = ExportRequest::new(source, sink, output);
    let job = ExportJob::new(request, backend, Arc::new(PassthroughEngine)).with_settings(settings);

    let session = ExportSession::new();
    let handle = session.start(job)?;

    let monitor = handle.monitor().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && monitor.cancel() {
            eprintln!("\n  Canceling...");
        }
    });

    let outcome = handle
        .wait_with(|event| {
            if let ExportEvent::Progress { percent } = event {
                if !json {
                    print!("\r  Progress: {percent:>3}%");
                    let _ = std::io::stdout().flush();
                }
            }
        })
        .await;
    interrupt.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match outcome {
        ExportOutcome::Completed { message, .. } => {
            if !json {
                println!("\n{message}");
            }
            Ok(())
        }
        ExportOutcome::Canceled => {
            if !json {
                println!("\nExport canceled; partial output removed.");
            }
            Ok(())
        }
        ExportOutcome::Failed { kind, reason } => {
            Err(anyhow::anyhow!("Export failed ({kind}): {reason}"))
        }
    }
}

/// Files the image crate can decode are exported as stills; everything else
/// is treated as video.
fn source_for(input: &Path) -> SourceSpec {
    if image::ImageFormat::from_path(input).is_ok() {
        SourceSpec::Image(input.to_path_buf())
    } else {
        SourceSpec::Video(input.to_path_buf())
    }
}
