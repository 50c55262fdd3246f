use super::*;
use crate::error::ErrorKind;
use crate::media::operation::Segment;
use crate::testing::{self, read_media, write_media, FakeRunner};
use anyhow::Result;
use tempfile::TempDir;

fn registry(runner: &Arc<FakeRunner>) -> OperationRegistry {
    OperationRegistry::new(testing::tools(), runner.clone())
}

#[tokio::test]
async fn noise_reduction_uses_sox_when_available() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = FakeRunner::new();
    let input = write_media(&dir.path().join("in.wav"), 10.0, "voice");
    let output = dir.path().join("out.wav");

    let op = Operation::NoiseReduction(NoiseReductionParams::default());
    registry(&runner).apply(&op, &input, &output, &CancellationToken::new()).await?;

    assert_eq!(read_media(&output).filters, vec!["noisered"]);
    assert_eq!(runner.calls_to("sox"), 2);
    assert_eq!(runner.calls_to("ffmpeg"), 0);
    // profile is scratch only
    assert!(!output.with_extension("noise.prof").exists());
    Ok(())
}

#[tokio::test]
async fn noise_reduction_falls_back_to_frequency_filter() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = FakeRunner::new();
    runner.fail_program("sox");
    let input = write_media(&dir.path().join("in.wav"), 10.0, "voice");
    let output = dir.path().join("out.wav");

    let op = Operation::NoiseReduction(NoiseReductionParams::default());
    registry(&runner).apply(&op, &input, &output, &CancellationToken::new()).await?;

    let media = read_media(&output);
    assert_eq!(media.filters, vec!["highpass", "lowpass"]);
    assert_eq!(runner.calls_to("ffmpeg"), 1);
    Ok(())
}

#[tokio::test]
async fn fallback_failure_is_tool_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = FakeRunner::new();
    runner.fail_program("sox");
    runner.fail_filter("highpass");
    let input = write_media(&dir.path().join("in.wav"), 10.0, "voice");

    let op = Operation::NoiseReduction(NoiseReductionParams::default());
    let err = registry(&runner)
        .apply(&op, &input, &dir.path().join("out.wav"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ToolFailure);
    // exactly one fallback attempt
    assert_eq!(runner.calls_to("ffmpeg"), 1);
    Ok(())
}

#[tokio::test]
async fn normalize_falls_back_to_fixed_gain() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = FakeRunner::new();
    runner.fail_filter("loudnorm");
    let input = write_media(&dir.path().join("in.wav"), 10.0, "voice");
    let output = dir.path().join("out.wav");

    let op = Operation::NormalizeAudio(NormalizeParams::default());
    registry(&runner).apply(&op, &input, &output, &CancellationToken::new()).await?;

    assert_eq!(read_media(&output).filters, vec!["volume"]);
    let last = runner.calls().pop().unwrap();
    assert!(last.args.contains(&"volume=1.5".to_string()));
    Ok(())
}

#[tokio::test]
async fn segments_concatenate_in_input_order() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = FakeRunner::new();
    let input = write_media(&dir.path().join("in.wav"), 60.0, "src");
    let output = dir.path().join("task_extract_segments_0.wav");

    let op = Operation::ExtractSegments(SegmentsParams {
        segments: vec![
            Segment { start: 0.0, duration: 5.0 },
            Segment { start: 10.0, duration: 5.0 },
        ],
        include_video: false,
    });
    registry(&runner).apply(&op, &input, &output, &CancellationToken::new()).await?;

    let media = read_media(&output);
    assert!((media.duration - 10.0).abs() < 0.1);
    assert_eq!(media.parts, vec!["src[0+5]", "src[10+5]"]);

    // per-segment cuts are removed
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_part"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[tokio::test]
async fn change_speed_chains_atempo() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = FakeRunner::new();
    let input = write_media(&dir.path().join("in.wav"), 12.0, "voice");
    let output = dir.path().join("out.wav");

    let op = Operation::ChangeSpeed(SpeedParams {
        speed_factor: 3.0,
        preserve_pitch: true,
    });
    registry(&runner).apply(&op, &input, &output, &CancellationToken::new()).await?;

    assert!((read_media(&output).duration - 4.0).abs() < 0.01);
    assert_eq!(atempo_chain(3.0), "atempo=2.0,atempo=1.5");
    Ok(())
}

#[tokio::test]
async fn subtitles_must_exist() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = FakeRunner::new();
    let input = write_media(&dir.path().join("in.mp4"), 10.0, "clip");

    let op = Operation::AddSubtitles(SubtitleParams {
        subtitle_path: Some(dir.path().join("missing.srt")),
    });
    let err = registry(&runner)
        .apply(&op, &input, &dir.path().join("out.mp4"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(runner.calls().is_empty());
    Ok(())
}
