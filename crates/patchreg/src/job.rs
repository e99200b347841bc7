use crate::{load_image, save_image, PatchregError, PngDebugSink};
use patchreg_align::{
    pyramidal_search_with, warp_image, AlignJobConfig, AlignmentReport, DebugSink, SearchOptions,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Run one alignment job end to end: load both images, search, write the
/// warped moving image and the JSON report. Returns the report.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(job),
        fields(reference = %job.reference_path, moving = %job.moving_path)
    )
)]
pub fn run_job(job: &AlignJobConfig) -> Result<AlignmentReport, PatchregError> {
    let reference = load_image(&job.reference_path)?;
    let moving = load_image(&job.moving_path)?;
    log::info!(
        "reference {}x{}x{}, moving {}x{}x{}",
        reference.width,
        reference.height,
        reference.channels,
        moving.width,
        moving.height,
        moving.channels
    );

    let mut sink = job.debug_dir.as_deref().map(PngDebugSink::new).transpose()?;
    let options = SearchOptions {
        initial: job.initial_motion()?,
        cancel: None,
        debug: sink.as_mut().map(|s| s as &mut dyn DebugSink),
    };
    let alignment = pyramidal_search_with(
        &reference.view(),
        &moving.view(),
        &job.alignment,
        &job.schedule,
        options,
    )?;

    let warped = warp_image(
        &moving.view(),
        &alignment.motion,
        alignment.residual.as_ref(),
        job.moving_camera.as_ref(),
        reference.width,
        reference.height,
        job.fill,
    );
    let output_path = job.output_path();
    save_image(&output_path, &warped)?;

    let mut report = AlignmentReport::from_alignment(&alignment);
    report.reference_path = Some(job.reference_path.clone());
    report.moving_path = Some(job.moving_path.clone());
    let report_path = job.report_path();
    report.write_json(&report_path)?;

    if let Some(sink) = &sink {
        log::info!("{} debug images in {}", sink.written(), sink.dir().display());
    }
    log::info!(
        "wrote {} and {}",
        output_path.display(),
        report_path.display()
    );
    Ok(report)
}
