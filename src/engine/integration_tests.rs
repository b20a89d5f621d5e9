// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::backends::stub::{stub_kernels, synthetic_config, RecordingKernel, RecordingLog};
use crate::config::{MarginFallback, PhaseOptions, ReconstructionConfig};
use crate::engine::{
    Backend, ChunkedPipeline, HookContext, PipelineLayout, PipelineVariant,
    ReconstructionSummary, Step, Task, VolumeReconstruction,
};
use crate::errors::ReconError;
use crate::histogram::merge_histograms;
use crate::memory::{DeviceContext, RADIOS};

/// Integration tests running whole jobs through the stub collaborators
#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STEPS: &str = "[read, flatfield, double_flatfield, phase_retrieval, take_log, \
                             sino_normalization, build_sino, reconstruction, histogram, write]";

    fn with_phase(mut config: ReconstructionConfig) -> ReconstructionConfig {
        config.phase = Some(PhaseOptions {
            distance_m: 0.5,
            energy_kev: 35.0,
            delta_beta: 100.0,
            pixel_size_m: 1.0e-6,
            margin_threshold: 1.0e-3,
        });
        config
    }

    fn run(config: ReconstructionConfig, backend: Backend) -> (ReconstructionSummary, RecordingLog) {
        let log = RecordingLog::default();
        let kernels = stub_kernels(&config, &log);
        let mut ctx = DeviceContext::new(1 << 24);
        let summary = VolumeReconstruction::new(config, kernels, backend)
            .expect("valid configuration")
            .run(&mut ctx)
            .expect("job succeeds");
        assert!(ctx.owner().is_none());
        assert_eq!(ctx.pool().used_bytes(), 0);
        (summary, log)
    }

    fn single_task_reference(mut config: ReconstructionConfig) -> (ReconstructionSummary, RecordingLog) {
        config.resources.chunk_size = None;
        config.resources.disable_margin = true;
        run(config, Backend::Host)
    }

    #[test]
    fn test_limited_memory_matches_full_pipeline() {
        let config = with_phase(synthetic_config(ALL_STEPS));
        let task = Task::with_clamped_margin(8, 24, 4, 32).unwrap();

        let full_log = RecordingLog::default();
        let mut host_ctx = DeviceContext::new(1 << 24);
        let mut full = ChunkedPipeline::new(
            config.clone(),
            task,
            stub_kernels(&config, &full_log),
            PipelineLayout {
                backend: Backend::Host,
                variant: PipelineVariant::Full,
                device_chunk: 64,
            },
            &mut host_ctx,
        )
        .unwrap();
        let full_outcome = full.process_chunk(&mut host_ctx).unwrap();

        let lm_log = RecordingLog::default();
        let mut ctx = DeviceContext::new(1 << 20);
        let mut limited = ChunkedPipeline::new(
            config.clone(),
            task,
            stub_kernels(&config, &lm_log),
            PipelineLayout {
                backend: Backend::Device,
                variant: PipelineVariant::LimitedMemory,
                device_chunk: 10,
            },
            &mut ctx,
        )
        .unwrap();
        let lm_outcome = limited.process_chunk(&mut ctx).unwrap();

        assert_eq!(lm_outcome.n_slices, 16);
        assert_eq!(lm_log.written_volume(), full_log.written_volume());
        assert_eq!(lm_outcome.histogram, full_outcome.histogram);
        assert_eq!(lm_outcome.histogram.as_ref().map(|h| h.total()), Some(16 * 6 * 6));

        // 4 * 10 / 24 = one projection per group; crop happens after phase retrieval
        let applied = lm_log.applied();
        assert_eq!(applied[0], (Step::Flatfield, [1, 24, 6]));
        assert!(applied.contains(&(Step::DoubleFlatfield, [4, 24, 6])));
        assert!(applied.contains(&(Step::PhaseRetrieval, [1, 24, 6])));
        assert!(applied.contains(&(Step::TakeLog, [1, 16, 6])));
        assert!(applied.contains(&(Step::SinoNormalization, [16, 4, 6])));
        assert_eq!(
            applied.iter().filter(|(s, _)| *s == Step::Flatfield).count(),
            4
        );

        // the peak is one group of 10 sinograms plus their 10 slices
        assert_eq!(ctx.pool().stats().peak_bytes, (10 * 4 * 6 + 10 * 6 * 6) * 4);
        assert!(ctx.pool().live_names().is_empty());

        let histograms = lm_log.histograms();
        assert_eq!(histograms.len(), 1);
        assert_eq!(histograms[0].0, PathBuf::from("/tmp/recs/rec_0008.hist"));
        assert_eq!(Some(&histograms[0].1), lm_outcome.histogram.as_ref());
        assert_eq!(
            lm_outcome.written.and_then(|w| w.histogram_path),
            Some(PathBuf::from("/tmp/recs/rec_0008.hist"))
        );

        limited.teardown(&mut ctx);
        assert_eq!(ctx.pool().used_bytes(), 0);
        assert!(ctx.owner().is_none());
    }

    #[test]
    fn test_tiled_job_reuses_pipeline_and_matches_single_task() {
        let mut config = synthetic_config(
            "[read, take_log, build_sino, reconstruction, histogram, write]",
        );
        config.resources.chunk_size = Some(10);
        let (summary, log) = run(config.clone(), Backend::Device);

        assert_eq!(summary.plan.len(), 4);
        assert_eq!(summary.pipelines_created, 2);
        assert_eq!(log.loads(), vec![(0, 10), (10, 20), (20, 30), (30, 32)]);

        let written = log.written();
        let starts: Vec<usize> = written.iter().map(|(start, _, _)| *start).collect();
        assert_eq!(starts, vec![0, 10, 20, 30]);
        let prefixes: Vec<&str> = written.iter().map(|(_, _, m)| m.file_prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["rec_0000", "rec_0010", "rec_0020", "rec_0030"]);

        // one histogram per chunk, written next to it
        let histograms = log.histograms();
        let paths: Vec<PathBuf> = histograms.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            paths,
            ["rec_0000", "rec_0010", "rec_0020", "rec_0030"]
                .iter()
                .map(|p| PathBuf::from(format!("/tmp/recs/{}.hist", p)))
                .collect::<Vec<_>>()
        );
        for (chunk, (path, histogram)) in summary.chunks.iter().zip(&histograms) {
            assert_eq!(chunk.histogram.as_ref(), Some(histogram));
            assert_eq!(
                chunk.written.as_ref().and_then(|w| w.histogram_path.as_ref()),
                Some(path)
            );
        }
        let parts: Vec<_> = histograms.into_iter().map(|(_, h)| h).collect();
        assert_eq!(summary.histogram, Some(merge_histograms(&parts, 1e-6).unwrap()));

        let (reference, reference_log) = single_task_reference(config);
        assert_eq!(reference.plan.len(), 1);
        assert_eq!(log.written_volume(), reference_log.written_volume());
        assert_eq!(summary.histogram, reference.histogram);
    }

    #[test]
    fn test_margins_are_loaded_and_cropped() {
        let mut config = with_phase(synthetic_config(ALL_STEPS));
        config.resources.chunk_size = Some(16);
        config.resources.margin = Some(3);
        let (summary, log) = run(config.clone(), Backend::Device);

        assert_eq!(summary.plan.margin, 3);
        assert_eq!(log.loads(), vec![(0, 13), (7, 23), (17, 32), (27, 32)]);
        assert_eq!(summary.pipelines_created, 4);
        let n_slices: Vec<usize> = summary.chunks.iter().map(|c| c.n_slices).collect();
        assert_eq!(n_slices, vec![10, 10, 10, 2]);
        // every task rebuilt its pipeline; the job still knows its first file
        assert_eq!(summary.first_file_prefix.as_deref(), Some("rec_0000"));

        let (_, reference_log) = single_task_reference(config);
        assert_eq!(log.written_volume(), reference_log.written_volume());
    }

    #[test]
    fn test_margin_fallback_streams_through_limited_memory() {
        let mut config = with_phase(synthetic_config(ALL_STEPS));
        config.resources.chunk_size = Some(8);
        config.resources.margin = Some(4);
        config.resources.on_insufficient_margin = MarginFallback::LimitedMemory;
        let (summary, log) = run(config.clone(), Backend::Device);

        assert_eq!(summary.plan.variant, PipelineVariant::LimitedMemory);
        assert_eq!(summary.plan.fallback, Some(MarginFallback::LimitedMemory));
        // host budget allows 32 rows, so 24 slices plus margins per task
        assert_eq!(summary.plan.len(), 2);
        assert_eq!(log.loads(), vec![(0, 28), (20, 32)]);

        let (reference, reference_log) = single_task_reference(config);
        assert_eq!(log.written_volume(), reference_log.written_volume());
        assert_eq!(summary.histogram, reference.histogram);
    }

    #[test]
    fn test_failed_task_releases_device() {
        let config = synthetic_config("[read, take_log, build_sino, reconstruction, write]");
        let log = RecordingLog::default();
        let kernels = stub_kernels(&config, &log)
            .with_in_place(Step::TakeLog, Box::new(RecordingKernel::failing(Step::TakeLog)));
        let mut ctx = DeviceContext::new(1 << 24);

        let err = VolumeReconstruction::new(config, kernels, Backend::Device)
            .unwrap()
            .run(&mut ctx)
            .unwrap_err();
        assert!(matches!(err, ReconError::Kernel { step: Step::TakeLog, .. }));
        assert!(ctx.owner().is_none());
        assert_eq!(ctx.pool().used_bytes(), 0);
        assert!(log.written().is_empty());
    }

    #[test]
    fn test_invalid_configuration_is_rejected_before_any_task() {
        let mut config = synthetic_config("[flatfield, reconstruction]");
        config.dataset.flat_positions.clear();
        let err = VolumeReconstruction::new(
            config.clone(),
            stub_kernels(&config, &RecordingLog::default()),
            Backend::Host,
        )
        .err()
        .unwrap();
        match err {
            ReconError::InvalidConfiguration(problems) => assert!(problems.len() >= 3),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_device_is_single_owner() {
        let config = synthetic_config("[read, build_sino]");
        let log = RecordingLog::default();
        let layout = PipelineLayout {
            backend: Backend::Device,
            variant: PipelineVariant::Full,
            device_chunk: 32,
        };
        let mut ctx = DeviceContext::new(1 << 20);
        let first = ChunkedPipeline::new(
            config.clone(),
            Task::new(0, 8, Default::default()).unwrap(),
            stub_kernels(&config, &log),
            layout,
            &mut ctx,
        )
        .unwrap();
        let second = ChunkedPipeline::new(
            config.clone(),
            Task::new(8, 16, Default::default()).unwrap(),
            stub_kernels(&config, &log),
            layout,
            &mut ctx,
        );
        assert!(matches!(second, Err(ReconError::DeviceBusy { .. })));

        first.teardown(&mut ctx);
        assert!(ChunkedPipeline::new(
            config.clone(),
            Task::new(8, 16, Default::default()).unwrap(),
            stub_kernels(&config, &log),
            layout,
            &mut ctx,
        )
        .is_ok());
    }

    #[test]
    fn test_limited_memory_frees_projection_groups_before_sinogram_groups() {
        let config = with_phase(synthetic_config(ALL_STEPS));
        let log = RecordingLog::default();
        let mut ctx = DeviceContext::new(1 << 20);
        let mut limited = ChunkedPipeline::new(
            config.clone(),
            Task::with_clamped_margin(8, 24, 4, 32).unwrap(),
            stub_kernels(&config, &log),
            PipelineLayout {
                backend: Backend::Device,
                variant: PipelineVariant::LimitedMemory,
                device_chunk: 10,
            },
            &mut ctx,
        )
        .unwrap();

        let order: Rc<RefCell<Vec<Step>>> = Rc::default();
        let at_build: Rc<RefCell<Option<(Vec<String>, u64)>>> = Rc::default();
        for step in [Step::PhaseRetrieval, Step::TakeLog, Step::SinoNormalization] {
            let order = order.clone();
            limited
                .register_hook(
                    step,
                    Box::new(move |ctx: &mut HookContext<'_>| {
                        // the whole cropped stack is on the host by now
                        assert_eq!(ctx.host.shape(RADIOS), Some([4, 16, 6]));
                        order.borrow_mut().push(ctx.step);
                        Ok(())
                    }),
                )
                .unwrap();
        }
        {
            let order = order.clone();
            let at_build = at_build.clone();
            limited
                .register_hook(
                    Step::BuildSino,
                    Box::new(move |ctx: &mut HookContext<'_>| {
                        order.borrow_mut().push(ctx.step);
                        let live = ctx.device.live_names().iter().map(|n| n.to_string()).collect();
                        *at_build.borrow_mut() = Some((live, ctx.device.stats().peak_bytes));
                        Ok(())
                    }),
                )
                .unwrap();
        }

        limited.process_chunk(&mut ctx).unwrap();

        assert_eq!(
            *order.borrow(),
            vec![
                Step::PhaseRetrieval,
                Step::TakeLog,
                Step::SinoNormalization,
                Step::BuildSino
            ]
        );
        let (live, pass_one_peak) = at_build.borrow_mut().take().unwrap();
        assert!(live.is_empty(), "device buffers left from pass 1: {:?}", live);
        // one uncropped projection group
        assert_eq!(pass_one_peak, 24 * 6 * 4);
        assert_eq!(ctx.pool().stats().peak_bytes, (10 * 4 * 6 + 10 * 6 * 6) * 4);
        assert!(ctx.pool().live_names().is_empty());

        limited.teardown(&mut ctx);
    }
}
