mod common;

use burn::module::AutodiffModule;
use burn::prelude::*;
use common::{
    max_abs_diff, probe_images, synthetic_source, tiny_config, values, Inner, TestBackend, IMAGE_SIZE,
};
use stargan_burn::data::{DataSource, TensorSource};
use stargan_burn::error::SolverError;
use stargan_burn::model::{DomainCritic, ImageTranslator};
use stargan_burn::schedule::{LearningRates, LOSS_HISTORY_FILE};
use stargan_burn::training::Solver;
use std::path::Path;

fn generator_output(solver: &Solver<TestBackend>) -> Vec<f32> {
    let device = Default::default();
    let labels = Tensor::<Inner, 2>::from_data([[1.0f32, 0.0], [0.0, 1.0]], &device);
    values(solver.generator().valid().translate(probe_images::<Inner>(&device), labels))
}

fn critic_output(solver: &Solver<TestBackend>) -> Vec<f32> {
    let device = Default::default();
    let (src, _) = solver.discriminator().valid().critique(probe_images::<Inner>(&device));
    values(src)
}

#[test]
fn critic_only_iterations_leave_the_generator_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = tiny_config(dir.path()).with_n_critic(3).with_d_lr(1e-2).with_g_lr(1e-2);
    let lrs = LearningRates::new(config.g_lr, config.d_lr, config.num_iters_decay);
    let mut solver = Solver::<TestBackend>::new(config, device).unwrap();
    let mut source = synthetic_source::<TestBackend>(8, 4, &device);

    let g_before = generator_output(&solver);
    let d_before = critic_output(&solver);

    for iteration in 0..2 {
        let batch = source.next_wrapping().unwrap();
        let record = solver.train_step(iteration, batch, &lrs).unwrap();
        assert!(record.generator.is_none());
        assert_eq!(record.entries().len(), 4);
        assert!(record.discriminator.loss_gp >= 0.0);
        assert!(record.discriminator.loss_cls >= 0.0);
    }
    assert_eq!(max_abs_diff(&g_before, &generator_output(&solver)), 0.0);
    let d_after = critic_output(&solver);
    assert!(max_abs_diff(&d_before, &d_after) > 0.0);

    let batch = source.next_wrapping().unwrap();
    let record = solver.train_step(2, batch, &lrs).unwrap();
    let generator = record.generator.expect("generator updates on the n_critic-th iteration");
    assert!(generator.loss_rec >= 0.0);
    assert_eq!(record.entries().len(), 7);
    assert_eq!(record.entries()[4].0, "G/loss_fake");
    assert!(max_abs_diff(&g_before, &generator_output(&solver)) > 0.0);
}

fn history_lines(root: &Path) -> Vec<String> {
    std::fs::read_to_string(root.join("logs").join(LOSS_HISTORY_FILE))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn short_run_fires_every_trigger_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let device = Default::default();
    let config = tiny_config(root)
        .with_num_iters(6)
        .with_num_iters_decay(4)
        .with_n_critic(2)
        .with_log_step(2)
        .with_sample_step(3)
        .with_model_save_step(3)
        .with_lr_update_step(2);

    let mut solver = Solver::<TestBackend>::new(config.clone(), device).unwrap();
    let mut source = synthetic_source::<TestBackend>(6, 4, &device);
    let summary = solver.train(&mut source).unwrap();

    assert_eq!(summary.start_iters, 0);
    assert_eq!(summary.final_iteration, 6);
    assert_eq!(summary.checkpoints, vec![3, 6]);
    assert!(!summary.interrupted);
    // Decays fire after steps 4 and 6, each removing a quarter of the base rate.
    assert!((summary.g_lr - config.g_lr / 2.0).abs() < 1e-12);
    assert!((summary.d_lr - config.d_lr / 2.0).abs() < 1e-12);

    for step in [3, 6] {
        assert!(root.join("models").join(format!("{step}-G.ckpt")).is_file());
        assert!(root.join("models").join(format!("{step}-D.ckpt")).is_file());
        assert!(root.join("samples").join(format!("{step}-images.jpg")).is_file());
    }
    assert!(root.join("models").join("config.json").is_file());

    // Step 2 is flushed at checkpoint 3, steps 4 and 6 at checkpoint 6.
    let lines = history_lines(root);
    assert_eq!(lines[0], "step,D1,D2,D3,D4,G1,G2,G3");
    let steps: Vec<&str> = lines[1..]
        .iter()
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(steps, vec!["2", "4", "6"]);
    assert!(lines[1..].iter().all(|line| !line.ends_with(",,,")));

    let resumed_config = config.with_resume_iters(Some(3));
    let mut resumed = Solver::<TestBackend>::new(resumed_config, device).unwrap();
    let mut source = synthetic_source::<TestBackend>(6, 4, &device);
    let summary = resumed.train(&mut source).unwrap();
    assert_eq!(summary.start_iters, 3);
    assert_eq!(summary.final_iteration, 6);
    assert_eq!(summary.checkpoints, vec![6]);
    assert!((summary.g_lr - resumed.config().g_lr / 2.0).abs() < 1e-12);

    let lines = history_lines(root);
    assert_eq!(lines.iter().filter(|line| line.starts_with("step")).count(), 1);
    assert_eq!(lines.len(), 1 + 3 + 2);
}

#[test]
fn resuming_from_a_missing_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = tiny_config(dir.path())
        .with_num_iters(4)
        .with_num_iters_decay(0)
        .with_resume_iters(Some(2));
    let mut solver = Solver::<TestBackend>::new(config, device).unwrap();
    let mut source = synthetic_source::<TestBackend>(4, 2, &device);

    let err = solver.train(&mut source).unwrap_err();
    assert!(format!("{err:#}").contains("checkpoint not found"));
}

#[test]
fn stop_flag_ends_the_run_between_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = tiny_config(dir.path()).with_num_iters(5).with_num_iters_decay(0);
    let mut solver = Solver::<TestBackend>::new(config, device).unwrap();
    solver
        .stop_handle()
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let mut source = synthetic_source::<TestBackend>(4, 2, &device);
    let summary = solver.train(&mut source).unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.final_iteration, 0);
    assert!(summary.checkpoints.is_empty());
}

#[test]
fn non_finite_inputs_stop_training_before_any_update() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = tiny_config(dir.path())
        .with_num_iters(4)
        .with_num_iters_decay(0)
        .with_n_critic(1)
        .with_model_save_step(1);
    let mut solver = Solver::<TestBackend>::new(config, device).unwrap();
    let g_before = generator_output(&solver);
    let d_before = critic_output(&solver);

    let images = Tensor::<TestBackend, 4>::full([4, 3, IMAGE_SIZE, IMAGE_SIZE], f32::NAN, &device);
    let mut source = TensorSource::new(images, vec![0, 1, 0, 1], 2).unwrap();
    let err = solver.train(&mut source).unwrap_err();

    assert!(format!("{err:#}").contains("training failed at iteration 1"));
    let cause = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SolverError>())
        .expect("solver error in the chain");
    assert!(matches!(
        cause,
        SolverError::NumericalInstability { iteration: 1, term: "D/loss_real", .. }
    ));

    assert_eq!(max_abs_diff(&g_before, &generator_output(&solver)), 0.0);
    assert_eq!(max_abs_diff(&d_before, &critic_output(&solver)), 0.0);
    assert!(!dir.path().join("models").join("1-G.ckpt").exists());
}
