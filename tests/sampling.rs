//! Sampling regimes of the parser: discrete, relaxed and straight-through.

use latent_tree::error::Error;
use latent_tree::nn::TrainMode;
use latent_tree::parser::{BottomUpParser, ForwardOptions, ParserConfig, TemperatureWeights};
use latent_tree::{Tensor, Var};
use numr::autograd::{backward, var_sum};
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};

fn setup() -> (CpuClient, CpuDevice) {
    let device = CpuDevice::new();
    let client = CpuClient::new(device.clone());
    (client, device)
}

fn batch(device: &CpuDevice) -> (Var<CpuRuntime>, Tensor<CpuRuntime>) {
    let data: Vec<f32> = (0..2 * 5 * 3).map(|i| (i as f32 * 0.7).sin()).collect();
    let x = Var::new(Tensor::<CpuRuntime>::from_slice(&data, &[2, 5, 3], device), false);
    let mask = Tensor::<CpuRuntime>::from_slice(
        &[1.0f32, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
        &[2, 5],
        device,
    );
    (x, mask)
}

fn parser(client: &CpuClient, device: &CpuDevice) -> BottomUpParser<CpuRuntime> {
    BottomUpParser::<CpuRuntime>::new(client, ParserConfig::new(3, 4), device, true).unwrap()
}

#[test]
fn test_discrete_noise_replay_is_deterministic() {
    let (client, device) = setup();
    let parser = parser(&client, &device);
    let (x, mask) = batch(&device);

    let first = parser
        .forward(&client, &x, &mask, &ForwardOptions::discrete())
        .unwrap();
    let noise = first.trace.noise().expect("training samples record noise");
    assert_eq!(noise.len(), 4);

    let replay = parser
        .forward(
            &client,
            &x,
            &mask,
            &ForwardOptions::discrete().with_noise(&noise),
        )
        .unwrap();
    assert_eq!(first.trace.merge_indices(), replay.trace.merge_indices());
    assert_eq!(
        first.log_prob.unwrap().tensor().to_vec::<f32>(),
        replay.log_prob.unwrap().tensor().to_vec::<f32>()
    );
    assert_eq!(
        first.root.h.tensor().to_vec::<f32>(),
        replay.root.h.tensor().to_vec::<f32>()
    );
}

#[test]
fn test_discrete_samples_never_pick_padding() {
    let (client, device) = setup();
    let parser = parser(&client, &device);
    let (x, mask) = batch(&device);
    for _ in 0..10 {
        let out = parser
            .forward(&client, &x, &mask, &ForwardOptions::discrete())
            .unwrap();
        // row 1 has 3 valid positions: merges stay within the valid prefix
        let indices = out.trace.merge_indices();
        assert!(indices[0][1] <= 1);
        assert_eq!(indices[1][1], 0);
    }
}

#[test]
fn test_round_probabilities_sum_to_one_with_padding() {
    let (client, device) = setup();
    let parser = parser(&client, &device);
    let (x, mask) = batch(&device);
    let out = parser
        .forward(&client, &x, &mask, &ForwardOptions::discrete())
        .unwrap();

    // row 1 is fully padded in the last merge rounds
    for record in out.trace.rounds() {
        let p: Vec<f32> = record.probs.tensor().to_vec();
        let slots = record.probs.shape()[1];
        for row in p.chunks(slots) {
            assert!(row.iter().all(|v| v.is_finite()));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5, "{row:?}");
        }
    }
}

#[test]
fn test_relaxed_mode_outputs() {
    let (client, device) = setup();
    let parser = parser(&client, &device);
    let (x, mask) = batch(&device);
    let temperature = TemperatureWeights::<CpuRuntime>::from_values(0.5, 0.0, -1.0, &device, true);

    let out = parser
        .forward(&client, &x, &mask, &ForwardOptions::relaxed(&temperature))
        .unwrap();
    assert!(out.log_prob.is_none());
    assert!(out.trace.rounds().iter().all(|r| r.log_prob.is_none()));
    let noise = out.trace.noise().expect("relaxed samples record noise");

    for record in out.trace.rounds() {
        let a: Vec<f32> = record.action.tensor().to_vec();
        let slots = record.action.shape()[1];
        for row in a.chunks(slots) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    let loss = var_sum(&out.root.h, &[], false, &client).unwrap();
    let grads = backward(&loss, &client).unwrap();
    let dt: Vec<f32> = grads.get(temperature.var().id()).unwrap().to_vec();
    assert!(dt.iter().all(|g| g.is_finite()), "{dt:?}");
    assert!(dt[1] != 0.0 && dt[2] != 0.0, "{dt:?}");
    let dq: Vec<f32> = grads.get(parser.query().id()).unwrap().to_vec();
    assert!(dq.iter().all(|g| g.is_finite()));

    let replay = parser
        .forward(
            &client,
            &x,
            &mask,
            &ForwardOptions::relaxed(&temperature).with_noise(&noise),
        )
        .unwrap();
    for (a, b) in out.trace.actions().iter().zip(replay.trace.actions()) {
        assert_eq!(a.tensor().to_vec::<f32>(), b.tensor().to_vec::<f32>());
    }
}

#[test]
fn test_straight_through_actions_are_one_hot() {
    let (client, device) = setup();
    let parser = parser(&client, &device);
    let (x, mask) = batch(&device);
    let temperature = TemperatureWeights::<CpuRuntime>::from_values(1.0, 0.0, 0.0, &device, true);
    let options = ForwardOptions::relaxed(&temperature).with_straight_through(true);

    let out = parser.forward(&client, &x, &mask, &options).unwrap();
    for record in out.trace.rounds() {
        let a: Vec<f32> = record.action.tensor().to_vec();
        assert!(a.iter().all(|&v| v == 0.0 || v == 1.0));
        let slots = record.action.shape()[1];
        for row in a.chunks(slots) {
            assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
    }

    let loss = var_sum(&out.root.h, &[], false, &client).unwrap();
    let grads = backward(&loss, &client).unwrap();
    let dq: Vec<f32> = grads.get(parser.query().id()).unwrap().to_vec();
    assert!(dq.iter().all(|g| g.is_finite()), "{dq:?}");
    let dt: Vec<f32> = grads.get(temperature.var().id()).unwrap().to_vec();
    assert!(dt.iter().all(|g| g.is_finite()), "{dt:?}");
}

#[test]
fn test_inference_ignores_noise_and_uses_argmax() {
    let (client, device) = setup();
    let mut parser = parser(&client, &device);
    parser.set_training(false);
    let (x, mask) = batch(&device);

    let plain = parser
        .forward(&client, &x, &mask, &ForwardOptions::discrete())
        .unwrap();
    let noise: Vec<Tensor<CpuRuntime>> = (0..4)
        .map(|k| {
            let slots = 4 - k;
            Tensor::<CpuRuntime>::from_slice(&vec![100.0f32; 2 * slots], &[2, slots], &device)
        })
        .collect();
    let noisy = parser
        .forward(
            &client,
            &x,
            &mask,
            &ForwardOptions::discrete().with_noise(&noise),
        )
        .unwrap();

    assert!(plain.trace.noise().is_none());
    assert_eq!(plain.trace.merge_indices(), noisy.trace.merge_indices());
    for record in plain.trace.rounds() {
        let probs: Vec<f32> = record.probs.tensor().to_vec();
        let action: Vec<f32> = record.action.tensor().to_vec();
        let slots = record.probs.shape()[1];
        for (p, a) in probs.chunks(slots).zip(action.chunks(slots)) {
            let best = a.iter().position(|&v| v == 1.0).unwrap();
            assert!(p.iter().all(|&v| v <= p[best]));
        }
    }
}

#[test]
fn test_flag_combinations_are_validated() {
    let (client, device) = setup();
    let parser = parser(&client, &device);
    let (x, mask) = batch(&device);
    let temperature = TemperatureWeights::<CpuRuntime>::from_values(1.0, 0.0, 0.0, &device, false);

    let mut missing_temperature = ForwardOptions::<CpuRuntime>::discrete();
    missing_temperature.relaxed = true;
    let mut stray_temperature = ForwardOptions::relaxed(&temperature);
    stray_temperature.relaxed = false;
    let stray_straight_through = ForwardOptions::<CpuRuntime>::discrete().with_straight_through(true);

    for options in [missing_temperature, stray_temperature, stray_straight_through] {
        assert!(matches!(
            parser.forward(&client, &x, &mask, &options),
            Err(Error::InvalidConfig { .. })
        ));
    }
}

#[test]
fn test_temperature_for_single_valid_slot() {
    let (client, device) = setup();
    let temperature = TemperatureWeights::<CpuRuntime>::from_values(0.25, 0.5, -0.5, &device, false);
    let tau: Vec<f32> = temperature
        .temperature(&client, &[1.0])
        .unwrap()
        .tensor()
        .to_vec();
    let expected = 0.25 + 0.5f32.exp() * 2.0f32.ln() + (-0.5f32).exp();
    assert!((tau[0] - expected).abs() < 1e-5);
}
