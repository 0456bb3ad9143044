#![allow(clippy::float_cmp)]
use approx::assert_relative_eq;
use rustmd_algorithms::{
    BoxControllerConfig, CancellationToken, ConversionConfig, ConversionDriver, DriverState,
    MDEventWorkspace, NoProgress, TargetDescription, WorkspaceStatus,
};
use rustmd_core::{
    DetectorInfo, Dimension, EnergyMode, Error, EventList, EventWorkspace, Instrument, TofEvent,
    Unit, WeightedEvent,
};

fn two_detector_instrument() -> Instrument {
    let mut inst = Instrument::new("TEST", 10.0);
    // Forward along the beam and at 90 degrees.
    inst.push_detector(Some(DetectorInfo::new(1, [0.0, 0.0, 2.0])));
    inst.push_detector(Some(DetectorInfo::new(2, [2.0, 0.0, 0.0])));
    inst
}

fn q_description() -> TargetDescription {
    TargetDescription::new(
        vec![Dimension::new("|Q|", "MomentumTransfer", 0.0, 5.0).unwrap()],
        EnergyMode::Elastic,
    )
}

fn boxes(threshold: usize) -> BoxControllerConfig {
    BoxControllerConfig::default()
        .with_split_into(2)
        .with_split_threshold(threshold)
        .with_max_depth(10)
}

fn convert(
    input: &EventWorkspace,
    desc: TargetDescription,
    config: ConversionConfig,
    boxes: &BoxControllerConfig,
) -> MDEventWorkspace {
    let mut driver = ConversionDriver::new(input, desc, config);
    driver.initialize().unwrap();
    let mut out = driver.create_output_workspace(boxes).unwrap();
    driver
        .run(&mut out, &NoProgress, &CancellationToken::new())
        .unwrap();
    assert_eq!(driver.state(), DriverState::Done);
    out
}

/// Many spectra on a ring of detectors with weighted events.
fn ring_input(n_spectra: usize, events_per_spectrum: usize) -> EventWorkspace {
    let mut inst = Instrument::new("RING", 10.0);
    let mut angle: f64 = 0.0;
    for id in 0..n_spectra {
        inst.push_detector(Some(DetectorInfo::new(
            i32::try_from(id).unwrap(),
            [2.0 * angle.sin(), 0.0, 2.0 * angle.cos()],
        )));
        angle += 0.02;
    }
    let mut ws = EventWorkspace::new(inst).with_x_unit(Unit::Momentum);
    for _ in 0..n_spectra {
        let mut k = 0.05;
        let mut weight = 0.5;
        let mut events = Vec::with_capacity(events_per_spectrum);
        for _ in 0..events_per_spectrum {
            events.push(WeightedEvent::new(k, 0, weight, weight * weight));
            k += 0.11;
            weight += 0.25;
            if weight > 3.0 {
                weight = 0.5;
            }
        }
        ws.push_spectrum(EventList::Weighted(events));
    }
    ws
}

#[test]
fn test_end_to_end_elastic() {
    let mut input = EventWorkspace::new(two_detector_instrument()).with_x_unit(Unit::Momentum);
    for _ in 0..2 {
        input.push_spectrum(EventList::Tof(vec![
            TofEvent::new(1.0, 0),
            TofEvent::new(2.0, 0),
            TofEvent::new(4.0, 0),
        ]));
    }

    let out = convert(
        &input,
        q_description(),
        ConversionConfig::default(),
        &boxes(1000),
    );

    // Forward scattering gives |Q| = 0 for all three events; at 90 degrees
    // |Q| = k * sqrt(2), so k = 4 falls outside [0, 5).
    assert_eq!(out.n_points(), 5);
    assert_eq!(out.total_signal(), 5.0);
    assert_eq!(out.status(), &WorkspaceStatus::Complete);
    assert_eq!(out.num_experiment_info(), 1);

    let bounds = out.data_bounds().unwrap();
    assert_relative_eq!(bounds[0][0], 0.0);
    assert_relative_eq!(bounds[0][1], 2.0 * 2f64.sqrt(), max_relative = 1e-6);

    let at_origin = out.events_in_region(&[0.0], &[0.1]).unwrap();
    assert_eq!(at_origin.n_points, 3);
    let side = out.events_in_region(&[1.0], &[5.0]).unwrap();
    assert_eq!(side.n_points, 2);
}

#[test]
fn test_signal_and_error_are_conserved() {
    let input = ring_input(50, 40);
    let expected: (f64, f64, usize) = {
        let mut signal = 0.0;
        let mut error = 0.0;
        let mut n = 0;
        for (i, spectrum) in input.spectra.iter().enumerate() {
            let angle = 0.02 * f64::from(u32::try_from(i).unwrap());
            // |Q| = 2 k sin(theta) with theta half the scattering angle.
            let factor = 2.0 * (angle / 2.0).sin();
            if let EventList::Weighted(events) = spectrum {
                for e in events {
                    if e.tof * factor < 5.0 {
                        signal += f64::from(e.weight);
                        error += f64::from(e.error_squared);
                        n += 1;
                    }
                }
            }
        }
        (signal, error, n)
    };

    let out = convert(
        &input,
        q_description(),
        ConversionConfig::default().try_with_spectra_per_block(7).unwrap(),
        &boxes(20),
    );
    assert_eq!(out.n_points(), expected.2);
    assert_relative_eq!(out.total_signal(), expected.0, max_relative = 1e-9);
    assert_relative_eq!(out.total_error_squared(), expected.1, max_relative = 1e-9);

    let leaves = out.leaf_summaries();
    let leaf_total: usize = leaves.iter().map(|l| l.cache.n_points).sum();
    assert_eq!(leaf_total, expected.2);
    assert_eq!(out.box_controller().total_num_md_boxes(), leaves.len());
}

#[test]
fn test_split_pass_after_conversion_is_a_no_op() {
    let input = ring_input(30, 60);
    let mut out = convert(
        &input,
        q_description(),
        ConversionConfig::default(),
        &boxes(25),
    );
    let before = out.box_summaries();
    for leaf in out.leaf_summaries() {
        assert!(leaf.cache.n_points <= 25 || leaf.depth == 10);
    }

    assert_eq!(out.split_all_if_needed(), 0);
    out.refresh_cache();
    assert_eq!(out.box_summaries(), before);
}

fn leaf_shape(out: &MDEventWorkspace) -> Vec<(usize, Vec<u32>, usize)> {
    let mut shape: Vec<_> = out
        .leaf_summaries()
        .into_iter()
        .map(|l| {
            let mins = l.extents.iter().map(|e| e.min.to_bits()).collect();
            (l.depth, mins, l.cache.n_points)
        })
        .collect();
    shape.sort();
    shape
}

#[test]
fn test_result_is_independent_of_spectrum_order() {
    let input = ring_input(40, 30);
    let mut reversed = EventWorkspace::new(Instrument {
        detectors: input.instrument.detectors.iter().rev().cloned().collect(),
        ..input.instrument.clone()
    })
    .with_x_unit(Unit::Momentum);
    for spectrum in input.spectra.iter().rev() {
        reversed.push_spectrum(spectrum.clone());
    }

    let a = convert(
        &input,
        q_description(),
        ConversionConfig::default().try_with_spectra_per_block(3).unwrap(),
        &boxes(15),
    );
    let b = convert(
        &reversed,
        q_description(),
        ConversionConfig::default()
            .with_parallel(false)
            .try_with_spectra_per_block(11)
            .unwrap(),
        &boxes(15),
    );

    assert_eq!(a.n_points(), b.n_points());
    assert_relative_eq!(a.total_signal(), b.total_signal(), max_relative = 1e-9);
    assert_eq!(leaf_shape(&a), leaf_shape(&b));
}

#[test]
fn test_direct_mode_with_additional_coordinate() {
    let mut input = EventWorkspace::new(two_detector_instrument()).with_x_unit(Unit::DeltaE);
    for _ in 0..2 {
        input.push_spectrum(EventList::Tof(vec![
            TofEvent::new(-2.0, 0),
            TofEvent::new(0.0, 0),
            TofEvent::new(5.0, 0),
            TofEvent::new(12.0, 0),
        ]));
    }
    let desc = TargetDescription::new(
        vec![
            Dimension::new("|Q|", "MomentumTransfer", 0.0, 10.0).unwrap(),
            Dimension::new("DeltaE", "DeltaE", -10.0, 10.0).unwrap(),
        ],
        EnergyMode::Direct,
    )
    .with_incident_energy(10.0)
    .with_additional_coordinate(Dimension::new("T", "K", 0.0, 300.0).unwrap(), 100.0);

    let out = convert(&input, desc, ConversionConfig::default(), &boxes(1000));
    assert_eq!(out.nd(), 3);
    // Energy transfer above Ei is rejected.
    assert_eq!(out.n_points(), 6);

    let at_t = out
        .events_in_region(&[0.0, -10.0, 99.5], &[10.0, 10.0, 100.5])
        .unwrap();
    assert_eq!(at_t.n_points, 6);
    let at_five = out
        .events_in_region(&[0.0, 4.5, 0.0], &[10.0, 5.5, 300.0])
        .unwrap();
    assert_eq!(at_five.n_points, 2);
    assert_eq!(
        out.experiment_info(0).map(|e| e.incident_energy),
        Some(Some(10.0))
    );
}

#[test]
fn test_additional_coordinate_out_of_range_adds_nothing() {
    let input = ring_input(4, 10);
    let desc = q_description()
        .with_additional_coordinate(Dimension::new("T", "K", 0.0, 300.0).unwrap(), 300.0);
    let mut driver = ConversionDriver::new(&input, desc, ConversionConfig::default());
    driver.initialize().unwrap();
    let mut out = driver.create_output_workspace(&boxes(10)).unwrap();
    let report = driver
        .run(&mut out, &NoProgress, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.events_added, 0);
    assert_eq!(out.n_points(), 0);
    assert_eq!(out.status(), &WorkspaceStatus::Complete);
}

#[test]
fn test_cancel_mid_run_keeps_partial_output() {
    let input = ring_input(10, 5);
    let desc = q_description();
    let config = ConversionConfig::default()
        .with_parallel(false)
        .try_with_spectra_per_block(2)
        .unwrap();
    let mut driver = ConversionDriver::new(&input, desc, config);
    driver.initialize().unwrap();
    let mut out = driver.create_output_workspace(&boxes(3)).unwrap();

    let cancel = CancellationToken::new();
    let progress = |done: usize, _total: usize| {
        if done >= 4 {
            cancel.cancel();
        }
    };
    let err = driver.run(&mut out, &progress, &cancel).unwrap_err();

    let Error::Cancelled { events_added } = err else {
        panic!("expected cancellation, got {err}");
    };
    assert!(events_added > 0);
    assert!(events_added <= 20);
    assert_eq!(out.n_points(), events_added);
    assert_eq!(out.status(), &WorkspaceStatus::Cancelled);
    assert_eq!(driver.state(), DriverState::Failed);
    // Partial output is still a consistent tree.
    assert_eq!(out.split_all_if_needed(), 0);
}

#[test]
fn test_second_run_appends_with_new_run_index() {
    let input = ring_input(6, 8);
    let mut first = ConversionDriver::new(&input, q_description(), ConversionConfig::default());
    first.initialize().unwrap();
    let mut out = first.create_output_workspace(&boxes(10)).unwrap();
    let r0 = first
        .run(&mut out, &NoProgress, &CancellationToken::new())
        .unwrap();

    let mut second = ConversionDriver::new(&input, q_description(), ConversionConfig::default());
    second.initialize().unwrap();
    let r1 = second
        .run(&mut out, &NoProgress, &CancellationToken::new())
        .unwrap();

    assert_eq!(r0.run_index, 0);
    assert_eq!(r1.run_index, 1);
    assert_eq!(r0.events_added, r1.events_added);
    assert_eq!(out.n_points(), 2 * r0.events_added);
    assert_eq!(out.num_experiment_info(), 2);
}

#[test]
fn test_min_recursion_depth_before_conversion() {
    let input = ring_input(8, 10);
    let mut driver = ConversionDriver::new(&input, q_description(), ConversionConfig::default());
    driver.initialize().unwrap();
    let dims = q_description().dimensions;
    let mut out = MDEventWorkspace::new(dims, &boxes(1000)).unwrap();
    out.set_min_recursion_depth(3).unwrap();
    assert_eq!(out.box_controller().total_num_md_boxes(), 8);

    let report = driver
        .run(&mut out, &NoProgress, &CancellationToken::new())
        .unwrap();
    assert_eq!(out.n_points(), report.events_added);
    assert_eq!(report.num_boxes, 8);
}

const PLANCK: f64 = 6.626_068_96e-34;
const NEUTRON_MASS: f64 = 1.674_927_211e-27;
const MEV: f64 = 1.602_176_487e-22;

/// Wavevector (1/Angstrom) of a neutron with speed `v` (m/s).
fn wavevector(v: f64) -> f64 {
    2.0 * std::f64::consts::PI * NEUTRON_MASS * v / PLANCK * 1e-10
}

/// One side detector at 90 degrees, 2 m from the sample, L1 = 10 m.
fn tof_input(tof: f64) -> EventWorkspace {
    let mut inst = Instrument::new("TOF", 10.0);
    inst.push_detector(Some(DetectorInfo::new(1, [2.0, 0.0, 0.0])));
    let mut input = EventWorkspace::new(inst).with_x_unit(Unit::Tof);
    input.push_spectrum(EventList::Tof(vec![TofEvent::new(tof, 0)]));
    input
}

#[test]
fn test_elastic_from_time_of_flight() {
    let input = tof_input(3000.0);
    let desc = TargetDescription::new(
        vec![Dimension::new("|Q|", "MomentumTransfer", 0.0, 20.0).unwrap()],
        EnergyMode::Elastic,
    );
    let out = convert(&input, desc, ConversionConfig::default(), &boxes(1000));

    // k from the total flight path, |Q| = 2 k sin(45 degrees).
    let k = wavevector(12.0 / 3000e-6);
    let q = 2.0 * k * std::f64::consts::FRAC_PI_4.sin();
    assert_eq!(out.n_points(), 1);
    let bounds = out.data_bounds().unwrap();
    assert_relative_eq!(bounds[0][0], q, max_relative = 1e-4);
    assert_relative_eq!(bounds[0][0], 8.984_52, max_relative = 1e-4);
}

#[test]
fn test_direct_from_time_of_flight() {
    let ei = 25.0;
    let tof = 6000.0;
    let input = tof_input(tof);
    let desc = TargetDescription::new(
        vec![
            Dimension::new("|Q|", "MomentumTransfer", 0.0, 10.0).unwrap(),
            Dimension::new("DeltaE", "DeltaE", -25.0, 25.0).unwrap(),
        ],
        EnergyMode::Direct,
    )
    .with_incident_energy(ei);
    let out = convert(&input, desc, ConversionConfig::default(), &boxes(1000));

    // The incident leg takes L1 / v_i; the rest of the flight is over L2.
    let v_i = (2.0 * ei * MEV / NEUTRON_MASS).sqrt();
    let v_f = 2.0 / (tof * 1e-6 - 10.0 / v_i);
    let e_f = 0.5 * NEUTRON_MASS * v_f * v_f / MEV;
    let delta_e = ei - e_f;
    // At 90 degrees |Q|^2 = k_i^2 + k_f^2.
    let q = wavevector(v_i).hypot(wavevector(v_f));

    assert_eq!(out.n_points(), 1);
    let bounds = out.data_bounds().unwrap();
    assert_relative_eq!(bounds[0][0], q, max_relative = 1e-4);
    assert_relative_eq!(bounds[1][0], delta_e, max_relative = 1e-4);
    assert_relative_eq!(bounds[1][0], 14.739, max_relative = 1e-4);
}
