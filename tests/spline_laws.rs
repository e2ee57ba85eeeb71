use motive_anim::*;
use std::rc::Rc;

mod common;
use common::*;

const STEP_X: f32 = 5.0;
const NUM_POINTS: usize = 81;

fn mirrored(nodes: &[UncompressedNode]) -> Vec<UncompressedNode> {
    return nodes
        .iter()
        .map(|n| UncompressedNode::new(n.x, -n.y, -n.derivative))
        .collect();
}

fn stretched(nodes: &[UncompressedNode], k: f32) -> Vec<UncompressedNode> {
    return nodes
        .iter()
        .map(|n| UncompressedNode::new(n.x * k, n.y, n.derivative / k))
        .collect();
}

/// The segment cubic in effect at `x`, with x relative to its start.
fn segment_at(spline: &CompactSpline, x: f32) -> Option<(CubicCurve, f32)> {
    let index = spline.index_for_x(x, 0);
    if outside_spline(index) {
        return None;
    }
    let cubic = CubicCurve::from_init(&spline.create_cubic_init(index));
    return Some((cubic, x - spline.node_x(index)));
}

fn run_evaluator(spline: &Rc<CompactSpline>, playback: &SplinePlayback, tester: &mut dyn FnMut(usize, &BulkSplineEvaluator)) {
    let mut evaluator = BulkSplineEvaluator::new();
    evaluator.set_num_indices(1);
    evaluator.set_splines(0, &[spline.clone()], playback);
    for i in 0..NUM_POINTS {
        tester(i, &evaluator);
        evaluator.advance_frame(STEP_X);
    }
}

#[test]
fn test_mirror_law() {
    let nodes = wave_nodes();
    let spline = CompactSpline::from_nodes(&nodes);
    let mirror = CompactSpline::from_nodes(&mirrored(&nodes));

    let (ys, derivatives) = spline.ys(0.0, STEP_X, NUM_POINTS);
    let (mirror_ys, mirror_derivatives) = mirror.ys(0.0, STEP_X, NUM_POINTS);
    for i in 0..NUM_POINTS {
        assert_near(mirror_ys[i], -ys[i], 1e-4, &format!("y at {}", i));
        assert_near(mirror_derivatives[i], -derivatives[i], 1e-5, &format!("derivative at {}", i));
    }

    for i in 0..NUM_POINTS {
        let x = i as f32 * STEP_X;
        let (Some((cubic, dx)), Some((mirror_cubic, mirror_dx))) = (segment_at(&spline, x), segment_at(&mirror, x))
        else {
            continue;
        };
        assert_near(mirror_dx, dx, 1e-3, &format!("segment x at {}", x));
        assert_near(
            mirror_cubic.second_derivative(dx),
            -cubic.second_derivative(dx),
            1e-6,
            &format!("second derivative at {}", x),
        );
        assert_near(
            mirror_cubic.third_derivative(dx),
            -cubic.third_derivative(dx),
            1e-7,
            &format!("third derivative at {}", x),
        );
    }
}

#[test]
fn test_scale_law() {
    let nodes = wave_nodes();
    let spline = CompactSpline::from_nodes(&nodes);
    for k in [0.5, 2.0, 4.0] {
        let scaled = CompactSpline::from_nodes(&stretched(&nodes, k));
        assert_near(scaled.end_x(), spline.end_x() * k, 1e-2, "end x");

        let (ys, derivatives) = spline.ys(0.0, STEP_X, NUM_POINTS);
        let (scaled_ys, scaled_derivatives) = scaled.ys(0.0, STEP_X * k, NUM_POINTS);
        for i in 0..NUM_POINTS {
            assert_near(scaled_ys[i], ys[i], 1e-4, &format!("y at {} (k={})", i, k));
            assert_near(
                scaled_derivatives[i],
                derivatives[i] / k,
                1e-5,
                &format!("derivative at {} (k={})", i, k),
            );
        }
    }
}

#[test]
fn test_playback_transform_law() {
    let spline = Rc::new(CompactSpline::from_nodes(&wave_nodes()));
    let mut plain = Vec::new();
    run_evaluator(&spline, &SplinePlayback::default(), &mut |_, e| {
        plain.push((e.y(0), e.derivative(0)));
    });

    for (y_scale, y_offset) in [(3.0, -2.0), (-1.0, 0.0), (0.5, 10.0)] {
        let playback = SplinePlayback {
            y_scale,
            y_offset,
            ..SplinePlayback::default()
        };
        run_evaluator(&spline, &playback, &mut |i, e| {
            let (y, derivative) = plain[i];
            assert_near(e.y(0), y * y_scale + y_offset, 1e-4, &format!("y at {}", i));
            assert_near(e.derivative(0), derivative * y_scale, 1e-5, &format!("derivative at {}", i));
        });
    }
}

#[test]
fn test_bulk_matches_slow() {
    let first = Rc::new(CompactSpline::from_nodes(&wave_nodes()));
    let second = Rc::new(CompactSpline::from_nodes(&mirrored(&wave_nodes())));

    let (ys, _) = first.ys(0.0, STEP_X, NUM_POINTS);
    for (i, y) in ys.iter().enumerate() {
        let slow = first.y_calculated_slowly(i as f32 * STEP_X);
        assert_near(*y, slow, 1e-4, &format!("y at {}", i));
    }

    let splines = [first.clone(), second.clone()];
    let (bulk_ys, _) = CompactSpline::bulk_ys(&splines, 0.0, STEP_X, NUM_POINTS);
    assert_eq!(bulk_ys.len(), NUM_POINTS * 2);
    for i in 0..NUM_POINTS {
        let x = i as f32 * STEP_X;
        assert_near(bulk_ys[i * 2], first.y_calculated_slowly(x), 1e-4, &format!("first at {}", x));
        assert_near(bulk_ys[i * 2 + 1], second.y_calculated_slowly(x), 1e-4, &format!("second at {}", x));
    }
}

#[test]
fn test_half_step() {
    let mut spline = CompactSpline::with_range(Interval::new(0.0, 1.0), 0.01, 8);
    spline.add_node(0.0, 0.0, 1.0, SplineAddMethod::EnsureCubicWellBehaved);
    spline.add_node(1.0, 1.0, 0.0, SplineAddMethod::EnsureCubicWellBehaved);

    let mut evaluator = BulkSplineEvaluator::new();
    evaluator.set_num_indices(1);
    evaluator.set_splines(0, &[Rc::new(spline)], &SplinePlayback::default());
    evaluator.advance_frame(0.5);
    assert_near(evaluator.y(0), 0.5, 0.05, "y at 0.5");
}
