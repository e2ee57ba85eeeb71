use motive_anim::*;
use proptest::prelude::*;
use std::rc::Rc;

fn node_strategy() -> impl Strategy<Value = (f32, f32, f32)> {
    return (1.0f32..50.0, -10.0f32..10.0, -1.0f32..1.0);
}

fn build_spline(nodes: &[(f32, f32, f32)]) -> Rc<CompactSpline> {
    let mut x = 0.0;
    let uncompressed: Vec<UncompressedNode> = nodes
        .iter()
        .map(|&(width, y, derivative)| {
            let node = UncompressedNode::new(x, y, derivative);
            x += width;
            return node;
        })
        .collect();
    return Rc::new(CompactSpline::from_nodes(&uncompressed));
}

fn run(strategy: Box<dyn EvaluatorStrategy>, splines: &[Rc<CompactSpline>], rates: &[f32], steps: &[f32]) -> Vec<f32> {
    let mut evaluator = BulkSplineEvaluator::with_strategy(strategy);
    evaluator.set_num_indices(splines.len());
    for (i, spline) in splines.iter().enumerate() {
        let playback = SplinePlayback {
            playback_rate: rates[i],
            repeat: i % 2 == 1,
            ..SplinePlayback::default()
        };
        evaluator.set_splines(i, &[spline.clone()], &playback);
    }

    let mut ys = Vec::with_capacity(splines.len() * (steps.len() + 1));
    ys.extend_from_slice(evaluator.ys(0, splines.len()));
    for step in steps {
        evaluator.advance_frame(*step);
        ys.extend_from_slice(evaluator.ys(0, splines.len()));
    }
    return ys;
}

proptest! {
    #[test]
    fn scalar_and_lane_strategies_agree(
        splines in proptest::collection::vec(proptest::collection::vec(node_strategy(), 2..6), 1..19),
        rates in proptest::collection::vec(0.0f32..3.0, 19),
        steps in proptest::collection::vec(0.0f32..40.0, 1..30),
    ) {
        let splines: Vec<Rc<CompactSpline>> = splines.iter().map(|n| build_spline(n)).collect();
        let scalar = run(Box::new(ScalarStrategy), &splines, &rates, &steps);
        let lane = run(Box::new(LaneStrategy), &splines, &rates, &steps);
        prop_assert_eq!(scalar.len(), lane.len());
        for (i, (s, l)) in scalar.iter().zip(lane.iter()).enumerate() {
            prop_assert!((s - l).abs() <= 1e-4 * s.abs().max(1.0), "y {}: {} != {}", i, s, l);
        }
    }
}
